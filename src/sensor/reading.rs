use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

/// One sensor value, produced fresh on every read and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub id: String,
    /// Physical quantity name, e.g. `Temperature`.
    pub quantity: String,
    pub value: f64,
    pub unit: String,
}

impl SensorReading {
    pub fn new(
        id: impl Into<String>,
        quantity: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            quantity: quantity.into(),
            value,
            unit: unit.into(),
        }
    }
}

/// Renders the payload segment `<quantity>(<id>):<value>.<2 decimals><unit>`.
impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}):", self.quantity, self.id)?;
        match round_half_up(self.value) {
            Some(value) => write!(f, "{:3.2}", value)?,
            None => write!(f, "{:3.2}", self.value)?,
        }
        f.write_str(&self.unit)
    }
}

/// Rounds the shortest decimal form of `value` to two places, ties away from zero.
/// `None` for values with no decimal form (NaN, infinities).
fn round_half_up(value: f64) -> Option<Decimal> {
    let exact = Decimal::from_str(&value.to_string()).ok()?;
    Some(exact.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}
