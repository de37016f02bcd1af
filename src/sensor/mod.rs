//! The `sensor` module describes where readings come from.
//!
//! `SensorSource` is the capability the publisher consumes; `W1SensorSource`
//! is the implementation used on real hardware.

pub mod reading;
pub mod w1;

use async_trait::async_trait;

use crate::utils::error::SensorError;

pub use reading::SensorReading;
pub use w1::W1SensorSource;

/// Enumerates the currently available sensors together with their latest values.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Readings are returned in a stable order; the payload follows it.
    async fn list_sensors(&self) -> Result<Vec<SensorReading>, SensorError>;
}
