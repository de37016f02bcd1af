use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::utils::error::PropertyError;

pub const PUBLISH_RATE_PROP_NAME: &str = "publish.rate";
pub const PUBLISH_TOPIC_PROP_NAME: &str = "publish.semanticTopic";
pub const PUBLISH_QOS_PROP_NAME: &str = "publish.qos";
pub const PUBLISH_RETAIN_PROP_NAME: &str = "publish.retain";

const DEFAULT_TOPIC: &str = "data";
const MAX_QOS: u64 = 2;

/// Configuration snapshot delivered by the host.
///
/// The map is never mutated once handed over; an update replaces the whole
/// snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties(BTreeMap<String, Value>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy when assembling a snapshot.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for Properties {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Typed view of the publishing properties, fixed for the lifetime of one schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOptions {
    pub rate: Duration,
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
}

impl PublishOptions {
    /// Returns `Ok(None)` when `publish.rate` is absent, meaning nothing should be scheduled.
    pub fn from_properties(props: &Properties) -> Result<Option<Self>, PropertyError> {
        let Some(rate) = props.get(PUBLISH_RATE_PROP_NAME) else {
            return Ok(None);
        };
        let secs = match (rate.as_u64(), rate.as_i64()) {
            (Some(0), _) => return Err(PropertyError::NonPositiveRate(0)),
            (Some(secs), _) => secs,
            (None, Some(negative)) => return Err(PropertyError::NonPositiveRate(negative)),
            _ => return Err(invalid(PUBLISH_RATE_PROP_NAME, "an integer", rate)),
        };

        let topic = match props.get(PUBLISH_TOPIC_PROP_NAME) {
            None => DEFAULT_TOPIC.to_string(),
            Some(Value::String(topic)) => topic.clone(),
            Some(other) => return Err(invalid(PUBLISH_TOPIC_PROP_NAME, "a string", other)),
        };

        let qos = match props.get(PUBLISH_QOS_PROP_NAME) {
            None => 0,
            Some(value) => {
                let qos = value
                    .as_u64()
                    .ok_or_else(|| invalid(PUBLISH_QOS_PROP_NAME, "an integer", value))?;
                if qos > MAX_QOS {
                    return Err(PropertyError::InvalidQos(qos));
                }
                qos as u8
            }
        };

        let retain = match props.get(PUBLISH_RETAIN_PROP_NAME) {
            None => false,
            Some(Value::Bool(retain)) => *retain,
            Some(other) => return Err(invalid(PUBLISH_RETAIN_PROP_NAME, "a boolean", other)),
        };

        Ok(Some(Self {
            rate: Duration::from_secs(secs),
            topic,
            qos,
            retain,
        }))
    }
}

fn invalid(key: &'static str, expected: &'static str, found: &Value) -> PropertyError {
    PropertyError::InvalidType {
        key,
        expected,
        found: found.clone(),
    }
}
