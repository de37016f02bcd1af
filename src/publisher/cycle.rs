use std::sync::Arc;

use tracing::{debug, error, info};

use super::options::PublishOptions;
use crate::cloud::CloudClient;
use crate::sensor::{SensorReading, SensorSource};

/// Priority handed to the cloud client with every reading.
pub const PUBLISH_PRIORITY: u8 = 1;

/// One read-format-publish pass. Failures end the pass and are only logged.
#[derive(Clone)]
pub struct PublishCycle {
    sensors: Arc<dyn SensorSource>,
    client: Arc<dyn CloudClient>,
    options: Arc<PublishOptions>,
}

impl PublishCycle {
    pub fn new(
        sensors: Arc<dyn SensorSource>,
        client: Arc<dyn CloudClient>,
        options: Arc<PublishOptions>,
    ) -> Self {
        Self {
            sensors,
            client,
            options,
        }
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    pub async fn run(&self) {
        let PublishOptions {
            topic, qos, retain, ..
        } = self.options.as_ref();
        info!("topic: {}, qos: {}, retain: {}", topic, qos, retain);

        let readings = match self.sensors.list_sensors().await {
            Ok(readings) => readings,
            Err(e) => {
                error!("Cannot read sensors: {}", e);
                return;
            }
        };

        let payload = build_payload(&readings);
        if payload.is_empty() {
            debug!("No sensors available, skipping publish");
            return;
        }

        match self
            .client
            .publish(topic, payload.clone().into_bytes(), *qos, *retain, PUBLISH_PRIORITY)
            .await
        {
            Ok(message_id) => info!("Published to {} message {}: {}", topic, message_id, payload),
            Err(e) => error!("Cannot publish topic: {}: {}", topic, e),
        }
    }
}

/// Concatenates the reading segments in source order, with no separator.
pub fn build_payload(readings: &[SensorReading]) -> String {
    readings.iter().map(ToString::to_string).collect()
}
