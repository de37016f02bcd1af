//! Temperature publisher component
//!
//! Driven entirely by the host: `activate` on start, `updated` on every new
//! configuration, `deactivate` on shutdown. Each configuration replaces the
//! running schedule:
//! - the property snapshot is swapped as a whole
//! - the previous schedule is cancelled and awaited before anything else runs
//! - a missing `publish.rate` leaves the component idle
//! - otherwise a fixed-rate task runs one `PublishCycle` per tick

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::cycle::PublishCycle;
use super::options::{PUBLISH_RATE_PROP_NAME, Properties, PublishOptions};
use super::scheduler::FixedRateTask;
use crate::cloud::{CloudClient, CloudClientListener, CloudService};
use crate::sensor::SensorSource;
use crate::utils::error::ComponentError;

pub const APP_ID: &str = "TemperatureSensor";

pub struct TemperaturePublisher {
    cloud_service: Arc<dyn CloudService>,
    sensors: Arc<dyn SensorSource>,
    cloud_client: Mutex<Option<Arc<dyn CloudClient>>>,
    properties: Mutex<Option<Arc<Properties>>>,
    options: Mutex<Option<Arc<PublishOptions>>>,
    // at most one live schedule
    schedule: tokio::sync::Mutex<Option<FixedRateTask>>,
    stopped: AtomicBool,
}

impl TemperaturePublisher {
    pub fn new(cloud_service: Arc<dyn CloudService>, sensors: Arc<dyn SensorSource>) -> Self {
        Self {
            cloud_service,
            sensors,
            cloud_client: Mutex::new(None),
            properties: Mutex::new(None),
            options: Mutex::new(None),
            schedule: tokio::sync::Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Acquires the cloud client, registers for its callbacks and applies the
    /// initial configuration. Any failure aborts activation.
    pub async fn activate(self: &Arc<Self>, properties: Properties) -> Result<(), ComponentError> {
        info!("Activating Temp Sensor...");
        log_properties("Activate", &properties);

        if let Err(e) = self.connect_and_apply(properties).await {
            error!("Error during component activation: {}", e);
            let client = self.cloud_client.lock().unwrap().take();
            if let Some(client) = client {
                client.release().await;
            }
            return Err(ComponentError::Activation(Box::new(e)));
        }

        info!("Activating Temp Sensor... Done.");
        Ok(())
    }

    async fn connect_and_apply(self: &Arc<Self>, properties: Properties) -> Result<(), ComponentError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ComponentError::Stopped);
        }

        info!("Getting CloudClient for {}...", APP_ID);
        let client = self.cloud_service.new_cloud_client(APP_ID).await?;
        let listener: Arc<dyn CloudClientListener> = self.clone();
        client.add_cloud_client_listener(listener);
        *self.cloud_client.lock().unwrap() = Some(client);

        // inbound subscriptions are handled by the default ones, no resubscribe here
        self.apply(properties).await
    }

    /// Handles a configuration update from the host.
    pub async fn updated(&self, properties: Properties) -> Result<(), ComponentError> {
        info!("Updated Temp Sensor...");
        log_properties("Update", &properties);

        self.apply(properties).await?;
        info!("Updated Temp Sensor... Done.");
        Ok(())
    }

    /// Stores `properties` and restarts the publishing schedule from them.
    pub async fn apply(&self, properties: Properties) -> Result<(), ComponentError> {
        let properties = Arc::new(properties);
        let mut schedule = self.schedule.lock().await;

        if self.stopped.load(Ordering::SeqCst) {
            return Err(ComponentError::Stopped);
        }
        let client = self.client().ok_or(ComponentError::NotActive)?;

        *self.properties.lock().unwrap() = Some(properties.clone());

        if let Some(task) = schedule.take() {
            debug!("Cancelling schedule running every {:?}", task.period());
            task.cancel().await;
        }

        let options = match PublishOptions::from_properties(&properties) {
            Ok(Some(options)) => Arc::new(options),
            Ok(None) => {
                *self.options.lock().unwrap() = None;
                info!(
                    "Ignoring update as properties do not contain {}",
                    PUBLISH_RATE_PROP_NAME
                );
                return Ok(());
            }
            Err(e) => {
                *self.options.lock().unwrap() = None;
                error!("Rejecting configuration: {}", e);
                return Err(e.into());
            }
        };
        *self.options.lock().unwrap() = Some(options.clone());

        info!("Publishing to {} every {:?}", options.topic, options.rate);
        let cycle = PublishCycle::new(self.sensors.clone(), client, options.clone());
        *schedule = Some(FixedRateTask::spawn(options.rate, move || {
            let cycle = cycle.clone();
            async move { cycle.run().await }
        }));

        Ok(())
    }

    /// Runs one publish cycle right now against the current configuration.
    pub async fn publish_once(&self) {
        let Some(client) = self.client() else {
            warn!("Cannot publish before activation");
            return;
        };
        let Some(options) = self.options.lock().unwrap().clone() else {
            debug!("No publish options configured");
            return;
        };

        PublishCycle::new(self.sensors.clone(), client, options)
            .run()
            .await;
    }

    /// Cancels the schedule and releases the cloud client. No publish happens
    /// once this returns.
    pub async fn deactivate(&self) {
        debug!("Deactivating Temp Sensor...");
        self.stopped.store(true, Ordering::SeqCst);

        if let Some(task) = self.schedule.lock().await.take() {
            task.cancel().await;
        }

        let client = self.cloud_client.lock().unwrap().take();
        if let Some(client) = client {
            info!("Releasing CloudApplicationClient for {}...", APP_ID);
            client.release().await;
        }

        debug!("Deactivating Temp Sensor... Done.");
    }

    pub fn properties(&self) -> Option<Arc<Properties>> {
        self.properties.lock().unwrap().clone()
    }

    pub async fn is_scheduled(&self) -> bool {
        self.schedule
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub async fn schedule_period(&self) -> Option<Duration> {
        self.schedule.lock().await.as_ref().map(FixedRateTask::period)
    }

    fn client(&self) -> Option<Arc<dyn CloudClient>> {
        self.cloud_client.lock().unwrap().clone()
    }
}

/// Inbound traffic is not used by this component.
impl CloudClientListener for TemperaturePublisher {
    fn on_control_message_arrived(&self, _: &str, _: &str, _: &[u8], _: u8, _: bool) {}

    fn on_message_arrived(&self, _: &str, _: &str, _: &[u8], _: u8, _: bool) {}

    fn on_connection_lost(&self) {}

    fn on_connection_established(&self) {}

    fn on_message_confirmed(&self, _: u32, _: &str) {}

    fn on_message_published(&self, _: u32, _: &str) {}
}

fn log_properties(phase: &str, properties: &Properties) {
    for (key, value) in properties.iter() {
        info!("{} - {}: {}", phase, key, value);
    }
}
