use std::sync::Arc;

use async_trait::async_trait;

use crate::utils::error::CloudError;

/// Hands out per-application clients bound to the broker connection.
#[async_trait]
pub trait CloudService: Send + Sync {
    async fn new_cloud_client(&self, app_id: &str) -> Result<Arc<dyn CloudClient>, CloudError>;
}

/// Publish capability of a single application.
#[async_trait]
pub trait CloudClient: Send + Sync {
    fn app_id(&self) -> &str;

    /// Publishes `payload` on the application topic and returns the message id.
    async fn publish(
        &self,
        app_topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> Result<u32, CloudError>;

    fn add_cloud_client_listener(&self, listener: Arc<dyn CloudClientListener>);

    fn remove_cloud_client_listener(&self, listener: &Arc<dyn CloudClientListener>);

    /// Drops listeners and closes the connection. Later publishes fail.
    async fn release(&self);
}

/// Connection and message notifications delivered by a `CloudClient`.
pub trait CloudClientListener: Send + Sync {
    fn on_control_message_arrived(
        &self,
        device_id: &str,
        app_topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    );

    fn on_message_arrived(
        &self,
        device_id: &str,
        app_topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    );

    fn on_connection_lost(&self);

    fn on_connection_established(&self);

    fn on_message_confirmed(&self, message_id: u32, app_topic: &str);

    fn on_message_published(&self, message_id: u32, app_topic: &str);
}
