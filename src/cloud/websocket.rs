//! WebSocket cloud client
//!
//! Speaks the JSON pub/sub protocol of a popsub-style broker. Responsibilities:
//! - connect and, when credentials are configured, run the login -> auth handshake
//! - forward publish frames through a per-connection writer task
//! - dispatch broker frames (messages, acks) to the registered listeners
//! - report the connection state: `on_connection_established` when a listener
//!   joins a live connection, `on_connection_lost` when the stream ends
//!
//! Application topics are prefixed with `<client_id>/<app_id>/` on the wire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use super::message::{ClientMessage, ServerMessage};
use super::{CloudClient, CloudClientListener, CloudService};
use crate::config::CloudSettings;
use crate::utils::error::CloudError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONTROL_PREFIX: &str = "$control/";

/// Unacknowledged qos > 0 messages kept for confirmation; the oldest is evicted first.
pub(crate) const MAX_PENDING_ACKS: usize = 256;

#[derive(Debug, Clone)]
pub struct WebSocketCloudService {
    settings: CloudSettings,
}

impl WebSocketCloudService {
    pub fn new(settings: CloudSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl CloudService for WebSocketCloudService {
    async fn new_cloud_client(&self, app_id: &str) -> Result<Arc<dyn CloudClient>, CloudError> {
        let url = self.settings.url.as_str();
        info!("Connecting {} to {}", app_id, url);

        let (mut ws, _response) = connect_async(url)
            .await
            .map_err(|source| CloudError::Connect {
                url: url.to_string(),
                source,
            })?;

        if let (Some(username), Some(password)) =
            (&self.settings.username, &self.settings.password)
        {
            authenticate(&mut ws, username, password).await?;
            debug!("Authenticated as {}", username);
        }

        let client = WebSocketCloudClient::spawn(ws, &self.settings.client_id, app_id);
        Ok(Arc::new(client) as Arc<dyn CloudClient>)
    }
}

/// State shared between the client handle and its reader task.
struct Shared {
    client_id: String,
    app_id: String,
    connected: AtomicBool,
    next_message_id: AtomicU32,
    listeners: Mutex<Vec<Arc<dyn CloudClientListener>>>,
    // wire message id -> (local message id, app topic), for qos > 0
    pending: Mutex<HashMap<String, (u32, String)>>,
}

impl Shared {
    fn listeners(&self) -> Vec<Arc<dyn CloudClientListener>> {
        self.listeners.lock().unwrap().clone()
    }

    fn track(&self, wire_id: String, message_id: u32, app_topic: &str) {
        let mut pending = self.pending.lock().unwrap();
        if pending.len() >= MAX_PENDING_ACKS {
            let oldest = pending
                .iter()
                .min_by_key(|(_, (id, _))| *id)
                .map(|(wire_id, _)| wire_id.clone());
            if let Some(oldest) = oldest {
                warn!("No ACK for message {}, giving up on it", oldest);
                pending.remove(&oldest);
            }
        }
        pending.insert(wire_id, (message_id, app_topic.to_string()));
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::Ack { message_id }) => {
                let confirmed = self.pending.lock().unwrap().remove(&message_id);
                match confirmed {
                    Some((id, app_topic)) => {
                        for listener in self.listeners() {
                            listener.on_message_confirmed(id, &app_topic);
                        }
                    }
                    None => warn!("Received ACK for unknown message_id: {message_id}"),
                }
            }
            Ok(ServerMessage::Message {
                topic,
                payload,
                qos,
                retain,
                ..
            }) => self.deliver(&topic, payload.as_bytes(), qos, retain),
            Ok(ServerMessage::Error { message }) => warn!("Broker error: {message}"),
            Ok(other) => debug!("Ignoring frame {:?}", other),
            Err(err) => error!("Invalid broker message: {} | {}", err, text),
        }
    }

    fn deliver(&self, topic: &str, payload: &[u8], qos: u8, retain: bool) {
        let (control, topic) = match topic.strip_prefix(CONTROL_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, topic),
        };

        let mut parts = topic.splitn(3, '/');
        let (Some(device_id), Some(app_id), Some(app_topic)) =
            (parts.next(), parts.next(), parts.next())
        else {
            debug!("Dropping message on foreign topic {}", topic);
            return;
        };
        if app_id != self.app_id {
            return;
        }

        for listener in self.listeners() {
            if control {
                listener.on_control_message_arrived(device_id, app_topic, payload, qos, retain);
            } else {
                listener.on_message_arrived(device_id, app_topic, payload, qos, retain);
            }
        }
    }
}

pub struct WebSocketCloudClient {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketCloudClient {
    pub(crate) fn spawn(ws: WsStream, client_id: &str, app_id: &str) -> Self {
        let shared = Arc::new(Shared {
            client_id: client_id.to_string(),
            app_id: app_id.to_string(),
            connected: AtomicBool::new(true),
            next_message_id: AtomicU32::new(1),
            listeners: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
        });

        let (mut ws_sender, mut ws_receiver) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        let writer = {
            let shared = shared.clone();
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if let Err(e) = ws_sender.send(msg).await {
                        error!("Failed to send frame for {}: {}", shared.app_id, e);
                        shared.connected.store(false, Ordering::SeqCst);
                        return;
                    }
                }
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                let _ = ws_sender.close().await;
                debug!("Send loop closed for {}", shared.app_id);
            })
        };

        let reader = {
            let shared = shared.clone();
            tokio::spawn(async move {
                while let Some(frame) = ws_receiver.next().await {
                    match frame {
                        Ok(msg) if msg.is_text() => match msg.to_text() {
                            Ok(text) => shared.dispatch(text),
                            Err(e) => error!("Unreadable frame: {}", e),
                        },
                        Ok(msg) if msg.is_close() => break,
                        Ok(_) => {}
                        Err(e) => {
                            error!("Connection error for {}: {}", shared.app_id, e);
                            break;
                        }
                    }
                }

                shared.connected.store(false, Ordering::SeqCst);
                shared.pending.lock().unwrap().clear();
                info!("{} disconnected", shared.app_id);
                for listener in shared.listeners() {
                    listener.on_connection_lost();
                }
            })
        };

        Self {
            shared,
            sender: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst) && self.sender.lock().unwrap().is_some()
    }

    /// Number of qos > 0 messages still waiting for a broker ACK.
    pub fn pending_acks(&self) -> usize {
        self.shared.pending.lock().unwrap().len()
    }
}

#[async_trait]
impl CloudClient for WebSocketCloudClient {
    fn app_id(&self) -> &str {
        &self.shared.app_id
    }

    async fn publish(
        &self,
        app_topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> Result<u32, CloudError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(CloudError::NotConnected);
        }
        let sender = self
            .sender
            .lock()
            .unwrap()
            .clone()
            .ok_or(CloudError::NotConnected)?;

        let message_id = self.shared.next_message_id.fetch_add(1, Ordering::SeqCst);
        let wire_id = Uuid::new_v4().to_string();
        let frame = ClientMessage::Publish {
            topic: format!(
                "{}/{}/{}",
                self.shared.client_id, self.shared.app_id, app_topic
            ),
            payload: String::from_utf8_lossy(&payload).into_owned(),
            message_id: Some(wire_id.clone()),
            qos: Some(qos),
            retain,
            priority,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let text = serde_json::to_string(&frame)?;

        if qos > 0 {
            self.shared.track(wire_id.clone(), message_id, app_topic);
        }

        if sender.send(WsMessage::text(text)).is_err() {
            self.shared.pending.lock().unwrap().remove(&wire_id);
            return Err(CloudError::NotConnected);
        }

        for listener in self.shared.listeners() {
            listener.on_message_published(message_id, app_topic);
        }
        Ok(message_id)
    }

    fn add_cloud_client_listener(&self, listener: Arc<dyn CloudClientListener>) {
        self.shared.listeners.lock().unwrap().push(listener.clone());
        if self.is_connected() {
            listener.on_connection_established();
        }
    }

    fn remove_cloud_client_listener(&self, listener: &Arc<dyn CloudClientListener>) {
        self.shared
            .listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    async fn release(&self) {
        info!("Releasing cloud client for {}", self.shared.app_id);
        self.shared.listeners.lock().unwrap().clear();
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.pending.lock().unwrap().clear();

        // Dropping the sender lets the writer flush queued frames and close.
        drop(self.sender.lock().unwrap().take());
        let writer = self.writer.lock().unwrap().take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
        if let Some(reader) = self.reader.lock().unwrap().take() {
            reader.abort();
        }
    }
}

impl Drop for WebSocketCloudClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().unwrap().take() {
            reader.abort();
        }
    }
}

async fn authenticate(ws: &mut WsStream, username: &str, password: &str) -> Result<(), CloudError> {
    let login = ClientMessage::Login {
        username: username.to_string(),
        password: password.to_string(),
    };
    ws.send(WsMessage::text(serde_json::to_string(&login)?))
        .await?;

    let token = match next_server_message(ws).await? {
        ServerMessage::LoginResponse { token } => token,
        ServerMessage::Error { message } => return Err(CloudError::Rejected(message)),
        other => return Err(CloudError::Rejected(format!("unexpected reply {other:?}"))),
    };

    let auth = ClientMessage::Auth { token };
    ws.send(WsMessage::text(serde_json::to_string(&auth)?))
        .await?;

    match next_server_message(ws).await? {
        ServerMessage::Authenticated {} => Ok(()),
        ServerMessage::Error { message } => Err(CloudError::Rejected(message)),
        other => Err(CloudError::Rejected(format!("unexpected reply {other:?}"))),
    }
}

async fn next_server_message(ws: &mut WsStream) -> Result<ServerMessage, CloudError> {
    while let Some(frame) = ws.next().await {
        let frame = frame?;
        if frame.is_text() {
            return Ok(serde_json::from_str(frame.to_text()?)?);
        }
        if frame.is_close() {
            break;
        }
    }
    Err(CloudError::HandshakeClosed)
}
