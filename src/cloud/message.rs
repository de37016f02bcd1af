use serde::{Deserialize, Serialize};

/// Frames sent by this device to the broker.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "login")]
    Login { username: String, password: String },
    #[serde(rename = "auth")]
    Auth { token: String },
    #[serde(rename = "publish")]
    Publish {
        topic: String,
        payload: String,
        message_id: Option<String>,
        qos: Option<u8>,
        #[serde(default)]
        retain: bool,
        #[serde(default)]
        priority: u8,
        timestamp: i64,
    },
}

/// Frames the broker sends back.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "login_response")]
    LoginResponse { token: String },
    #[serde(rename = "authenticated")]
    Authenticated {},
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "ack")]
    Ack { message_id: String },
    #[serde(rename = "message")]
    Message {
        topic: String,
        payload: String,
        timestamp: i64,
        message_id: String,
        qos: u8,
        #[serde(default)]
        retain: bool,
    },
}
