//! The `error` module defines the error types used within `tempsensor`.
//!
//! Steady-state failures (`SensorError`, `CloudError` during publish) are
//! contained inside a single publish cycle and only show up in logs.
//! `ComponentError` is what the lifecycle hooks hand back to the host.

use std::io;

use thiserror::Error;

/// A property value that cannot be turned into publish options.
#[derive(Debug, Error)]
pub enum PropertyError {
    #[error("property `{key}` must be {expected}, got {found}")]
    InvalidType {
        key: &'static str,
        expected: &'static str,
        found: serde_json::Value,
    },

    #[error("property `publish.rate` must be a positive number of seconds, got {0}")]
    NonPositiveRate(i64),

    #[error("property `publish.qos` must be 0, 1 or 2, got {0}")]
    InvalidQos(u64),
}

/// Failure while enumerating or reading sensors.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("sensor {id} returned malformed data: {reason}")]
    Malformed { id: String, reason: String },
}

/// Failure of the cloud collaborator.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("connection to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("authentication rejected: {0}")]
    Rejected(String),

    #[error("connection closed during handshake")]
    HandshakeClosed,

    #[error("cloud client is not connected")]
    NotConnected,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
}

/// Errors surfaced to the host by the component lifecycle.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("error during component activation: {0}")]
    Activation(#[source] Box<ComponentError>),

    #[error("cannot acquire cloud client: {0}")]
    Cloud(#[from] CloudError),

    #[error("invalid configuration: {0}")]
    Property(#[from] PropertyError),

    #[error("component has not been activated")]
    NotActive,

    #[error("component has been deactivated")]
    Stopped,
}
