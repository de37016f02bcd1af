//! The `cloud` module is the publish side of the component.
//!
//! It defines the capabilities consumed from the cloud collaborator
//! (`CloudService`, `CloudClient`, `CloudClientListener`) and a WebSocket
//! implementation talking JSON frames to a pub/sub broker.

pub mod client;
pub mod message;
pub mod websocket;

pub use client::{CloudClient, CloudClientListener, CloudService};
pub use websocket::{WebSocketCloudClient, WebSocketCloudService};
