//! # tempsensor
//!
//! `tempsensor` periodically reads the attached temperature probes and
//! publishes one aggregated reading to a cloud broker at a configurable rate.
//!
//! ## Core Modules
//!
//! - `publisher`: The component itself: configuration handling, the fixed-rate schedule and the publish cycle.
//! - `sensor`: The sensor source capability and the 1-Wire sysfs implementation.
//! - `cloud`: The publish capability and its WebSocket implementation.
//! - `config`: Loads host settings and turns them into the component's property map.
//! - `utils`: Error types and logging setup.

pub mod cloud;
pub mod config;
pub mod publisher;
pub mod sensor;
pub mod utils;
