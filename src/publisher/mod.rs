//! The `publisher` module is the component itself: the configuration
//! snapshot, the fixed-rate schedule, and the publish cycle it drives.

pub mod component;
pub mod cycle;
pub mod options;
pub mod scheduler;

pub use component::{APP_ID, TemperaturePublisher};
pub use cycle::{PUBLISH_PRIORITY, PublishCycle, build_payload};
pub use options::{Properties, PublishOptions};
pub use scheduler::FixedRateTask;

#[cfg(test)]
mod tests;
