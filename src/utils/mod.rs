//! The `utils` module provides the ambient pieces shared across `tempsensor`:
//! error types and logging setup.

pub mod error;
pub mod logging;

pub use error::{CloudError, ComponentError, PropertyError, SensorError};

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
    }
}
