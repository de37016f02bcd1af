//! 1-Wire temperature probes exposed by the Linux `w1` sysfs driver.
//!
//! Each probe shows up as `<devices>/<family>-<serial>/w1_slave`:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::{SensorReading, SensorSource};
use crate::utils::error::SensorError;

pub const DEFAULT_DEVICES_PATH: &str = "/sys/bus/w1/devices";

/// Family codes of the DS18x20-style thermometers.
const TEMPERATURE_FAMILIES: [&str; 5] = ["10", "22", "28", "3b", "42"];

const QUANTITY: &str = "Temperature";
const UNIT: &str = "°C";

#[derive(Debug, Clone)]
pub struct W1SensorSource {
    devices: PathBuf,
}

impl W1SensorSource {
    pub fn new(devices: impl Into<PathBuf>) -> Self {
        Self {
            devices: devices.into(),
        }
    }

    pub fn devices_path(&self) -> &Path {
        &self.devices
    }

    async fn read_probe(&self, id: &str) -> Result<SensorReading, SensorError> {
        let path = self.devices.join(id).join("w1_slave");
        let raw = fs::read_to_string(&path).await?;
        let celsius = parse_w1_slave(id, &raw)?;
        Ok(SensorReading::new(id, QUANTITY, celsius, UNIT))
    }
}

impl Default for W1SensorSource {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICES_PATH)
    }
}

#[async_trait]
impl SensorSource for W1SensorSource {
    async fn list_sensors(&self) -> Result<Vec<SensorReading>, SensorError> {
        let mut entries = fs::read_dir(&self.devices).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_temperature_probe(&name) {
                ids.push(name);
            } else {
                debug!("Skipping 1-Wire device {}", name);
            }
        }
        ids.sort();

        let mut readings = Vec::with_capacity(ids.len());
        for id in ids {
            readings.push(self.read_probe(&id).await?);
        }
        Ok(readings)
    }
}

fn is_temperature_probe(name: &str) -> bool {
    match name.split_once('-') {
        Some((family, serial)) => {
            !serial.is_empty() && TEMPERATURE_FAMILIES.contains(&family.to_lowercase().as_str())
        }
        None => false,
    }
}

/// Parses the two-line `w1_slave` report into degrees Celsius.
pub(crate) fn parse_w1_slave(id: &str, raw: &str) -> Result<f64, SensorError> {
    let malformed = |reason: &str| SensorError::Malformed {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let mut lines = raw.lines();
    let crc_line = lines.next().ok_or_else(|| malformed("empty report"))?;
    if !crc_line.trim_end().ends_with("YES") {
        warn!("CRC check failed for sensor {}", id);
        return Err(malformed("crc check failed"));
    }

    let data_line = lines.next().ok_or_else(|| malformed("missing data line"))?;
    let (_, millis) = data_line
        .rsplit_once("t=")
        .ok_or_else(|| malformed("missing t= field"))?;
    let millis: i64 = millis
        .trim()
        .parse()
        .map_err(|_| malformed("t= is not an integer"))?;

    Ok(millis as f64 / 1000.0)
}
