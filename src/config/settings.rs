use serde::Deserialize;

/// Top-level configuration settings for the host process.
///
/// `publish` is handed to the component as a property map; the other
/// sections wire up logging and the collaborators.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub logger: LoggerSettings,
    pub cloud: CloudSettings,
    pub sensors: SensorSettings,
    pub publish: PublishSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggerSettings {
    pub level: String,
}

/// Where the broker lives and how this device identifies itself.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CloudSettings {
    pub url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SensorSettings {
    pub devices_path: String,
}

/// Publishing parameters. A missing `rate` means "do not schedule".
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PublishSettings {
    pub rate: Option<u64>,
    pub semantic_topic: String,
    pub qos: u8,
    pub retain: bool,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub logger: Option<PartialLoggerSettings>,
    pub cloud: Option<PartialCloudSettings>,
    pub sensors: Option<PartialSensorSettings>,
    pub publish: Option<PartialPublishSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggerSettings {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialCloudSettings {
    pub url: Option<String>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSensorSettings {
    pub devices_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialPublishSettings {
    pub rate: Option<u64>,
    pub semantic_topic: Option<String>,
    pub qos: Option<u8>,
    pub retain: Option<bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logger: LoggerSettings {
                level: "info".to_string(),
            },
            cloud: CloudSettings {
                url: "ws://127.0.0.1:8080".to_string(),
                client_id: "tempsensor".to_string(),
                username: None,
                password: None,
            },
            sensors: SensorSettings {
                devices_path: crate::sensor::w1::DEFAULT_DEVICES_PATH.to_string(),
            },
            publish: PublishSettings {
                rate: None,
                semantic_topic: "data".to_string(),
                qos: 0,
                retain: false,
            },
        }
    }
}
