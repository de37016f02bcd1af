mod settings;

use std::collections::BTreeMap;
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde_json::Value;

use crate::publisher::options::{
    PUBLISH_QOS_PROP_NAME, PUBLISH_RATE_PROP_NAME, PUBLISH_RETAIN_PROP_NAME,
    PUBLISH_TOPIC_PROP_NAME, Properties,
};
use settings::PartialSettings;

pub use settings::{CloudSettings, LoggerSettings, PublishSettings, SensorSettings, Settings};

/// Environment variables look like `TEMPSENSOR_PUBLISH__RATE=10`.
const ENV_PREFIX: &str = "TEMPSENSOR";

/// Loads the configuration from `config/default` and `TEMPSENSOR_*` variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Like `load_config`, reading the file source from `path` (extension optional).
/// The file is not required; anything it omits falls back to defaults.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(&path.as_ref().to_string_lossy()).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let logger = partial.logger;
    let cloud = partial.cloud;
    let sensors = partial.sensors;
    let publish = partial.publish;

    Settings {
        logger: LoggerSettings {
            level: logger
                .and_then(|l| l.level)
                .unwrap_or(default.logger.level),
        },
        cloud: match cloud {
            Some(c) => CloudSettings {
                url: c.url.unwrap_or(default.cloud.url),
                client_id: c.client_id.unwrap_or(default.cloud.client_id),
                username: c.username.or(default.cloud.username),
                password: c.password.or(default.cloud.password),
            },
            None => default.cloud,
        },
        sensors: SensorSettings {
            devices_path: sensors
                .and_then(|s| s.devices_path)
                .unwrap_or(default.sensors.devices_path),
        },
        publish: match publish {
            Some(p) => PublishSettings {
                rate: p.rate.or(default.publish.rate),
                semantic_topic: p.semantic_topic.unwrap_or(default.publish.semantic_topic),
                qos: p.qos.unwrap_or(default.publish.qos),
                retain: p.retain.unwrap_or(default.publish.retain),
            },
            None => default.publish,
        },
    }
}

impl Settings {
    /// The property map handed to the component on activation and update.
    pub fn to_properties(&self) -> Properties {
        let mut props = BTreeMap::new();
        if let Some(rate) = self.publish.rate {
            props.insert(PUBLISH_RATE_PROP_NAME.to_string(), Value::from(rate));
        }
        props.insert(
            PUBLISH_TOPIC_PROP_NAME.to_string(),
            Value::from(self.publish.semantic_topic.clone()),
        );
        props.insert(PUBLISH_QOS_PROP_NAME.to_string(), Value::from(self.publish.qos));
        props.insert(
            PUBLISH_RETAIN_PROP_NAME.to_string(),
            Value::from(self.publish.retain),
        );
        Properties::from(props)
    }
}
