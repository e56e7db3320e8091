use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::mqtt::config::MqttConfig;

pub const CONFIG_PATH_ENV: &str = "FACEGATE_CONFIG";
const CONFIG_DIR: &str = ".config/facegate";
const CONFIG_FILE: &str = "gateway.toml";

const ENV_BROKER_URL: &str = "MQTT_BROKER_URL";
const ENV_USERNAME: &str = "MQTT_USERNAME";
const ENV_PASSWORD: &str = "MQTT_PASSWORD";
const ENV_CLIENT_ID: &str = "MQTT_CLIENT_ID";
const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    pub mqtt: MqttConfig,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `facegate=debug,rumqttc=warn`. `RUST_LOG` wins.
    pub level: String,
    pub pretty: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            pretty: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub event_log_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            event_log_capacity: 1000,
        }
    }
}

/// `$FACEGATE_CONFIG`, else `~/.config/facegate/gateway.toml`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

impl GatewayConfig {
    /// File first, then the process environment on top.
    pub async fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) => Self::load_from(&path).await?,
            None => {
                warn!("No home directory, using default configuration");
                GatewayConfig::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// A missing file gives the defaults; a file that does not parse is an error.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check config file {}: {}", path.display(), e))?
        {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(GatewayConfig::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config: GatewayConfig = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BROKER_URL) {
            debug!(broker_url = %url, "Broker URL from environment");
            self.mqtt.broker_url = url;
        }
        if let Some(username) = lookup(ENV_USERNAME) {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.mqtt.password = Some(password);
        }
        if let Some(client_id) = lookup(ENV_CLIENT_ID) {
            self.mqtt.client_id = client_id;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
    }
}
