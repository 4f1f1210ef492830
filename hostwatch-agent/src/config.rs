//! Configuration loading and validation
//!
//! Handles:
//! - MQTT broker settings and credentials (file, environment or OS keyring)
//! - Topic layout (state topic, discovery prefix, optional availability topic)
//! - Device identity shared by every discovered sensor
//! - Poll cadence and the monitored container / service names
//!
//! The configuration is read once at startup and never mutated afterwards.

use crate::error::ConfigError;
use keyring::Entry;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "HOSTWATCH_CONFIG";
/// Environment variable overriding the broker password
pub const PASSWORD_ENV: &str = "HOSTWATCH_MQTT_PASSWORD";

const KEYRING_SERVICE: &str = "hostwatch-agent";

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub containers: Vec<String>,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    pub device: DeviceConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub collectors: CollectorConfig,
}

#[derive(Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub broker_host: String,
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_from_keyring: bool,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

// Hand-written so the password never ends up in logs.
impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("broker_host", &self.broker_host)
            .field("broker_port", &self.broker_port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("password_from_keyring", &self.password_from_keyring)
            .field("client_id", &self.client_id)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_state_topic")]
    pub state: String,
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    #[serde(default)]
    pub availability: Option<String>,
}

/// Identity of the device every sensor is grouped under
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    #[serde(default = "default_model")]
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_unit")]
    pub unit: String,
    #[serde(default = "default_service_label")]
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_poll_interval() -> u64 { 15 }
fn default_broker_port() -> u16 { 1883 }
fn default_keep_alive() -> u64 { 60 }
fn default_retry_delay() -> u64 { 5 }
fn default_state_topic() -> String { "home/server/stats".to_string() }
fn default_discovery_prefix() -> String { "homeassistant".to_string() }
fn default_device_name() -> String { "Main Server".to_string() }
fn default_manufacturer() -> String { "Hostwatch".to_string() }
fn default_model() -> String { "Linux MQTT Monitor".to_string() }
fn default_service_unit() -> String { "jellyfin".to_string() }
fn default_service_label() -> String { "Jellyfin".to_string() }
fn default_command_timeout() -> u64 { 10 }

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            state: default_state_topic(),
            discovery_prefix: default_discovery_prefix(),
            availability: None,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            unit: default_service_unit(),
            label: default_service_label(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { command_timeout_secs: default_command_timeout() }
    }
}

impl AgentConfig {
    /// Load config from `$HOSTWATCH_CONFIG` or the OS-specific location
    pub async fn load() -> Result<Self, ConfigError> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Io { path: path.clone(), source })?;
        info!("Loading configuration from {}", path.display());

        let mut config = Self::from_toml_str(&content)?;
        config.resolve_password(std::env::var(PASSWORD_ENV).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without touching the environment or the keyring
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Get config file path, honouring the environment override
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("hostwatch");
        path.push("config.toml");
        Ok(path)
    }

    /// Environment first, then the file, then the keyring when enabled
    pub fn resolve_password(&mut self, from_env: Option<String>) -> Result<(), ConfigError> {
        if let Some(password) = from_env.filter(|p| !p.is_empty()) {
            debug!("Broker password taken from {}", PASSWORD_ENV);
            self.mqtt.password = Some(password);
            return Ok(());
        }

        if self.mqtt.password.is_none() && self.mqtt.password_from_keyring {
            self.mqtt.password = Some(Self::load_password(&self.mqtt.username)?);
            debug!("Broker password loaded from OS keyring");
        }
        Ok(())
    }

    /// Load password from secure OS keyring
    fn load_password(username: &str) -> Result<String, ConfigError> {
        let entry = Entry::new(KEYRING_SERVICE, username)
            .map_err(|e| ConfigError::Keyring(e.to_string()))?;
        entry.get_password().map_err(|e| ConfigError::Keyring(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker_host.trim().is_empty() {
            return Err(ConfigError::Missing("mqtt.broker_host"));
        }
        if self.mqtt.username.is_empty() {
            return Err(ConfigError::Missing("mqtt.username"));
        }
        if self.mqtt.password.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Missing("mqtt.password"));
        }
        if self.device.id.trim().is_empty() {
            return Err(ConfigError::Missing("device.id"));
        }
        // The id is a topic level and part of every unique id
        if self
            .device
            .id
            .chars()
            .any(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace())
        {
            return Err(ConfigError::Invalid {
                field: "device.id",
                reason: format!("`{}` must not contain '/', '+', '#' or whitespace", self.device.id),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid {
                field: "mqtt.keep_alive_secs",
                reason: "must be at least 5 seconds".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for name in &self.containers {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "containers",
                    reason: "container names cannot be empty".to_string(),
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::Invalid {
                    field: "containers",
                    reason: format!("container `{name}` is listed twice"),
                });
            }
        }
        Ok(())
    }

    /// Client id unique per host unless set explicitly
    pub fn client_id(&self) -> String {
        self.mqtt.client_id.clone().unwrap_or_else(|| {
            let hostname = gethostname::gethostname().to_string_lossy().to_string();
            format!("hostwatch-{hostname}")
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.collectors.command_timeout_secs)
    }
}
