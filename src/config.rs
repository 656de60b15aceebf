//! Relay configuration
//!
//! Loaded from a TOML file. Secrets (broker credentials, the wireless
//! passphrase) are never stored in the file; the file names the environment
//! variables that hold them and they are resolved when a connection is made.

use crate::codec;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Largest MQTT message either broker link accepts
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65535;

/// Longest topic name accepted for either broker
pub const MAX_TOPIC_LENGTH: usize = 1024;

/// Main relay configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    /// Broker on the wired network the telemetry is read from
    pub local: BrokerSection,
    /// Broker on the wireless network the telemetry is forwarded to
    pub remote: BrokerSection,
    #[serde(default)]
    pub wired: WiredSection,
    #[serde(default)]
    pub wireless: WirelessSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub relay: RelaySection,
}

/// Connection settings for one broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Client identifier presented in the CONNECT packet
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password or access token
    pub password_env: Option<String>,
    /// Topic subscribed on the local broker, published on the remote broker
    pub topic: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_client_id() -> String {
    "dualnet-relay".to_string()
}

fn default_keep_alive() -> u64 {
    15
}

impl BrokerSection {
    /// Username and password resolved from the environment
    ///
    /// Returns None when no username variable is configured or it is unset.
    /// A missing password variable yields an empty password.
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self
            .username_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())?;
        let password = self
            .password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_default();
        Some((username, password))
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        let url = Url::parse(&self.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?;
        if !matches!(url.scheme(), "mqtt" | "mqtts" | "tcp") || url.host_str().is_none() {
            return Err(ConfigError::InvalidBrokerUrl(self.broker_url.clone()));
        }
        if self.topic.is_empty() || self.topic.contains(|c: char| c == '+' || c == '#') {
            return Err(ConfigError::InvalidConfig(format!(
                "[{section}] topic must be a non-empty topic name without wildcards"
            )));
        }
        if self.topic.len() > MAX_TOPIC_LENGTH {
            return Err(ConfigError::InvalidConfig(format!(
                "[{section}] topic must be at most {MAX_TOPIC_LENGTH} bytes"
            )));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "[{section}] client_id must not be empty"
            )));
        }
        Ok(())
    }
}

/// Static identity of the wired interface
///
/// Bring-up of the interface is done by the operating system; these values are
/// validated and reported so a misconfigured node is visible in the logs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WiredSection {
    /// Interface name, e.g. "eth0". Without it the link is assumed up.
    pub interface: Option<String>,
    /// Link-layer address, colon separated
    pub mac: Option<String>,
    pub address: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub subnet: Option<Ipv4Addr>,
    pub dns: Option<Ipv4Addr>,
}

impl WiredSection {
    /// Parse the configured MAC address
    pub fn mac_bytes(&self) -> Result<Option<[u8; 6]>, ConfigError> {
        let Some(mac) = &self.mac else {
            return Ok(None);
        };
        let bytes = codec::decode(&mac.replace(|c: char| c == ':' || c == '-', ""))
            .map_err(|_| ConfigError::InvalidMac(mac.clone()))?;
        <[u8; 6]>::try_from(bytes.as_slice())
            .map(Some)
            .map_err(|_| ConfigError::InvalidMac(mac.clone()))
    }
}

/// Wireless association settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WirelessSection {
    /// Interface name, e.g. "wlan0". Without it the link is assumed up.
    pub interface: Option<String>,
    pub ssid: Option<String>,
    /// Environment variable containing the passphrase
    pub passphrase_env: Option<String>,
    /// Command run to (re)associate; `{interface}`, `{ssid}` and
    /// `{passphrase}` are substituted in each argument
    #[serde(default)]
    pub associate_command: Vec<String>,
    /// Fixed delay between association attempts
    #[serde(default = "default_link_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_link_retry_delay() -> u64 {
    1000
}

impl Default for WirelessSection {
    fn default() -> Self {
        Self {
            interface: None,
            ssid: None,
            passphrase_env: None,
            associate_command: Vec::new(),
            retry_delay_ms: default_link_retry_delay(),
        }
    }
}

impl WirelessSection {
    /// Passphrase resolved from the environment
    pub fn passphrase(&self) -> Option<String> {
        self.passphrase_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }
}

/// Persistent log settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    /// Append log location on the mounted card
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// Rebuild the fallback slot from the log at startup
    #[serde(default = "default_true")]
    pub restore_on_start: bool,
}

fn default_log_path() -> PathBuf {
    PathBuf::from("/sdcard/datalogger.csv")
}

fn default_true() -> bool {
    true
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            restore_on_start: true,
        }
    }
}

/// Timing and sizing of the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySection {
    /// Period of the retry loop
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    /// Fixed delay between broker connect attempts
    #[serde(default = "default_broker_retry_delay")]
    pub broker_retry_delay_ms: u64,
    /// How long one connect attempt waits for the broker's CONNACK
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_retry_interval() -> u64 {
    5
}

fn default_broker_retry_delay() -> u64 {
    2000
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval(),
            broker_retry_delay_ms: default_broker_retry_delay(),
            connect_timeout_secs: default_connect_timeout(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl RelaySection {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn broker_retry_delay(&self) -> Duration {
        Duration::from_millis(self.broker_retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.local.validate("local")?;
        self.remote.validate("remote")?;
        self.wired.mac_bytes()?;

        if self.wireless.interface.is_some() && self.wireless.ssid.is_none() {
            return Err(ConfigError::InvalidConfig(
                "[wireless] interface requires an ssid".to_string(),
            ));
        }
        if self.relay.retry_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "[relay] retry_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.relay.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "[relay] connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.relay.max_message_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "[relay] max_message_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Minimal configuration for tests
    pub fn test_config() -> Self {
        let toml_content = r#"
[local]
broker_url = "mqtt://localhost:1883"
topic = "v3/datalogger/devices/eui-a84041446184392f/up"

[remote]
broker_url = "mqtt://localhost:1884"
topic = "eui-a84041446184392f/up"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}
