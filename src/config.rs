// src/config.rs - Engine configuration
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

/// Where the box lives and how long a single request may take.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Hostname or address of the printer box, e.g. "10.0.0.42" or
    /// "wifibox.local".
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Tunables of the transmission and polling loops. The block-size limit and
/// buffer ceiling defaults match the firmware the engine was tuned against;
/// their exact origin is undocumented, which is why they are settings and
/// not constants.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Estimated-size bound for one g-code block.
    #[serde(default = "default_block_size_limit")]
    pub block_size_limit: usize,

    /// Maximum tolerated device-side buffered line count before transmission
    /// pauses.
    #[serde(default = "default_buffer_ceiling")]
    pub buffer_ceiling: u64,

    /// Delay before resending a failed or rejected block.
    #[serde(default = "default_send_retry_secs")]
    pub send_retry_secs: u64,

    /// Status poll cadence.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Hold-off after a failed status poll.
    #[serde(default = "default_poll_retry_secs")]
    pub poll_retry_secs: u64,

    /// Whether the heated-up latch clears on every idle transition (true) or
    /// only when a new print starts (false).
    #[serde(default = "default_reset_heated_on_idle")]
    pub reset_heated_on_idle: bool,
}

fn default_request_timeout_secs() -> u64 {
    30
}
fn default_block_size_limit() -> usize {
    7000
}
fn default_buffer_ceiling() -> u64 {
    35000
}
fn default_send_retry_secs() -> u64 {
    1
}
fn default_poll_interval_secs() -> u64 {
    1
}
fn default_poll_retry_secs() -> u64 {
    3
}
fn default_reset_heated_on_idle() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            block_size_limit: default_block_size_limit(),
            buffer_ceiling: default_buffer_ceiling(),
            send_retry_secs: default_send_retry_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_retry_secs: default_poll_retry_secs(),
            reset_heated_on_idle: default_reset_heated_on_idle(),
        }
    }
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TransportConfig {
    pub fn send_retry(&self) -> Duration {
        Duration::from_secs(self.send_retry_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_retry(&self) -> Duration {
        Duration::from_secs(self.poll_retry_secs)
    }
}

impl Config {
    pub fn parse_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.host.is_empty() {
            return Err(ConfigError::Invalid("device.host must be set".to_string()));
        }
        if self.transport.block_size_limit == 0 {
            return Err(ConfigError::Invalid(
                "transport.block_size_limit must be positive".to_string(),
            ));
        }
        if self.transport.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "transport.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.device.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "device.request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config = Config::parse_toml(&contents)?;
    tracing::info!("Loaded configuration from: {}", path);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_reference_tuning() {
        let config = Config::default();
        assert_eq!(config.transport.block_size_limit, 7000);
        assert_eq!(config.transport.buffer_ceiling, 35000);
        assert_eq!(config.transport.send_retry_secs, 1);
        assert_eq!(config.transport.poll_interval_secs, 1);
        assert_eq!(config.transport.poll_retry_secs, 3);
        assert!(config.transport.reset_heated_on_idle);
        assert_eq!(config.device.request_timeout_secs, 30);
    }

    #[test]
    fn parse_toml_config() {
        let toml_config = r#"
[device]
host = "10.0.0.42"
request_timeout_secs = 10

[transport]
block_size_limit = 4096
buffer_ceiling = 20000
reset_heated_on_idle = false
        "#;

        let config = Config::parse_toml(toml_config).unwrap();
        assert_eq!(config.device.host, "10.0.0.42");
        assert_eq!(config.device.request_timeout_secs, 10);
        assert_eq!(config.transport.block_size_limit, 4096);
        assert_eq!(config.transport.buffer_ceiling, 20000);
        assert!(!config.transport.reset_heated_on_idle);
        // Unspecified fields keep their defaults.
        assert_eq!(config.transport.poll_interval_secs, 1);
    }

    #[test]
    fn validation_requires_a_host() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.device.host = "wifibox.local".to_string();
        assert!(config.validate().is_ok());

        config.transport.block_size_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[device]\nhost = \"10.0.0.7\"").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.device.host, "10.0.0.7");
        assert_eq!(config.transport.buffer_ceiling, 35000);
    }

    #[test]
    fn load_config_missing_file_is_an_io_error() {
        let err = load_config("/nonexistent/wifibox.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
