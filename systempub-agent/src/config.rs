//! Configuration management
//!
//! Handles:
//! - YAML configuration file (every key optional)
//! - Command-line overrides
//! - MQTT password from systemd credentials

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/systempub.yaml";

/// Name of the credential file holding the MQTT password
pub const MQTT_CREDENTIAL: &str = "mqtt";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration file: {0}")]
    Malformed(#[from] serde_yaml::Error),
    #[error("failed to read credential {path}: {source}")]
    Credential {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// MQTT server location and credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttServer {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl fmt::Debug for MqttServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttServer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

impl Default for MqttServer {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            user: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Intervals {
    pub pools_secs: u64,
    pub units_secs: u64,
    pub units_unhealthy_secs: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            pools_secs: 20 * 60,
            units_secs: 10 * 60,
            units_unhealthy_secs: 60,
        }
    }
}

/// Application configuration, as read from the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemPubConfig {
    pub mqttserver: MqttServer,
    pub loglevel: LogLevel,
    pub intervals: Intervals,
    pub queue_capacity: usize,
    pub publish_timeout_secs: u64,
    pub retry_delay_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for SystemPubConfig {
    fn default() -> Self {
        Self {
            mqttserver: MqttServer::default(),
            loglevel: LogLevel::Info,
            intervals: Intervals::default(),
            queue_capacity: 32,
            publish_timeout_secs: 5,
            retry_delay_secs: 5,
            probe_timeout_secs: 60,
        }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub debug: bool,
}

impl SystemPubConfig {
    /// Read the configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config = Self::parse(&content)?;
        debug!(path = %path.display(), ?config, "Configuration loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(host) = overrides.host.as_ref().filter(|h| !h.is_empty()) {
            self.mqttserver.host = host.clone();
        }
        if let Some(port) = overrides.port.filter(|p| *p != 0) {
            self.mqttserver.port = port;
        }
        if overrides.debug {
            self.loglevel = LogLevel::Debug;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.intervals.pools_secs, "intervals.pools_secs"),
            (self.intervals.units_secs, "intervals.units_secs"),
            (self.intervals.units_unhealthy_secs, "intervals.units_unhealthy_secs"),
            (self.queue_capacity as u64, "queue_capacity"),
            (self.publish_timeout_secs, "publish_timeout_secs"),
            (self.probe_timeout_secs, "probe_timeout_secs"),
        ];
        match checks.iter().find(|(value, _)| *value == 0) {
            Some((_, key)) => Err(ConfigError::Invalid(format!("{key} must be greater than zero"))),
            None => Ok(()),
        }
    }

    pub fn pools_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.pools_secs)
    }

    pub fn units_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.units_secs)
    }

    pub fn units_unhealthy_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.units_unhealthy_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Load the MQTT password handed over by systemd (`LoadCredential=mqtt:...`).
/// `Ok(None)` when the service runs without credentials.
pub fn load_mqtt_password() -> Result<Option<String>, ConfigError> {
    let dir = std::env::var_os("CREDENTIALS_DIRECTORY").map(PathBuf::from);
    load_password_from(dir.as_deref())
}

pub fn load_password_from(credentials_dir: Option<&Path>) -> Result<Option<String>, ConfigError> {
    let Some(dir) = credentials_dir else {
        return Ok(None);
    };
    let path = dir.join(MQTT_CREDENTIAL);
    let password = std::fs::read_to_string(&path).map_err(|source| ConfigError::Credential { path, source })?;
    Ok(Some(password.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SystemPubConfig::default();
        assert_eq!(config.mqttserver.host, "localhost");
        assert_eq!(config.mqttserver.port, 1883);
        assert_eq!(config.loglevel, LogLevel::Info);
        assert_eq!(config.pools_interval(), Duration::from_secs(1200));
        assert_eq!(config.units_unhealthy_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_read_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "mqttserver:\n  host: 192.168.0.3\n  port: 1884\n  user: nas\nloglevel: warn\nintervals:\n  units_secs: 300\n"
        )
        .unwrap();

        let config = SystemPubConfig::load(file.path()).unwrap();
        assert_eq!(config.mqttserver.host, "192.168.0.3");
        assert_eq!(config.mqttserver.port, 1884);
        assert_eq!(config.mqttserver.user, "nas");
        assert_eq!(config.loglevel, LogLevel::Warn);
        assert_eq!(config.units_interval(), Duration::from_secs(300));
        // untouched keys keep their defaults
        assert_eq!(config.pools_interval(), Duration::from_secs(1200));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SystemPubConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, SystemPubConfig::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let result = SystemPubConfig::parse("mqttserver: [unterminated");
        assert!(matches!(result, Err(ConfigError::Malformed(_))));
        let result = SystemPubConfig::parse("loglevel: chatty");
        assert!(matches!(result, Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = SystemPubConfig::parse("intervals:\n  pools_secs: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_overrides() {
        let mut config = SystemPubConfig::default();
        config.apply(&Overrides {
            host: Some("broker.lan".into()),
            port: None,
            debug: true,
        });
        assert_eq!(config.mqttserver.host, "broker.lan");
        assert_eq!(config.mqttserver.port, 1883);
        assert_eq!(config.loglevel, LogLevel::Debug);
    }

    #[test]
    fn test_debug_redacts_password() {
        let server = MqttServer {
            password: "hunter2".into(),
            ..MqttServer::default()
        };
        let printed = format!("{server:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("***"));
    }

    #[test]
    fn test_password_without_credentials_dir() {
        assert_eq!(load_password_from(None).unwrap(), None);
    }

    #[test]
    fn test_password_from_credentials_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MQTT_CREDENTIAL), "secret\n").unwrap();
        assert_eq!(load_password_from(Some(dir.path())).unwrap(), Some("secret".to_string()));
    }

    #[test]
    fn test_password_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_password_from(Some(dir.path())),
            Err(ConfigError::Credential { .. })
        ));
    }
}
