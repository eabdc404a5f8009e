//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/ci-events/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/ci-events/` (~/.config/ci-events/)
//! - State/Logs: `$XDG_STATE_HOME/ci-events/` (~/.local/state/ci-events/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "ci-events";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Collector server and CI instance identity
    #[serde(default)]
    pub server: ServerConfig,

    /// Delivery loop tuning
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Collector endpoint and the identity of the reporting CI server
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Collector base URL (e.g., `https://octane.example.com`)
    pub url: Option<String>,

    /// Shared space the events are filed under
    #[serde(default = "default_shared_space")]
    pub shared_space: String,

    /// Stable identifier of this CI server instance
    pub instance_id: Option<String>,

    /// Kind of CI server reporting the events (jenkins, teamcity, ...)
    #[serde(default = "default_server_type")]
    pub server_type: String,

    /// Version of the reporting CI server
    #[serde(default = "default_server_version")]
    pub version: String,

    /// URL the CI server itself is reachable at, if different from the collector
    pub self_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: None,
            shared_space: default_shared_space(),
            instance_id: None,
            server_type: default_server_type(),
            version: default_server_version(),
            self_url: None,
        }
    }
}

impl ServerConfig {
    /// Check if the collector endpoint is configured
    pub fn is_ready(&self) -> bool {
        self.url.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self.url.as_deref().ok_or_else(|| {
            Error::Config("server.url is required to deliver events".to_string())
        })?;
        reqwest::Url::parse(url)
            .map_err(|e| Error::Config(format!("server.url is not a valid URL: {}", e)))?;
        if self.shared_space.trim().is_empty() {
            return Err(Error::Config(
                "server.shared_space must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_shared_space() -> String {
    "1001".to_string()
}

fn default_server_type() -> String {
    "custom".to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Delivery loop configuration
///
/// Every pause the worker takes is derived from these values.
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Pause between delivery cycles in milliseconds
    #[serde(default = "default_send_interval")]
    pub send_interval_ms: u64,

    /// First backoff pause after a rejected send, doubled on every retry
    #[serde(default = "default_initial_retry_pause")]
    pub initial_retry_pause_ms: u64,

    /// Consecutive failed sends before the pending events are dropped
    #[serde(default = "default_max_send_retries")]
    pub max_send_retries: u32,

    /// Cooldown after a failed campaign, in seconds
    #[serde(default = "default_suspend_interval")]
    pub suspend_interval_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_interval_ms: default_send_interval(),
            initial_retry_pause_ms: default_initial_retry_pause(),
            max_send_retries: default_max_send_retries(),
            suspend_interval_secs: default_suspend_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl DeliveryConfig {
    /// Pause between delivery cycles
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    /// First backoff pause of a campaign
    pub fn initial_retry_pause(&self) -> Duration {
        Duration::from_millis(self.initial_retry_pause_ms)
    }

    /// Cooldown after a failed campaign
    pub fn suspend_interval(&self) -> Duration {
        Duration::from_secs(self.suspend_interval_secs)
    }

    /// HTTP request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.max_send_retries == 0 {
            return Err(Error::Config(
                "delivery.max_send_retries must be at least 1".to_string(),
            ));
        }
        if self.send_interval_ms == 0 {
            return Err(Error::Config(
                "delivery.send_interval_ms must be positive".to_string(),
            ));
        }
        if self.initial_retry_pause_ms == 0 {
            return Err(Error::Config(
                "delivery.initial_retry_pause_ms must be positive".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "delivery.request_timeout_secs must be positive".to_string(),
            ));
        }

        let limits = [
            ("send_interval_ms", self.send_interval_ms, MAX_PAUSE_MS),
            ("initial_retry_pause_ms", self.initial_retry_pause_ms, MAX_PAUSE_MS),
            ("suspend_interval_secs", self.suspend_interval_secs, MAX_SUSPEND_SECS),
            ("request_timeout_secs", self.request_timeout_secs, MAX_REQUEST_TIMEOUT_SECS),
        ];
        for (name, value, max) in limits {
            if value > max {
                return Err(Error::Config(format!(
                    "delivery.{} must be at most {} (got {})",
                    name, max, value
                )));
            }
        }
        Ok(())
    }
}

/// One hour, for the cycle pause and the first backoff pause
const MAX_PAUSE_MS: u64 = 60 * 60 * 1000;
/// One week
const MAX_SUSPEND_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 60 * 60;

fn default_send_interval() -> u64 {
    1373
}

fn default_initial_retry_pause() -> u64 {
    1739
}

fn default_max_send_retries() -> u32 {
    7
}

fn default_suspend_interval() -> u64 {
    20 * 60
}

fn default_request_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate every section needed to run the delivery worker
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.delivery.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/ci-events/config.toml` (~/.config/ci-events/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join(APP_DIR).join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/ci-events/` (~/.local/state/ci-events/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join(APP_DIR)
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("ci-events.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.server.url.is_none());
        assert!(!config.server.is_ready());
        assert_eq!(config.server.shared_space, "1001");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_delivery_config_defaults() {
        let config = DeliveryConfig::default();
        assert_eq!(config.send_interval(), Duration::from_millis(1373));
        assert_eq!(config.initial_retry_pause(), Duration::from_millis(1739));
        assert_eq!(config.max_send_retries, 7);
        assert_eq!(config.suspend_interval(), Duration::from_secs(1200));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
url = "https://octane.example.com"
shared_space = "2002"
instance_id = "ci-7"
server_type = "jenkins"

[delivery]
send_interval_ms = 500
max_send_retries = 3

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.server.url.as_deref(),
            Some("https://octane.example.com")
        );
        assert_eq!(config.server.shared_space, "2002");
        assert_eq!(config.server.server_type, "jenkins");
        assert_eq!(config.delivery.send_interval_ms, 500);
        assert_eq!(config.delivery.max_send_retries, 3);
        // Unset fields keep their defaults
        assert_eq!(config.delivery.initial_retry_pause_ms, 1739);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig::default();
        assert!(config.validate().is_err());

        let config = ServerConfig {
            url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            url: Some("http://localhost:8080".to_string()),
            shared_space: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            url: Some("http://localhost:8080".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delivery_config_validation() {
        let config = DeliveryConfig {
            max_send_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DeliveryConfig {
            send_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delivery_config_rejects_oversized_intervals() {
        let config = DeliveryConfig {
            suspend_interval_secs: u64::MAX,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("suspend_interval_secs"));

        let config = DeliveryConfig {
            initial_retry_pause_ms: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DeliveryConfig {
            suspend_interval_secs: MAX_SUSPEND_SECS,
            send_interval_ms: MAX_PAUSE_MS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nurl = \"http://127.0.0.1:9\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.server.is_ready());

        std::fs::write(&path, "[server\nurl = ").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
