//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/keen-client/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/keen-client/` (~/.config/keen-client/)
//! - Data: `$XDG_DATA_HOME/keen-client/` (~/.local/share/keen-client/)
//! - State/Logs: `$XDG_STATE_HOME/keen-client/` (~/.local/state/keen-client/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Log file name, shared with the logging appender
pub(crate) const LOG_FILE_NAME: &str = "keen-client.log";

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

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Client configuration
///
/// Every numeric limit here is policy, not a fixed constant: each field has a
/// serde default and an effect documented on the field itself.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Project identifier, part of the upload URL path
    #[serde(default)]
    pub project_id: String,

    /// API key sent in the Authorization header
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the events API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Ceiling on the serialized size of a single event body.
    /// Larger events are rejected at capture, never persisted.
    #[serde(default = "default_max_event_size")]
    pub max_event_size_bytes: usize,

    /// Cap on pending events per collection. When exceeded, the oldest
    /// events are evicted (FIFO) to bound storage growth.
    #[serde(default = "default_max_pending")]
    pub max_pending_per_collection: usize,

    /// Max events per collection selected into one flush batch
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for transient network failures
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Seconds between background auto-flush runs
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Static properties merged into every event body at capture.
    /// Caller-provided fields win on conflict. Must be a JSON object.
    #[serde(default)]
    pub global_properties: Option<serde_json::Value>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            api_key: String::new(),
            api_url: default_api_url(),
            max_event_size_bytes: default_max_event_size(),
            max_pending_per_collection: default_max_pending(),
            flush_batch_size: default_flush_batch_size(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            flush_interval_secs: default_flush_interval(),
            global_properties: None,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.keen.io".to_string()
}

fn default_max_event_size() -> usize {
    64 * 1024
}

fn default_max_pending() -> usize {
    10_000
}

fn default_flush_batch_size() -> usize {
    100
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

fn default_flush_interval() -> u64 {
    60
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    /// Create a configuration with the given credentials and default limits
    pub fn new(project_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(ClientConfig::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: ClientConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.project_id.is_empty() {
            return Err(Error::Config("project_id is required".to_string()));
        }
        if self.api_key.is_empty() {
            return Err(Error::Config("api_key is required".to_string()));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "api_url must be an http(s) URL, got {:?}",
                self.api_url
            )));
        }
        if self.max_event_size_bytes == 0 {
            return Err(Error::Config(
                "max_event_size_bytes must be greater than 0".to_string(),
            ));
        }
        if self.max_pending_per_collection == 0 {
            return Err(Error::Config(
                "max_pending_per_collection must be greater than 0".to_string(),
            ));
        }
        if self.flush_batch_size == 0 {
            return Err(Error::Config(
                "flush_batch_size must be greater than 0".to_string(),
            ));
        }
        if let Some(props) = &self.global_properties {
            if !props.is_object() {
                return Err(Error::Config(
                    "global_properties must be a JSON object".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/keen-client/config.toml` (~/.config/keen-client/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("keen-client").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite store)
    ///
    /// `$XDG_DATA_HOME/keen-client/` (~/.local/share/keen-client/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("keen-client")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/keen-client/` (~/.local/state/keen-client/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("keen-client")
    }

    /// Returns the event store file path
    ///
    /// `$XDG_DATA_HOME/keen-client/events.db` (~/.local/share/keen-client/events.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("events.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/keen-client/keen-client.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join(LOG_FILE_NAME)
    }
}
