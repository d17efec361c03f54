//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/veracify/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/veracify/` (~/.config/veracify/)
//! - Data: `$XDG_DATA_HOME/veracify/` (~/.local/share/veracify/)
//! - State/Logs: `$XDG_STATE_HOME/veracify/` (~/.local/state/veracify/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

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

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Batching and scheduling options
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Remote analytics sink
    #[serde(default)]
    pub sink: SinkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Batching and scheduling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// User opt-in for sharing usage analytics (consent gate)
    #[serde(default = "default_share_analytics")]
    pub share_analytics: bool,

    /// Events per sink POST
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Interval between periodic sync cycles, in milliseconds
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Pending events needed before the recorder asks for an early cycle
    #[serde(default = "default_min_batch_threshold")]
    pub min_batch_threshold: usize,

    /// Consecutive failing cycles tolerated before the scheduler widens
    /// the retry window
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            share_analytics: default_share_analytics(),
            batch_size: default_batch_size(),
            sync_interval_ms: default_sync_interval_ms(),
            min_batch_threshold: default_min_batch_threshold(),
            max_retry_attempts: default_max_retry_attempts(),
        }
    }
}

impl TelemetryConfig {
    /// Sync interval as a chrono duration, for debounce arithmetic.
    pub fn sync_interval(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.sync_interval_ms as i64)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config(
                "telemetry.batch_size must be at least 1".to_string(),
            ));
        }
        if self.sync_interval_ms == 0 {
            return Err(Error::Config(
                "telemetry.sync_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_share_analytics() -> bool {
    true
}

fn default_batch_size() -> usize {
    50
}

fn default_sync_interval_ms() -> u64 {
    900_000
}

fn default_min_batch_threshold() -> usize {
    5
}

fn default_max_retry_attempts() -> u32 {
    3
}

/// Remote analytics sink configuration
///
/// When configured, pending events are delivered in batches to
/// `{base_url}/{table}` with the API key attached.
#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    /// Sink base URL (e.g., `https://abc.supabase.co/rest/v1`)
    pub base_url: Option<String>,

    /// API key, sent as both `apikey` and bearer authorization
    pub api_key: Option<String>,

    /// Table receiving fact-check analytics events
    #[serde(default = "default_analytics_table")]
    pub analytics_table: String,

    /// Table receiving user feedback events
    #[serde(default = "default_feedback_table")]
    pub feedback_table: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_sink_timeout")]
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            analytics_table: default_analytics_table(),
            feedback_table: default_feedback_table(),
            timeout_secs: default_sink_timeout(),
        }
    }
}

impl SinkConfig {
    /// Check if the sink has everything it needs to send batches
    pub fn is_ready(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Config("sink.base_url is required".to_string()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::Config(format!(
                "sink.base_url is not an http(s) URL: {}",
                url
            )));
        }
        if self.api_key.is_none() {
            return Err(Error::Config("sink.api_key is required".to_string()));
        }
        if self.analytics_table.is_empty() || self.feedback_table.is_empty() {
            return Err(Error::Config(
                "sink table names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_analytics_table() -> String {
    "analytics_events".to_string()
}

fn default_feedback_table() -> String {
    "feedback_events".to_string()
}

fn default_sink_timeout() -> u64 {
    30
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
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.telemetry.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/veracify/config.toml` (~/.config/veracify/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("veracify").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite store)
    ///
    /// `$XDG_DATA_HOME/veracify/` (~/.local/share/veracify/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("veracify")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/veracify/` (~/.local/state/veracify/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("veracify")
    }

    /// Returns the store file path
    ///
    /// `$XDG_DATA_HOME/veracify/telemetry.db` (~/.local/share/veracify/telemetry.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("telemetry.db")
    }
}

/// Shared consent flag gating all network transmission of telemetry.
///
/// The host can flip consent at any time, including while a sync cycle is
/// in flight; the flag is re-read at the start of every cycle.
#[derive(Debug, Clone)]
pub struct ConsentGate {
    enabled: Arc<AtomicBool>,
}

impl ConsentGate {
    /// Create a gate initialized from the `share_analytics` option
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    /// True when the user has opted in to sharing analytics
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the consent flag
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}
