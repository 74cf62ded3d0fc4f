//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/tally/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/tally/` (~/.config/tally/)
//! - Data: `$XDG_DATA_HOME/tally/` (~/.local/share/tally/)
//! - State/Logs: `$XDG_STATE_HOME/tally/` (~/.local/state/tally/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default collector endpoint (must end with `/`)
pub const DEFAULT_ENDPOINT: &str = "https://collector.tally.dev/v3/";

/// Heartbeat events are emitted at most once per this interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(60_000);

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
    /// Collector endpoint, credentials and timing
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Tracker defaults applied at start
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the delivery channel talks to the collector.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TestMode {
    /// Real network IO
    #[default]
    Normal,
    /// No network IO; every request succeeds after a short delay
    SimulateSuccess,
    /// No network IO; every request fails after a short delay
    SimulateOffline,
}

impl TestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestMode::Normal => "normal",
            TestMode::SimulateSuccess => "simulate-success",
            TestMode::SimulateOffline => "simulate-offline",
        }
    }
}

impl std::str::FromStr for TestMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "normal" => Ok(TestMode::Normal),
            "simulate-success" => Ok(TestMode::SimulateSuccess),
            "simulate-offline" => Ok(TestMode::SimulateOffline),
            _ => Err(format!("unknown test mode: {}", s)),
        }
    }
}

/// Collector delivery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Collector endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Public API key, sent as a query parameter
    pub api_key: Option<String>,

    /// Secret key used to sign request bodies
    pub secret_key: Option<String>,

    /// Milliseconds between delivery ticks (clamped to 10..=60000)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Maximum milliseconds a single request may take (at least 100)
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Milliseconds between reachability probes while offline (at least 100)
    #[serde(default = "default_check_server_interval")]
    pub check_server_interval_ms: u64,

    /// Network mode
    #[serde(default)]
    pub test_mode: TestMode,

    /// Delay used by the simulated test modes
    #[serde(default = "default_simulated_latency")]
    pub simulated_latency_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            secret_key: None,
            tick_interval_ms: default_tick_interval(),
            send_timeout_ms: default_send_timeout(),
            check_server_interval_ms: default_check_server_interval(),
            test_mode: TestMode::Normal,
            simulated_latency_ms: default_simulated_latency(),
        }
    }
}

impl DeliveryConfig {
    /// Check if both keys are present
    pub fn is_ready(&self) -> bool {
        has_key(&self.api_key) && has_key(&self.secret_key)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !has_key(&self.api_key) {
            return Err(Error::Config("delivery.api_key is required".to_string()));
        }
        if !has_key(&self.secret_key) {
            return Err(Error::Config("delivery.secret_key is required".to_string()));
        }
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(Error::Config(format!(
                "delivery.endpoint must be an http(s) URL, got {:?}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

/// Keys are usable when something remains after stripping whitespace.
fn has_key(key: &Option<String>) -> bool {
    key.as_deref()
        .map(|k| k.chars().any(|c| !c.is_whitespace()))
        .unwrap_or(false)
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_tick_interval() -> u64 {
    200
}

fn default_send_timeout() -> u64 {
    20_000
}

fn default_check_server_interval() -> u64 {
    2_000
}

fn default_simulated_latency() -> u64 {
    1_000
}

/// Tracker defaults
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// Whether the player is currently doing payable actions
    #[serde(default = "default_payable")]
    pub payable: bool,

    /// Custom user id set at start
    pub custom_id: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            payable: default_payable(),
            custom_id: None,
        }
    }
}

fn default_payable() -> bool {
    true
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

    /// Capture tracker diagnostics into the in-memory log buffer
    #[serde(default)]
    pub diagnostics: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            diagnostics: false,
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

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/tally/config.toml` (~/.config/tally/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("tally").join("config.toml")
    }

    /// Returns the data directory path (queue file and settings store)
    ///
    /// `$XDG_DATA_HOME/tally/` (~/.local/share/tally/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("tally")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/tally/` (~/.local/state/tally/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("tally")
    }

    /// Returns the persisted queue path inside a data directory
    pub fn queue_path(data_dir: &Path) -> PathBuf {
        data_dir.join("queue.bin")
    }

    /// Returns the settings store path inside a data directory
    pub fn settings_path(data_dir: &Path) -> PathBuf {
        data_dir.join("settings.toml")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/tally/tally.log` (~/.local/state/tally/tally.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("tally.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.delivery.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.delivery.tick_interval_ms, 200);
        assert_eq!(config.delivery.send_timeout_ms, 20_000);
        assert_eq!(config.delivery.check_server_interval_ms, 2_000);
        assert_eq!(config.delivery.test_mode, TestMode::Normal);
        assert!(config.tracker.payable);
        assert!(!config.delivery.is_ready());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[delivery]
api_key = "pub-123"
secret_key = "s3cret"
tick_interval_ms = 50
test_mode = "simulate-offline"

[tracker]
payable = false
custom_id = "player-7"

[logging]
level = "debug"
diagnostics = true
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.delivery.api_key.as_deref(), Some("pub-123"));
        assert_eq!(config.delivery.tick_interval_ms, 50);
        assert_eq!(config.delivery.test_mode, TestMode::SimulateOffline);
        assert!(!config.tracker.payable);
        assert_eq!(config.tracker.custom_id.as_deref(), Some("player-7"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.diagnostics);
        assert!(config.delivery.is_ready());
    }

    #[test]
    fn test_delivery_config_validation() {
        let config = DeliveryConfig::default();
        assert!(config.validate().is_err());

        // Whitespace-only keys are as good as missing
        let config = DeliveryConfig {
            api_key: Some(" \n".to_string()),
            secret_key: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DeliveryConfig {
            api_key: Some("key".to_string()),
            secret_key: Some("secret".to_string()),
            endpoint: "ftp://nope".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DeliveryConfig {
            api_key: Some("key".to_string()),
            secret_key: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_test_mode_round_trips_through_str() {
        for mode in [
            TestMode::Normal,
            TestMode::SimulateSuccess,
            TestMode::SimulateOffline,
        ] {
            assert_eq!(mode.as_str().parse::<TestMode>().unwrap(), mode);
        }
        assert!("offline".parse::<TestMode>().is_err());
    }

    #[test]
    fn test_data_paths() {
        let dir = PathBuf::from("/tmp/tally-data");
        assert!(Config::queue_path(&dir).ends_with("queue.bin"));
        assert!(Config::settings_path(&dir).ends_with("settings.toml"));
        assert!(Config::log_path().ends_with("tally.log"));
    }
}
