//! Configuration file parsing and structures.
//!
//! marqueed uses TOML for declarative configuration: the backend endpoint and
//! token, the fixed switch set, liveness policy, persistence, and the local
//! HTTP API.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub switches: SwitchesConfig,

    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

/// Remote store endpoint configuration
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Database root URL, e.g. "https://example-rtdb.firebaseio.com"
    pub url: String,

    /// Pre-established identity token. Obtaining one (the authentication
    /// handshake) is outside marqueed; it is accepted here as configuration.
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// The fixed, known switch set. Switches are not discovered dynamically.
#[derive(Debug, Deserialize)]
pub struct SwitchesConfig {
    /// Switch ids, stable for the device's lifetime
    pub ids: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    12_000
}

fn default_check_interval_ms() -> u64 {
    2_000
}

/// Liveness detection policy
#[derive(Debug, Deserialize)]
pub struct LivenessConfig {
    /// Silence after the last heartbeat before the device counts as offline
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Cadence of the liveness check; must be finer than the timeout so
    /// detection latency is bounded by one period
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

impl LivenessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

fn default_hint_path() -> PathBuf {
    PathBuf::from("marqueed_hint.json")
}

#[derive(Debug, Deserialize)]
pub struct PersistenceConfig {
    /// Where the presentation hint survives restarts
    #[serde(default = "default_hint_path")]
    pub hint_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            hint_path: default_hint_path(),
        }
    }
}

fn default_api_bind() -> String {
    "127.0.0.1:8565".to_string()
}

fn default_true() -> bool {
    true
}

/// Local HTTP API configuration
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_api_bind(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let config: Config = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.switches.ids.is_empty() {
            return Err(ConfigError::Invalid(
                "switches.ids must list at least one switch".to_string(),
            ));
        }

        let unique: HashSet<&String> = self.switches.ids.iter().collect();
        if unique.len() != self.switches.ids.len() {
            return Err(ConfigError::Invalid(
                "switches.ids contains duplicate ids".to_string(),
            ));
        }

        if self.liveness.check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "liveness.check_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.liveness.check_interval_ms >= self.liveness.timeout_ms {
            return Err(ConfigError::Invalid(
                "liveness.check_interval_ms must be strictly finer than liveness.timeout_ms"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
