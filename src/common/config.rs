//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, log_dir};
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Readiness probing defaults
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Process shutdown settings
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Scenario HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Service log sink settings
    #[serde(default)]
    pub logs: LogsConfig,
}

/// Readiness probe budget
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessConfig {
    /// Probes issued before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between failed probes
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_max_attempts() -> u32 {
    10
}
fn default_interval_ms() -> u64 {
    1000
}

/// Shutdown settings
#[derive(Debug, Deserialize)]
pub struct ShutdownConfig {
    /// How long a service gets to exit after SIGTERM before it is killed
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

fn default_grace_period() -> u64 {
    5000
}

/// HTTP client settings for scenario steps
#[derive(Debug, Deserialize, Default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds, 0 disables it
    #[serde(default)]
    pub request_timeout_secs: u64,
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

/// Where service output is written
#[derive(Debug, Deserialize, Default)]
pub struct LogsConfig {
    /// Directory for per-service log files
    pub dir: Option<PathBuf>,
}

impl LogsConfig {
    /// Resolve the log directory, falling back to the platform data dir
    /// and finally the system temp dir
    pub fn resolve_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .or_else(log_dir)
            .unwrap_or_else(|| std::env::temp_dir().join("eufin-testenv"))
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}
