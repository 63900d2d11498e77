use crate::error::ConfigError;
use crate::limiter::rate_limiter::{DEFAULT_MAX_REQUESTS, DEFAULT_MAX_TRACKED_IDENTIFIERS};
use crate::monitor::security_monitor::DEFAULT_MAX_EVENTS;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Longest accepted rate limit window (30 days)
const MAX_WINDOW_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Application configuration loaded from TOML
///
/// Every section and field is optional; missing values fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub rate_limit: RateLimitConfig,
    pub monitor: MonitorConfig,
    pub guard: GuardConfig,
    pub export: ExportConfig,
}

/// Rate limiter settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum admissions per identifier per window
    pub max_requests: usize,
    /// Sliding window length in seconds
    pub window_seconds: u64,
    /// Identifiers tracked before idle ones are evicted
    pub max_tracked_identifiers: usize,
    /// How often the CLI sweeps idle identifiers
    pub sweep_interval_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_seconds: 15 * 60,
            max_tracked_identifiers: DEFAULT_MAX_TRACKED_IDENTIFIERS,
            sweep_interval_seconds: 60,
        }
    }
}

/// Security monitor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Number of events retained
    pub max_events: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

/// Request guard settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    /// Value of the `Retry-After` header on limited responses
    pub retry_after_seconds: u64,
    /// Whether requests are screened for suspicious patterns
    pub detect_suspicious: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            retry_after_seconds: 60,
            detect_suspicious: true,
        }
    }
}

/// Event export settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    /// HTTP endpoint receiving event batches; export is disabled when unset
    pub endpoint: Option<String>,
    /// Events per request
    pub batch_size: usize,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Events buffered before the oldest are dropped
    pub max_pending: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            batch_size: 50,
            timeout_seconds: 10,
            max_pending: 5000,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, a TOML error if
    /// it cannot be parsed, and `ConfigError::ValidationError` for invalid values.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that all values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.max_requests must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.window_seconds == 0
            || self.rate_limit.window_seconds > MAX_WINDOW_SECONDS
        {
            return Err(ConfigError::ValidationError(format!(
                "rate_limit.window_seconds must be between 1 and {}",
                MAX_WINDOW_SECONDS
            )));
        }
        if self.rate_limit.max_tracked_identifiers == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.max_tracked_identifiers must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.sweep_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.sweep_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.monitor.max_events == 0 {
            return Err(ConfigError::ValidationError(
                "monitor.max_events must be greater than 0".to_string(),
            ));
        }
        if self.export.batch_size == 0 || self.export.max_pending == 0 {
            return Err(ConfigError::ValidationError(
                "export.batch_size and export.max_pending must be greater than 0".to_string(),
            ));
        }
        if let Some(ref endpoint) = self.export.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "export.endpoint must be an http(s) URL: {}",
                    endpoint
                )));
            }
        }
        Ok(())
    }

    /// Rate limit window as a chrono duration
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.rate_limit.window_seconds as i64)
    }
}
