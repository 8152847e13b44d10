//! Runtime configuration loaded from TOML.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interval used when a watchdog spawn omits `interval_s`.
    pub default_watchdog_interval_s: u64,
    pub min_watchdog_interval_s: u64,
    /// Timeout used when a `wait` call omits one.
    pub default_wait_timeout_ms: u64,
    pub min_wait_timeout_ms: u64,
    pub max_wait_timeout_ms: u64,
    /// Upper bound on the work a single check-in may do before it is failed.
    pub check_in_timeout_s: u64,
    /// Post a status message to the owner's inbox when a check-in exits
    /// without having messaged its owner.
    pub fallback_delivery: bool,
    /// Capacity of the runtime event broadcast channel.
    pub event_capacity: usize,
    /// Tag name used when rendering inbox messages for injection.
    pub inbox_tag: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_watchdog_interval_s: 60,
            min_watchdog_interval_s: 1,
            default_wait_timeout_ms: 30_000,
            min_wait_timeout_ms: 0,
            max_wait_timeout_ms: 300_000,
            check_in_timeout_s: 120,
            fallback_delivery: true,
            event_capacity: 256,
            inbox_tag: "agent-message".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl RuntimeConfig {
    /// Parse a config document. Settings may live at the top level or under
    /// an `[agents]` table, so the runtime can share a file with other tools.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut table: toml::Table = toml::from_str(contents)?;
        let config: RuntimeConfig = match table.remove("agents") {
            Some(agents) => agents.try_into()?,
            None => toml::Value::Table(table).try_into()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_watchdog_interval_s == 0 {
            return Err(ConfigError::Invalid(
                "min_watchdog_interval_s must be at least 1".to_string(),
            ));
        }
        if self.default_watchdog_interval_s < self.min_watchdog_interval_s {
            return Err(ConfigError::Invalid(format!(
                "default_watchdog_interval_s ({}) is below min_watchdog_interval_s ({})",
                self.default_watchdog_interval_s, self.min_watchdog_interval_s
            )));
        }
        if self.min_wait_timeout_ms > self.max_wait_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "min_wait_timeout_ms ({}) exceeds max_wait_timeout_ms ({})",
                self.min_wait_timeout_ms, self.max_wait_timeout_ms
            )));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve a caller-supplied wait timeout against the configured bounds.
    pub fn wait_timeout(&self, requested: Option<Duration>) -> Duration {
        let requested = requested.unwrap_or(Duration::from_millis(self.default_wait_timeout_ms));
        let max = Duration::from_millis(self.max_wait_timeout_ms);
        let min = Duration::from_millis(self.min_wait_timeout_ms).min(max);
        requested.clamp(min, max)
    }

    pub fn check_in_timeout(&self) -> Duration {
        Duration::from_secs(self.check_in_timeout_s)
    }
}
