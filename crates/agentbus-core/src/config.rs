//! Pipeline configuration.
//!
//! Hosts either embed [`PipelineConfig`] in their own YAML config or start
//! from the defaults and overlay the environment with [`PipelineConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// ~60fps frame cadence.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 16;

/// Number of debug event logs kept on disk.
pub const DEFAULT_RETAINED_LOGS: usize = 10;

/// Enables the debug event log when set to a truthy value.
pub const DEBUG_EVENTS_ENV: &str = "AGENTBUS_DEBUG_EVENTS";

/// Overrides the debug event log directory.
pub const DEBUG_DIR_ENV: &str = "AGENTBUS_DEBUG_DIR";

/// Development mode: one fixed log file, truncated per process.
pub const DEV_ENV: &str = "AGENTBUS_DEV";

/// Invalid or unreadable configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse pipeline config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid pipeline config: {0}")]
    Invalid(String),
}

/// Top-level pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Batch flush cadence in milliseconds.
    pub flush_interval_ms: u64,

    pub debug_log: DebugLogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            debug_log: DebugLogConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Overlays environment-style settings read through `lookup`.
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(DEBUG_EVENTS_ENV) {
            self.debug_log.enabled = is_truthy(&value);
        }
        if let Some(dir) = lookup(DEBUG_DIR_ENV).filter(|dir| !dir.trim().is_empty()) {
            self.debug_log.dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = lookup(DEV_ENV) {
            self.debug_log.dev_mode = is_truthy(&value);
        }
        self
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.debug_log.retain == 0 {
            return Err(ConfigError::Invalid(
                "debug_log.retain must keep at least one file".to_string(),
            ));
        }
        Ok(())
    }

    /// Batch flush interval as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Settings for the JSONL debug event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugLogConfig {
    pub enabled: bool,

    /// Log directory; defaults to `~/.agentbus/debug-events`.
    pub dir: Option<PathBuf>,

    /// Write to a fixed `events-dev.jsonl` instead of one file per run.
    pub dev_mode: bool,

    /// How many log files to keep.
    pub retain: usize,
}

impl Default for DebugLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            dev_mode: false,
            retain: DEFAULT_RETAINED_LOGS,
        }
    }
}

impl DebugLogConfig {
    /// The directory logs are written to.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_debug_dir)
    }
}

fn default_debug_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".agentbus")
        .join("debug-events")
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
