//! TOML configuration for the logging and dispatch layers.
//!
//! ```toml
//! [log]
//! level = "debug"
//! format = "json"
//!
//! [dispatch]
//! queue_capacity = 256
//! ```

use crate::error::ConfigError;
use crate::logging::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output format for log records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output for interactive use
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Settings for [`QueueExecutor`](crate::dispatch::QueueExecutor)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on queued callbacks; unbounded when unset.
    /// Callbacks that find the queue full run inline instead.
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub dispatch: DispatchConfig,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log
            .level
            .parse::<LogLevel>()
            .map_err(ConfigError::ValidationError)?;
        if self.dispatch.queue_capacity == Some(0) {
            return Err(ConfigError::ValidationError(
                "dispatch.queue_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
