//! Runtime configuration.
//!
//! Loaded from JSON; every field has a default so partial files work.
//! Durations are written in milliseconds.

use crate::monitor::ResourceLimits;
use crate::pool::PoolConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Complete runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrataConfig {
    /// Worker pool settings
    pub pool: PoolConfig,
    /// Run-level ceilings
    pub limits: ResourceLimits,
    /// Keep going after an operation fails
    pub continue_on_error: bool,
}

impl StrataConfig {
    /// Parse from JSON text and validate
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid JSON or a value is out of range
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or its contents are invalid
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range value
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        if self.limits.max_concurrent_operations == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.maxConcurrentOperations",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            limits: ResourceLimits::default(),
            continue_on_error: true,
        }
    }
}
