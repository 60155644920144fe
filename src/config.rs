//! Engine configuration
//!
//! Every field has a default, so a configuration file only lists what it
//! overrides.

use std::fs;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading an [`EngineConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read engine config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid engine config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid engine config value: {0}")]
    Invalid(String),
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded wait of one descriptor poll
    pub poll_timeout_ms: u64,
    /// Raw descriptors must stay below this value
    pub max_fd: RawFd,
    /// Hop ceiling of a single flow; unbounded when unset
    pub max_flow_hops: Option<usize>,
    /// Require binding destinations to exist when the binding is recorded
    pub strict_bind: bool,
    /// Default log filter directive
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 10,
            max_fd: 1024,
            max_flow_hops: None,
            strict_bind: false,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration
    ///
    /// # Example
    /// ```
    /// use block_engine::config::EngineConfig;
    ///
    /// let config = EngineConfig::from_json_str(r#"{"strict_bind": true}"#).unwrap();
    /// assert!(config.strict_bind);
    /// assert_eq!(config.poll_timeout_ms, 10);
    /// ```
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Poll timeout as a duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_fd <= 0 {
            return Err(ConfigError::Invalid(format!("max_fd must be positive, got {}", self.max_fd)));
        }
        if self.max_flow_hops == Some(0) {
            return Err(ConfigError::Invalid("max_flow_hops must be at least 1".into()));
        }
        Ok(())
    }
}
