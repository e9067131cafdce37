use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OciError, Result};

/// Environment variable overriding the worker bound.
pub const ENV_CONCURRENCY: &str = "OLM_OCI_CONCURRENCY";

/// Environment variable overriding the local cache layout directory.
pub const ENV_STORE_DIR: &str = "OLM_OCI_STORE_DIR";

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of in-flight store/blob operations across one build or copy
    pub concurrency: usize,

    /// Local cache image layout (used by inspect and build)
    pub store_dir: PathBuf,

    /// Log level
    pub log_level: LogLevel,

    /// Capacity of the transfer progress channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            store_dir: default_store_dir(),
            log_level: LogLevel::Warn,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OciError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: EngineConfig = serde_yaml::from_str(&content).map_err(|e| {
            OciError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `OLM_OCI_CONCURRENCY` and `OLM_OCI_STORE_DIR` when set.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var(ENV_CONCURRENCY) {
            self.concurrency = value.trim().parse().map_err(|_| {
                OciError::Config(format!("{ENV_CONCURRENCY} must be a positive integer, got {value:?}"))
            })?;
        }
        if let Ok(value) = std::env::var(ENV_STORE_DIR) {
            if !value.is_empty() {
                self.store_dir = PathBuf::from(value);
            }
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(OciError::Config("concurrency must be at least 1".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(OciError::Config("event_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8)
        .max(1)
}

fn default_store_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".olm-oci")
        .join("store")
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl LogLevel {
    /// Directive usable as an `EnvFilter` fallback.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
