//! Pipeline configuration.
//!
//! Read from an optional TOML file; every key has a default so an empty file
//! (or no file) yields a working configuration.
//!
//! ```toml
//! database_path = "/var/lib/intentflow/intentflow.sqlite3"
//! freshness_window_secs = 300
//!
//! [processing_pool]
//! workers = 10
//! queue_capacity = 50
//!
//! [reply_pool]
//! workers = 20
//! queue_capacity = 100
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Error type for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config not found at: {0}")]
    NotFound(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for config operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Sizing of one bounded worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolConfig {
    /// Tasks allowed to run at once
    pub workers: usize,
    /// Submissions buffered before `submit` reports saturation
    pub queue_capacity: usize,
}

impl PoolConfig {
    pub const fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: workers and queue_capacity must be at least 1",
                name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// SQLite file; `None` means the CLI picks `<home>/intentflow.sqlite3`
    pub database_path: Option<PathBuf>,

    /// Runs classification and orchestration
    pub processing_pool: PoolConfig,

    /// Delivers replies for settled intents
    pub reply_pool: PoolConfig,

    /// A `PROCESSING` intent stamped more recently than this is left alone
    pub freshness_window_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            processing_pool: PoolConfig::new(10, 50),
            reply_pool: PoolConfig::new(20, 100),
            freshness_window_secs: 300,
        }
    }
}

impl PipelineConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.processing_pool.validate("processing_pool")?;
        self.reply_pool.validate("reply_pool")?;
        Ok(())
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        let secs = i64::try_from(self.freshness_window_secs).unwrap_or(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }
}
