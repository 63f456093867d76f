///
/// # Configuration
///
/// Loads OSAL defaults from a TOML document. Every table and key is
/// optional; missing values fall back to the defaults below.
///
/// ## Example osal.toml
///
/// ```toml
/// [log]
/// level = "debug"
/// include_location = true
///
/// [thread]
/// stack_size = 65536
/// priority = 0
///
/// [pool]
/// threads = 4
/// max_threads = 8
/// priority = 0
/// stack_size = 0
/// ```
///
/// `pool.max_threads = 0` means "same as `threads`", i.e. no growth.
///

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::log::{LogLevel, LogSink, Logger};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OsalConfig {
    pub log: LogSettings,
    pub thread: ThreadSettings,
    pub pool: PoolSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: LogLevel,
    pub include_location: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_location: false,
        }
    }
}

impl LogSettings {
    pub fn logger(&self, sink: Arc<dyn LogSink>) -> Logger {
        Logger::new(self.level, self.include_location, sink)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreadSettings {
    pub stack_size: usize,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    pub threads: u32,
    pub max_threads: u32,
    pub priority: i32,
    pub stack_size: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            threads: 4,
            max_threads: 0,
            priority: 0,
            stack_size: 0,
        }
    }
}

impl PoolSettings {
    /// Upper bound for dynamic growth.
    pub fn effective_max_threads(&self) -> u32 {
        if self.max_threads == 0 {
            self.threads
        } else {
            self.max_threads
        }
    }
}

impl OsalConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: OsalConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_threads != 0 && self.pool.max_threads < self.pool.threads {
            return Err(ConfigError::Invalid(format!(
                "pool.max_threads ({}) is smaller than pool.threads ({})",
                self.pool.max_threads, self.pool.threads
            )));
        }
        Ok(())
    }
}
