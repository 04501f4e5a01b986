//! Configuration for the backup catalog tool.
//!
//! Loads configuration from a TOML file; command-line flags override it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub validate: ValidateConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Catalog root holding `backups/` and the lock marker
    #[serde(default = "default_backup_path")]
    pub backup_path: PathBuf,

    /// WAL archive directory
    #[serde(default = "default_arclog_path")]
    pub arclog_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateConfig {
    /// Number of parallel file-check workers
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_backup_path() -> PathBuf {
    PathBuf::from("/var/lib/pg_probackup")
}

fn default_arclog_path() -> PathBuf {
    PathBuf::from("/var/lib/pg_probackup/wal")
}

fn default_workers() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backup_path: default_backup_path(),
            arclog_path: default_arclog_path(),
        }
    }
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            catalog: CatalogConfig::default(),
            validate: ValidateConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Worker count, never below one.
    pub fn workers(&self) -> usize {
        self.validate.workers.max(1)
    }
}
