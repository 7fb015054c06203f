/// Configuration management
///
/// Read from `<config_dir>/termtrail/config.toml`. Every field is optional and
/// a missing file means defaults. `TERMTRAIL_DB` overrides the database path.

use crate::core::CapturePolicy;
use crate::error::{Result, TrailError};
use crate::intelligence::pattern_miner::{
    MinerConfig, DEFAULT_MIN_FREQUENCY, DEFAULT_TIME_SLOT_TOP_K, DEFAULT_TIME_SLOT_WINDOW_DAYS,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const DB_ENV_VAR: &str = "TERMTRAIL_DB";

const APP_DIR: &str = "termtrail";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    /// `tracing` filter directive, e.g. "warn" or "termtrail_lib=debug"
    pub log_level: String,
    pub min_frequency: i64,
    pub time_slot_window_days: i64,
    pub time_slot_top_k: usize,
    /// Delete history older than this many days on `gc`
    pub retention_days: Option<i64>,
    /// Added to the built-in sensitive directory list
    pub sensitive_directories: Vec<String>,
    /// Command prefixes that are never recorded
    pub ignored_commands: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: "warn".to_string(),
            min_frequency: DEFAULT_MIN_FREQUENCY,
            time_slot_window_days: DEFAULT_TIME_SLOT_WINDOW_DAYS,
            time_slot_top_k: DEFAULT_TIME_SLOT_TOP_K,
            retention_days: None,
            sensitive_directories: Vec::new(),
            ignored_commands: Vec::new(),
        }
    }
}

impl Config {
    /// Load from the standard location, then apply the environment override
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };

        config.apply_database_override(env::var(DB_ENV_VAR).ok());
        Ok(config)
    }

    /// Load from a specific file, defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;

        Ok(config)
    }

    fn apply_database_override(&mut self, value: Option<String>) {
        if let Some(path) = value.filter(|v| !v.trim().is_empty()) {
            self.database_path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_frequency < 1 {
            return Err(TrailError::Config("min_frequency must be at least 1".to_string()));
        }
        if self.time_slot_window_days < 1 {
            return Err(TrailError::Config(
                "time_slot_window_days must be at least 1".to_string(),
            ));
        }
        if self.time_slot_top_k == 0 {
            return Err(TrailError::Config("time_slot_top_k must be at least 1".to_string()));
        }
        if matches!(self.retention_days, Some(days) if days < 1) {
            return Err(TrailError::Config("retention_days must be at least 1".to_string()));
        }

        Ok(())
    }

    pub fn miner_config(&self) -> MinerConfig {
        MinerConfig {
            min_frequency: self.min_frequency,
            time_slot_window_days: self.time_slot_window_days,
            time_slot_top_k: self.time_slot_top_k,
        }
    }

    pub fn capture_policy(&self) -> CapturePolicy {
        CapturePolicy::new()
            .with_ignored_commands(&self.ignored_commands)
            .with_sensitive_directories(&self.sensitive_directories)
    }
}

/// Where the config file lives, if the platform has a config directory
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .or_else(|| dirs::home_dir().map(|home| home.join(".termtrail")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("history.db")
}
