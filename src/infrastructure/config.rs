//! Runtime configuration loading.
//!
//! Hierarchical merge via figment: programmatic defaults, then the project
//! config file, then local overrides, then `COS_*` environment variables.
//! This covers the daemon's environment (paths, logging); the orchestration
//! knobs themselves live inside `cos/state.json` and travel with the data.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Working directory cannot be empty")]
    EmptyWorkDir,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Also write a daily-rotated JSON log file under `<work_dir>/cos/logs`.
    #[serde(default = "default_true")]
    pub file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: true,
        }
    }
}

/// Daemon runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Working directory all data paths derive from.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_work_dir() -> String {
    ".".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .cos/config.yaml (project config)
    /// 3. .cos/local.yaml (project local overrides, optional)
    /// 4. Environment variables (COS_* prefix, highest priority)
    pub fn load() -> Result<RuntimeConfig> {
        let config: RuntimeConfig = Figment::new()
            .merge(Serialized::defaults(RuntimeConfig::default()))
            .merge(Yaml::file(".cos/config.yaml"))
            .merge(Yaml::file(".cos/local.yaml"))
            .merge(Env::prefixed("COS_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<RuntimeConfig> {
        let config: RuntimeConfig = Figment::new()
            .merge(Serialized::defaults(RuntimeConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &RuntimeConfig) -> Result<(), ConfigError> {
        if config.work_dir.is_empty() {
            return Err(ConfigError::EmptyWorkDir);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}
