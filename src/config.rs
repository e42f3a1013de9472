//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default database file name, created in the working directory.
pub const DEFAULT_DB_FILE: &str = "task-executor.sqlite";

/// Default debug log file name, created in the working directory.
pub const DEFAULT_LOG_FILE: &str = "task-executor.debug.log";

/// Executor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Path of the task database.
    pub db_path: PathBuf,
    /// Maximum number of tasks claimed per batch.
    pub batch_size: usize,
    /// Maximum number of commands running at once within a batch.
    pub max_workers: usize,
    /// Per-task deadline. `None` lets commands run until they exit.
    pub task_timeout: Option<Duration>,
    /// Debug log file.
    pub log_file: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            db_path: cwd.join(DEFAULT_DB_FILE),
            batch_size: 1,
            max_workers: 1,
            task_timeout: None,
            log_file: cwd.join(DEFAULT_LOG_FILE),
        }
    }
}

impl ExecutorConfig {
    /// Build from `TASK_EXECUTOR_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (used by `from_env` and tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("TASK_EXECUTOR_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("TASK_EXECUTOR_LOG_FILE") {
            config.log_file = PathBuf::from(path);
        }
        if let Some(raw) = lookup("TASK_EXECUTOR_BATCH_SIZE") {
            config.batch_size = parse_value("TASK_EXECUTOR_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("TASK_EXECUTOR_MAX_WORKERS") {
            config.max_workers = parse_positive("TASK_EXECUTOR_MAX_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("TASK_EXECUTOR_TASK_TIMEOUT_SECS") {
            let secs: u64 = parse_positive("TASK_EXECUTOR_TASK_TIMEOUT_SECS", &raw)?;
            config.task_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        })
}

fn parse_positive<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value: T = parse_value(key, raw)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
