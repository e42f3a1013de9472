//! Error types for the task executor.

use std::time::Duration;

use crate::tasks::model::TaskStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by task store and lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid task: {0}")]
    Validation(String),

    #[error("Cannot update task {id}: {reason}")]
    Update { id: i64, reason: String },

    #[error("Cannot append log to task {task_id}: {reason}")]
    Log { task_id: i64, reason: String },

    #[error("Transition from {from} to {to} is not allowed")]
    Transition { from: TaskStatus, to: TaskStatus },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Failures while running a task's command.
///
/// These never leave the execution engine; they are recorded on the task
/// as `COMPLETED_ERROR` plus a log entry.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Bulk import errors.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
