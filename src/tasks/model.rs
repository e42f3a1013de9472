//! Task data model — tasks, execution logs, and the status enum.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Lifecycle status of a task.
///
/// Persisted as its canonical upper-snake string (`NEW`, `IN_PROGRESS`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    New,
    InProgress,
    CompletedError,
    CompletedOk,
    ReProcess,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::New,
        TaskStatus::InProgress,
        TaskStatus::CompletedError,
        TaskStatus::CompletedOk,
        TaskStatus::ReProcess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "NEW",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::CompletedError => "COMPLETED_ERROR",
            TaskStatus::CompletedOk => "COMPLETED_OK",
            TaskStatus::ReProcess => "RE_PROCESS",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(TaskStatus::New),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED_ERROR" => Ok(TaskStatus::CompletedError),
            "COMPLETED_OK" => Ok(TaskStatus::CompletedOk),
            "RE_PROCESS" => Ok(TaskStatus::ReProcess),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// A unit of work: a command payload grouped under a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier.
    pub id: i64,
    /// Grouping key used for batch selection.
    pub tag: String,
    /// Structured payload; `command` holds the argv to execute.
    pub content: serde_json::Value,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Execution logs in insertion order.
    #[serde(default)]
    pub logs: Vec<TaskLog>,
}

impl Task {
    /// The `command` argv of this task, if the payload carries a well-formed one.
    pub fn command(&self) -> Option<Vec<String>> {
        let items = self.content.get("command")?.as_array()?;
        items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// The most recent execution log, if any.
    pub fn last_log(&self) -> Option<&TaskLog> {
        self.logs.last()
    }
}

/// Record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    pub id: i64,
    /// Result payload: `stdout`/`stderr`/`returnCode`, or `output`/`returnCode`
    /// for failures that never produced a process exit.
    pub message: serde_json::Value,
    /// Status of the task when the log was written.
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub task_id: i64,
}

impl TaskLog {
    /// Exit code recorded in the message.
    pub fn return_code(&self) -> Option<i64> {
        self.message.get("returnCode").and_then(|v| v.as_i64())
    }
}

/// Input for appending a log entry to a task.
#[derive(Debug, Clone)]
pub struct NewTaskLog {
    pub task_id: i64,
    pub message: serde_json::Value,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a task. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub tag: Option<String>,
    pub content: Option<serde_json::Value>,
    pub status: Option<TaskStatus>,
}

impl TaskUpdate {
    /// Update only the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tag.is_none() && self.content.is_none() && self.status.is_none()
    }
}

/// Reject empty or whitespace-only tags.
pub fn validate_tag(tag: &str) -> Result<(), TaskError> {
    if tag.trim().is_empty() {
        return Err(TaskError::Validation("tag can not be empty".to_string()));
    }
    Ok(())
}

/// Content must be a non-empty JSON object.
pub fn validate_content(content: &serde_json::Value) -> Result<(), TaskError> {
    match content {
        serde_json::Value::Object(map) if !map.is_empty() => Ok(()),
        serde_json::Value::Object(_) => Err(TaskError::Validation(
            "content can not be empty".to_string(),
        )),
        serde_json::Value::Null => {
            Err(TaskError::Validation("content can not be null".to_string()))
        }
        other => Err(TaskError::Validation(format!(
            "content must be an object, got {other}"
        ))),
    }
}

/// Parse a content literal (as given on the command line or in an import file).
///
/// Strict JSON is tried first. Anything else goes through JSON5, which also
/// takes single-quoted strings like `{'command': ['echo', '0']}`.
pub fn parse_content(raw: &str) -> Result<serde_json::Value, TaskError> {
    let raw = raw.trim();
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => json5::from_str(raw)
            .map_err(|e| TaskError::Validation(format!("content is not a valid literal: {e}")))?,
    };
    validate_content(&value)?;
    Ok(value)
}
