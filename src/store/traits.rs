//! `TaskStore` trait — single async interface for task persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TaskError;
use crate::tasks::model::{NewTaskLog, Task, TaskLog, TaskStatus, TaskUpdate};

/// Backend-agnostic task store.
///
/// Every operation runs in its own short-lived transaction.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Drop and recreate all tables. Destroys every task and log.
    async fn reinitialize_schema(&self) -> Result<(), TaskError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Insert a task in status `NEW`.
    async fn create_task(&self, tag: &str, content: &serde_json::Value)
    -> Result<Task, TaskError>;

    /// Insert several tasks under one tag. All or nothing.
    async fn create_tasks(
        &self,
        tag: &str,
        contents: &[serde_json::Value],
    ) -> Result<usize, TaskError>;

    /// Apply a partial update. Fails with `TaskError::Update` if the task does not exist.
    async fn update_task(&self, id: i64, update: &TaskUpdate) -> Result<(), TaskError>;

    /// Delete a task and its logs. Returns whether the task existed.
    async fn delete_task(&self, id: i64) -> Result<bool, TaskError>;

    /// Get a task (with its logs) by ID.
    async fn get_task(&self, id: i64) -> Result<Option<Task>, TaskError>;

    /// All tasks with a tag, in insertion order.
    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Task>, TaskError>;

    /// Tasks with a tag and status, in insertion order.
    async fn list_by_tag_and_status(
        &self,
        tag: &str,
        status: TaskStatus,
    ) -> Result<Vec<Task>, TaskError>;

    /// Number of tasks per status for a tag. Statuses with no tasks are omitted.
    async fn count_by_status(&self, tag: &str) -> Result<Vec<(TaskStatus, usize)>, TaskError>;

    // ── Claiming ────────────────────────────────────────────────────

    /// Move up to `limit` tasks of `tag` from status `from` to `IN_PROGRESS`.
    ///
    /// The select and the status change happen in one conditional update,
    /// so a task is handed to at most one caller. Returns only the rows that
    /// were actually transitioned, in insertion order.
    async fn claim_tasks(
        &self,
        tag: &str,
        from: TaskStatus,
        limit: usize,
    ) -> Result<Vec<Task>, TaskError>;

    /// Move `IN_PROGRESS` tasks of `tag` last updated before `older_than`
    /// to `RE_PROCESS`. Returns the IDs that were reset.
    async fn reset_in_progress(
        &self,
        tag: &str,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<i64>, TaskError>;

    // ── Logs ────────────────────────────────────────────────────────

    /// Append an execution log. Fails with `TaskError::Log` if the task does not exist.
    async fn append_log(&self, log: &NewTaskLog) -> Result<TaskLog, TaskError>;
}
