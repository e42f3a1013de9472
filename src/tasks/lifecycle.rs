//! Task lifecycle rules.
//!
//! ```text
//! NEW ──────────┐
//!               ├──> IN_PROGRESS ──> COMPLETED_OK
//! RE_PROCESS ───┘                └─> COMPLETED_ERROR
//! ```
//!
//! Completed tasks only move again when a caller resets them to
//! `RE_PROCESS` or `NEW`.

use crate::error::TaskError;
use crate::tasks::model::TaskStatus;

impl TaskStatus {
    /// Whether the claimer may pick up tasks in this status.
    pub fn is_claimable(&self) -> bool {
        matches!(self, TaskStatus::New | TaskStatus::ReProcess)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::CompletedOk | TaskStatus::CompletedError)
    }

    /// Whether `self -> to` is a defined transition.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (New, InProgress)
                | (ReProcess, InProgress)
                | (InProgress, CompletedOk)
                | (InProgress, CompletedError)
                | (CompletedOk, ReProcess)
                | (CompletedOk, New)
                | (CompletedError, ReProcess)
                | (CompletedError, New)
        )
    }

    /// Checked transition.
    pub fn transition(self, to: TaskStatus) -> Result<TaskStatus, TaskError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TaskError::Transition { from: self, to })
        }
    }

    /// Terminal status for a process exit code.
    pub fn for_exit_code(code: i32) -> TaskStatus {
        if code == 0 {
            TaskStatus::CompletedOk
        } else {
            TaskStatus::CompletedError
        }
    }
}
