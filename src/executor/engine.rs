//! Execution engine — runs a claimed batch on a bounded worker pool.
//!
//! Each worker runs one task's command, then records the terminal status
//! and an execution log. Command failures are recorded on the task and
//! never abort the batch. The engine returns only after every worker in the
//! batch has finished.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::TaskError;
use crate::executor::command::CommandRunner;
use crate::store::TaskStore;
use crate::tasks::model::{NewTaskLog, Task, TaskStatus, TaskUpdate};

/// Return code logged when the command never produced an exit status.
pub const EXECUTION_FAILURE_CODE: i32 = 1;

/// Result of one task within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_id: i64,
    pub status: TaskStatus,
    pub return_code: i32,
}

/// Outcomes of one batch, in completion order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::CompletedOk)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Runs batches of claimed tasks.
pub struct ExecutionEngine {
    store: Arc<dyn TaskStore>,
    runner: CommandRunner,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn TaskStore>, runner: CommandRunner) -> Self {
        Self { store, runner }
    }

    /// Execute `tasks` with at most `max_workers` commands running at once.
    ///
    /// A store failure inside one worker does not stop the others; once all
    /// workers have joined, the first such failure is returned.
    pub async fn execute_batch(
        &self,
        tasks: Vec<Task>,
        max_workers: usize,
    ) -> Result<BatchReport, TaskError> {
        let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
        let mut join_set = JoinSet::new();
        let mut task_ids = HashMap::new();

        for task in tasks {
            let task_id = task.id;
            let store = Arc::clone(&self.store);
            let runner = self.runner.clone();
            let semaphore = Arc::clone(&semaphore);
            let handle = join_set.spawn(async move {
                // The semaphore is never closed, so acquire only fails if that changes.
                let _permit = semaphore.acquire_owned().await.ok();
                run_task(store.as_ref(), &runner, task).await
            });
            task_ids.insert(handle.id(), task_id);
        }

        let mut report = BatchReport::default();
        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => match task_ids.get(&e.id()) {
                    Some(&task_id) => {
                        error!(task_id, error = %e, "Task worker panicked");
                        let message = json!({
                            "output": format!("worker failed: {e}"),
                            "returnCode": EXECUTION_FAILURE_CODE,
                        });
                        record(
                            self.store.as_ref(),
                            task_id,
                            TaskStatus::CompletedError,
                            message,
                            Utc::now(),
                        )
                        .await
                        .map(|status| TaskOutcome {
                            task_id,
                            status,
                            return_code: EXECUTION_FAILURE_CODE,
                        })
                    }
                    None => {
                        error!(error = %e, "Unknown task worker failed");
                        continue;
                    }
                },
            };
            match result {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    error!(error = %e, "Failed to record task result");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Run one task and record its terminal status and log.
async fn run_task(
    store: &dyn TaskStore,
    runner: &CommandRunner,
    task: Task,
) -> Result<TaskOutcome, TaskError> {
    info!(task_id = task.id, command = %task.content["command"], "Task started");
    let created_at = Utc::now();

    let (status, message, return_code) = match runner.run_task(&task).await {
        Ok(output) => (
            TaskStatus::for_exit_code(output.code),
            json!({
                "stdout": output.stdout,
                "stderr": output.stderr,
                "returnCode": output.code,
            }),
            output.code,
        ),
        Err(e) => {
            warn!(task_id = task.id, error = %e, "Task execution failed");
            (
                TaskStatus::CompletedError,
                json!({
                    "output": e.to_string(),
                    "returnCode": EXECUTION_FAILURE_CODE,
                }),
                EXECUTION_FAILURE_CODE,
            )
        }
    };

    let status = record(store, task.id, status, message, created_at).await?;

    info!(task_id = task.id, status = %status, return_code, "Task finished");
    Ok(TaskOutcome {
        task_id: task.id,
        status,
        return_code,
    })
}

/// Store the terminal `status` of a task, then append its execution log.
async fn record(
    store: &dyn TaskStore,
    task_id: i64,
    status: TaskStatus,
    message: serde_json::Value,
    created_at: DateTime<Utc>,
) -> Result<TaskStatus, TaskError> {
    store
        .update_task(task_id, &TaskUpdate::status(status))
        .await?;
    let task = store
        .get_task(task_id)
        .await?
        .ok_or_else(|| TaskError::Update {
            id: task_id,
            reason: "task was deleted during execution".to_string(),
        })?;
    store
        .append_log(&NewTaskLog {
            task_id,
            message,
            status: task.status,
            created_at,
            updated_at: Utc::now(),
        })
        .await?;
    Ok(task.status)
}
