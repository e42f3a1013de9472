//! Driver loop — claim and execute batches until a tag runs dry.

use std::sync::Arc;

use tracing::info;

use crate::error::TaskError;
use crate::executor::claim::claim_batch;
use crate::executor::engine::ExecutionEngine;
use crate::store::TaskStore;
use crate::tasks::model::TaskStatus;

/// Totals over one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Tasks eligible when the drain started.
    pub eligible: usize,
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl DrainSummary {
    pub fn executed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Drives claim → execute cycles for one store.
pub struct Driver {
    store: Arc<dyn TaskStore>,
    engine: ExecutionEngine,
}

impl Driver {
    pub fn new(store: Arc<dyn TaskStore>, engine: ExecutionEngine) -> Self {
        Self { store, engine }
    }

    /// Claim and execute batches of `tag` tasks in `status` until none are left.
    ///
    /// Batches run strictly one after another. If other writers keep adding
    /// tasks with the same tag and status, this keeps going.
    pub async fn drain(
        &self,
        tag: &str,
        status: TaskStatus,
        batch_size: usize,
        max_workers: usize,
    ) -> Result<DrainSummary, TaskError> {
        let total = self
            .store
            .count_by_status(tag)
            .await?
            .into_iter()
            .find_map(|(s, count)| (s == status).then_some(count))
            .unwrap_or(0);
        info!(tag = %tag, status = %status, total, batch_size, max_workers, "Drain started");

        let mut summary = DrainSummary {
            eligible: total,
            ..DrainSummary::default()
        };
        loop {
            let tasks = claim_batch(self.store.as_ref(), tag, status, batch_size).await?;
            if tasks.is_empty() {
                break;
            }

            summary.batches += 1;
            info!(batch = summary.batches, size = tasks.len(), "Processing batch");
            let report = self.engine.execute_batch(tasks, max_workers).await?;
            summary.succeeded += report.succeeded();
            summary.failed += report.failed();
            info!(
                batch = summary.batches,
                done = summary.executed(),
                total,
                "Batch finished"
            );
        }

        info!(
            tag = %tag,
            batches = summary.batches,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Drain finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::command::CommandRunner;
    use crate::store::LibSqlBackend;
    use crate::tasks::model::TaskUpdate;
    use serde_json::json;

    async fn driver_with(contents: &[serde_json::Value]) -> (Arc<LibSqlBackend>, Driver) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        for content in contents {
            db.create_task("integtest", content).await.unwrap();
        }
        let engine = ExecutionEngine::new(db.clone(), CommandRunner::new());
        (db.clone(), Driver::new(db, engine))
    }

    #[tokio::test]
    async fn drain_runs_every_task_once() {
        let contents = vec![
            json!({ "command": ["echo", "0"] }),
            json!({ "command": ["echo", "1"] }),
            json!({ "command": ["cmd-not-exist", "2"] }),
            json!({ "command": ["echo", "3"] }),
            json!({ "command": ["echo", "4"] }),
        ];
        let (db, driver) = driver_with(&contents).await;

        let summary = driver
            .drain("integtest", TaskStatus::New, 2, 2)
            .await
            .unwrap();
        assert_eq!(
            summary,
            DrainSummary {
                eligible: 5,
                batches: 3,
                succeeded: 4,
                failed: 1
            }
        );

        let tasks = db.list_by_tag("integtest").await.unwrap();
        let codes: Vec<_> = tasks
            .iter()
            .map(|t| t.logs[0].return_code().unwrap())
            .collect();
        assert_eq!(codes, vec![0, 0, 1, 0, 0]);
        assert!(tasks.iter().all(|t| t.status.is_terminal() && t.logs.len() == 1));
    }

    #[tokio::test]
    async fn drain_of_empty_tag_does_nothing() {
        let (_db, driver) = driver_with(&[]).await;
        let summary = driver.drain("integtest", TaskStatus::New, 5, 2).await.unwrap();
        assert_eq!(summary, DrainSummary::default());
    }

    #[tokio::test]
    async fn drain_re_process_leaves_other_statuses_alone() {
        let contents = vec![
            json!({ "command": ["echo", "a"] }),
            json!({ "command": ["echo", "b"] }),
        ];
        let (db, driver) = driver_with(&contents).await;
        let tasks = db.list_by_tag("integtest").await.unwrap();
        db.update_task(
            tasks[0].id,
            &TaskUpdate::status(TaskStatus::ReProcess),
        )
        .await
        .unwrap();

        let summary = driver
            .drain("integtest", TaskStatus::ReProcess, 10, 1)
            .await
            .unwrap();
        assert_eq!(summary.executed(), 1);

        let untouched = db.get_task(tasks[1].id).await.unwrap().unwrap();
        assert_eq!(untouched.status, TaskStatus::New);
    }

    #[tokio::test]
    async fn drain_with_zero_batch_size_stops_immediately() {
        let contents = vec![json!({ "command": ["echo", "a"] })];
        let (db, driver) = driver_with(&contents).await;
        let summary = driver.drain("integtest", TaskStatus::New, 0, 1).await.unwrap();
        assert_eq!(summary.batches, 0);
        assert_eq!(
            db.list_by_tag_and_status("integtest", TaskStatus::New)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn eligible_counts_only_the_drained_status() {
        let contents = vec![
            json!({ "command": ["echo", "a"] }),
            json!({ "command": ["echo", "b"] }),
            json!({ "command": ["echo", "c"] }),
        ];
        let (db, driver) = driver_with(&contents).await;
        db.create_task("other", &json!({ "command": ["echo", "d"] }))
            .await
            .unwrap();
        let first = db.list_by_tag("integtest").await.unwrap()[0].id;
        db.update_task(first, &TaskUpdate::status(TaskStatus::CompletedOk))
            .await
            .unwrap();

        let summary = driver.drain("integtest", TaskStatus::New, 10, 1).await.unwrap();
        assert_eq!(summary.eligible, 2);
        assert_eq!(summary.executed(), 2);
    }
}
