//! Batch claimer — hands out the next tasks of a tag for execution.

use tracing::debug;

use crate::error::TaskError;
use crate::store::TaskStore;
use crate::tasks::model::{Task, TaskStatus};

/// Claim up to `batch_size` tasks of `tag` currently in `status`.
///
/// Every returned task is already `IN_PROGRESS` in the store. Only `NEW`
/// and `RE_PROCESS` can be claimed; any other source status is rejected
/// with `TaskError::Transition`.
pub async fn claim_batch(
    store: &dyn TaskStore,
    tag: &str,
    status: TaskStatus,
    batch_size: usize,
) -> Result<Vec<Task>, TaskError> {
    status.transition(TaskStatus::InProgress)?;
    if batch_size == 0 {
        return Ok(Vec::new());
    }

    let tasks = store.claim_tasks(tag, status, batch_size).await?;
    debug!(
        tag = %tag,
        status = %status,
        requested = batch_size,
        claimed = tasks.len(),
        "Batch claimed"
    );
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::tasks::model::TaskUpdate;
    use serde_json::json;

    const TAG: &str = "task-runTest";

    async fn seeded_db(count: usize) -> LibSqlBackend {
        let db = LibSqlBackend::new_memory().await.unwrap();
        for i in 0..count {
            db.create_task(TAG, &json!({ "command": ["echo", i.to_string()] }))
                .await
                .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn claims_new_tasks() {
        let db = seeded_db(1).await;
        let tasks = claim_batch(&db, TAG, TaskStatus::New, 100).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn never_exceeds_batch_size() {
        let db = seeded_db(5).await;
        let tasks = claim_batch(&db, TAG, TaskStatus::New, 2).await.unwrap();
        assert_eq!(tasks.len(), 2);
        let left = db.list_by_tag_and_status(TAG, TaskStatus::New).await.unwrap();
        assert_eq!(left.len(), 3);
    }

    #[tokio::test]
    async fn zero_batch_is_empty() {
        let db = seeded_db(2).await;
        assert!(claim_batch(&db, TAG, TaskStatus::New, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn re_process_not_found() {
        let db = seeded_db(1).await;
        let tasks = claim_batch(&db, TAG, TaskStatus::ReProcess, 100).await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn re_process_found() {
        let db = seeded_db(1).await;
        let task = &db.list_by_tag(TAG).await.unwrap()[0];
        db.update_task(task.id, &TaskUpdate::status(TaskStatus::CompletedOk))
            .await
            .unwrap();
        db.update_task(task.id, &TaskUpdate::status(TaskStatus::ReProcess))
            .await
            .unwrap();

        let tasks = claim_batch(&db, TAG, TaskStatus::ReProcess, 100).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::InProgress);
        let stored = db.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn rejects_unclaimable_status() {
        let db = seeded_db(1).await;
        let err = claim_batch(&db, TAG, TaskStatus::CompletedOk, 10)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::Transition {
                from: TaskStatus::CompletedOk,
                to: TaskStatus::InProgress
            }
        ));
    }
}
