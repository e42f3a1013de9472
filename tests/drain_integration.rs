use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use task_executor::executor::{CommandRunner, DrainSummary, Driver, ExecutionEngine};
use task_executor::store::{LibSqlBackend, TaskStore};
use task_executor::tasks::TaskStatus;

const TAG: &str = "integtest";

async fn open(path: &Path) -> Arc<dyn TaskStore> {
    Arc::new(LibSqlBackend::new_local(path).await.unwrap())
}

fn driver(store: &Arc<dyn TaskStore>) -> Driver {
    let engine = ExecutionEngine::new(Arc::clone(store), CommandRunner::new());
    Driver::new(Arc::clone(store), engine)
}

#[tokio::test]
async fn five_tasks_drain_in_three_batches() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("queue.sqlite")).await;

    let contents = vec![
        json!({ "command": ["echo", "0"] }),
        json!({ "command": ["echo", "1"] }),
        json!({ "command": ["cmd-not-exist", "2"] }),
        json!({ "command": ["echo", "3"] }),
        json!({ "command": ["echo", "4"] }),
    ];
    assert_eq!(store.create_tasks(TAG, &contents).await.unwrap(), 5);

    let summary = driver(&store)
        .drain(TAG, TaskStatus::New, 2, 2)
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

    let tasks = store.list_by_tag(TAG).await.unwrap();
    let codes: Vec<_> = tasks
        .iter()
        .map(|t| t.last_log().and_then(|l| l.return_code()).unwrap())
        .collect();
    assert_eq!(codes, vec![0, 0, 1, 0, 0]);
    assert_eq!(tasks[0].logs[0].message["stdout"], "0\n");
    assert_eq!(tasks[2].status, TaskStatus::CompletedError);
}

#[tokio::test]
async fn results_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.sqlite");

    {
        let store = open(&path).await;
        store
            .create_task(TAG, &json!({ "command": ["echo", "persisted"] }))
            .await
            .unwrap();
        driver(&store).drain(TAG, TaskStatus::New, 1, 1).await.unwrap();
    }

    let store = open(&path).await;
    let tasks = store.list_by_tag(TAG).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::CompletedOk);
    assert_eq!(tasks[0].logs[0].message["stdout"], "persisted\n");
}

#[tokio::test]
async fn concurrent_drainers_run_each_task_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.sqlite");
    let first = open(&path).await;
    let second = open(&path).await;

    let contents: Vec<_> = (0..12)
        .map(|i| json!({ "command": ["echo", i.to_string()] }))
        .collect();
    first.create_tasks(TAG, &contents).await.unwrap();

    let (a, b) = tokio::join!(
        async { driver(&first).drain(TAG, TaskStatus::New, 2, 2).await },
        async { driver(&second).drain(TAG, TaskStatus::New, 3, 2).await },
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.executed() + b.executed(), 12);

    let tasks = first.list_by_tag(TAG).await.unwrap();
    assert_eq!(tasks.len(), 12);
    for task in &tasks {
        assert_eq!(task.status, TaskStatus::CompletedOk);
        assert_eq!(task.logs.len(), 1, "task {} ran more than once", task.id);
    }
}

#[tokio::test]
async fn failed_tasks_can_be_requeued_and_drained() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("queue.sqlite")).await;
    let task = store
        .create_task(TAG, &json!({ "command": ["sh", "-c", "exit 3"] }))
        .await
        .unwrap();

    driver(&store).drain(TAG, TaskStatus::New, 1, 1).await.unwrap();
    store
        .update_task(
            task.id,
            &task_executor::tasks::TaskUpdate::status(TaskStatus::ReProcess),
        )
        .await
        .unwrap();

    let summary = driver(&store)
        .drain(TAG, TaskStatus::ReProcess, 1, 1)
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.logs.len(), 2);
    assert_eq!(task.last_log().and_then(|l| l.return_code()), Some(3));
}
