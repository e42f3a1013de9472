//! libSQL backend — async `TaskStore` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! shared behind an async mutex, so store operations from concurrent
//! workers run one after another, each in its own transaction.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use libsql::{Connection, Database as LibSqlDatabase, TransactionBehavior, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{DatabaseError, TaskError};
use crate::store::migrations;
use crate::store::traits::TaskStore;
use crate::tasks::model::{
    NewTaskLog, Task, TaskLog, TaskStatus, TaskUpdate, validate_content, validate_tag,
};

/// How long a connection waits on a database locked by another process.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Mutex<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        // PRAGMA busy_timeout answers with a row, so it goes through query().
        let mut rows = conn
            .query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to set busy timeout: {e}")))?;
        rows.next()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to set busy timeout: {e}")))?;
        drop(rows);

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        })
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Current time at the precision we persist, so stored and returned values agree.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339; lexicographic order matches chronological order.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("bad timestamp '{s}': {e}")))
}

fn parse_status(s: &str) -> Result<TaskStatus, DatabaseError> {
    s.parse().map_err(DatabaseError::Serialization)
}

fn to_json(value: &serde_json::Value) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json(s: &str) -> Result<serde_json::Value, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn column_err(name: &'static str) -> impl FnOnce(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{name}: {e}"))
}

const TASK_COLUMNS: &str = "id, tag, content, status, created_at, updated_at";

const LOG_COLUMNS: &str = "id, message, status, created_at, updated_at, task_id";

/// Map a libsql Row to a Task (without logs).
///
/// Column order matches TASK_COLUMNS.
fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let content: String = row.get(2).map_err(column_err("task.content"))?;
    let status: String = row.get(3).map_err(column_err("task.status"))?;
    let created: String = row.get(4).map_err(column_err("task.created_at"))?;
    let updated: String = row.get(5).map_err(column_err("task.updated_at"))?;

    Ok(Task {
        id: row.get(0).map_err(column_err("task.id"))?,
        tag: row.get(1).map_err(column_err("task.tag"))?,
        content: from_json(&content)?,
        status: parse_status(&status)?,
        created_at: parse_datetime(&created)?,
        updated_at: parse_datetime(&updated)?,
        logs: Vec::new(),
    })
}

/// Map a libsql Row to a TaskLog.
///
/// Column order matches LOG_COLUMNS.
fn row_to_log(row: &libsql::Row) -> Result<TaskLog, DatabaseError> {
    let message: String = row.get(1).map_err(column_err("task_log.message"))?;
    let status: String = row.get(2).map_err(column_err("task_log.status"))?;
    let created: String = row.get(3).map_err(column_err("task_log.created_at"))?;
    let updated: String = row.get(4).map_err(column_err("task_log.updated_at"))?;

    Ok(TaskLog {
        id: row.get(0).map_err(column_err("task_log.id"))?,
        message: from_json(&message)?,
        status: parse_status(&status)?,
        created_at: parse_datetime(&created)?,
        updated_at: parse_datetime(&updated)?,
        task_id: row.get(5).map_err(column_err("task_log.task_id"))?,
    })
}

/// Drain a row set into tasks.
async fn collect_tasks(mut rows: libsql::Rows, op: &str) -> Result<Vec<Task>, DatabaseError> {
    let mut tasks = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op} row: {e}")))?
    {
        tasks.push(row_to_task(&row)?);
    }
    Ok(tasks)
}

/// Load the logs of `tasks` in insertion order.
async fn attach_logs(conn: &Connection, tasks: &mut [Task]) -> Result<(), DatabaseError> {
    if tasks.is_empty() {
        return Ok(());
    }
    // Integer IDs only; safe to inline.
    let ids = tasks
        .iter()
        .map(|t| t.id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let mut rows = conn
        .query(
            &format!("SELECT {LOG_COLUMNS} FROM task_logs WHERE task_id IN ({ids}) ORDER BY id ASC"),
            (),
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("attach_logs: {e}")))?;

    let mut by_task: HashMap<i64, Vec<TaskLog>> = HashMap::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("attach_logs row: {e}")))?
    {
        let log = row_to_log(&row)?;
        by_task.entry(log.task_id).or_default().push(log);
    }

    for task in tasks.iter_mut() {
        task.logs = by_task.remove(&task.id).unwrap_or_default();
    }
    Ok(())
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl TaskStore for LibSqlBackend {
    async fn reinitialize_schema(&self) -> Result<(), TaskError> {
        let conn = self.conn.lock().await;
        migrations::reinitialize(&conn).await?;
        Ok(())
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn create_task(
        &self,
        tag: &str,
        content: &serde_json::Value,
    ) -> Result<Task, TaskError> {
        validate_tag(tag)?;
        validate_content(content)?;
        let content_json = to_json(content)?;
        let created_at = now();
        let ts = format_timestamp(created_at);

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks (tag, content, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![tag, content_json, TaskStatus::New.as_str(), ts],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_task: {e}")))?;
        let id = conn.last_insert_rowid();

        debug!(task_id = id, tag = %tag, "Task created");
        Ok(Task {
            id,
            tag: tag.to_string(),
            content: content.clone(),
            status: TaskStatus::New,
            created_at,
            updated_at: created_at,
            logs: Vec::new(),
        })
    }

    async fn create_tasks(
        &self,
        tag: &str,
        contents: &[serde_json::Value],
    ) -> Result<usize, TaskError> {
        validate_tag(tag)?;
        let mut encoded = Vec::with_capacity(contents.len());
        for (idx, content) in contents.iter().enumerate() {
            validate_content(content).map_err(|e| {
                TaskError::Validation(format!("item {}: {e}", idx + 1))
            })?;
            encoded.push(to_json(content)?);
        }
        let ts = format_timestamp(now());

        let conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| DatabaseError::Query(format!("create_tasks begin: {e}")))?;
        for content_json in encoded {
            tx.execute(
                "INSERT INTO tasks (tag, content, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![tag, content_json, TaskStatus::New.as_str(), ts.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_tasks: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_tasks commit: {e}")))?;

        debug!(tag = %tag, count = contents.len(), "Tasks created");
        Ok(contents.len())
    }

    async fn update_task(&self, id: i64, update: &TaskUpdate) -> Result<(), TaskError> {
        if let Some(tag) = &update.tag {
            validate_tag(tag)?;
        }
        let content_json = match &update.content {
            Some(content) => {
                validate_content(content)?;
                Some(to_json(content)?)
            }
            None => None,
        };
        let status = update.status.map(|s| s.as_str());
        let ts = format_timestamp(now());

        let conn = self.conn.lock().await;
        let count = conn
            .execute(
                "UPDATE tasks SET
                    tag = COALESCE(?1, tag),
                    content = COALESCE(?2, content),
                    status = COALESCE(?3, status),
                    updated_at = MAX(updated_at, ?4)
                 WHERE id = ?5",
                params![update.tag.clone(), content_json, status, ts, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_task: {e}")))?;

        if count == 0 {
            return Err(TaskError::Update {
                id,
                reason: "task not found".to_string(),
            });
        }
        debug!(task_id = id, status = ?update.status, "Task updated");
        Ok(())
    }

    async fn delete_task(&self, id: i64) -> Result<bool, TaskError> {
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task begin: {e}")))?;
        tx.execute("DELETE FROM task_logs WHERE task_id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task logs: {e}")))?;
        let count = tx
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task commit: {e}")))?;

        debug!(task_id = id, deleted = count > 0, "Task deleted");
        Ok(count > 0)
    }

    async fn get_task(&self, id: i64) -> Result<Option<Task>, TaskError> {
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task begin: {e}")))?;
        let rows = tx
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;
        let mut tasks = collect_tasks(rows, "get_task").await?;
        attach_logs(&tx, &mut tasks).await?;
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task commit: {e}")))?;
        Ok(tasks.pop())
    }

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Task>, TaskError> {
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_by_tag begin: {e}")))?;
        let rows = tx
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE tag = ?1 ORDER BY id ASC"),
                params![tag],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_by_tag: {e}")))?;
        let mut tasks = collect_tasks(rows, "list_by_tag").await?;
        attach_logs(&tx, &mut tasks).await?;
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_by_tag commit: {e}")))?;
        Ok(tasks)
    }

    async fn list_by_tag_and_status(
        &self,
        tag: &str,
        status: TaskStatus,
    ) -> Result<Vec<Task>, TaskError> {
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_by_tag_and_status begin: {e}")))?;
        let rows = tx
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE tag = ?1 AND status = ?2 ORDER BY id ASC"
                ),
                params![tag, status.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_by_tag_and_status: {e}")))?;
        let mut tasks = collect_tasks(rows, "list_by_tag_and_status").await?;
        attach_logs(&tx, &mut tasks).await?;
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_by_tag_and_status commit: {e}")))?;
        Ok(tasks)
    }

    async fn count_by_status(&self, tag: &str) -> Result<Vec<(TaskStatus, usize)>, TaskError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT status, COUNT(*) FROM tasks WHERE tag = ?1 GROUP BY status",
                params![tag],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_by_status: {e}")))?;

        let mut counts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count_by_status row: {e}")))?
        {
            let status: String = row.get(0).map_err(column_err("status"))?;
            let count: i64 = row.get(1).map_err(column_err("count"))?;
            counts.push((parse_status(&status)?, count as usize));
        }
        counts.sort_by_key(|(status, _)| TaskStatus::ALL.iter().position(|s| s == status));
        Ok(counts)
    }

    // ── Claiming ────────────────────────────────────────────────────

    async fn claim_tasks(
        &self,
        tag: &str,
        from: TaskStatus,
        limit: usize,
    ) -> Result<Vec<Task>, TaskError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let ts = format_timestamp(now());

        let conn = self.conn.lock().await;
        // IMMEDIATE takes the write lock up front, so other processes
        // cannot slip in between the subselect and the update.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_tasks begin: {e}")))?;
        let rows = tx
            .query(
                &format!(
                    "UPDATE tasks SET status = ?1, updated_at = MAX(updated_at, ?2)
                     WHERE id IN (
                         SELECT id FROM tasks WHERE tag = ?3 AND status = ?4
                         ORDER BY id ASC LIMIT ?5
                     ) AND status = ?4
                     RETURNING {TASK_COLUMNS}"
                ),
                params![
                    TaskStatus::InProgress.as_str(),
                    ts,
                    tag,
                    from.as_str(),
                    limit as i64
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_tasks: {e}")))?;
        let mut tasks = collect_tasks(rows, "claim_tasks").await?;
        // RETURNING order is unspecified.
        tasks.sort_by_key(|t| t.id);
        attach_logs(&tx, &mut tasks).await?;
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_tasks commit: {e}")))?;

        debug!(tag = %tag, from = %from, claimed = tasks.len(), "Tasks claimed");
        Ok(tasks)
    }

    async fn reset_in_progress(
        &self,
        tag: &str,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<i64>, TaskError> {
        let ts = format_timestamp(now());
        let cutoff = format_timestamp(older_than.trunc_subsecs(6));

        let conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| DatabaseError::Query(format!("reset_in_progress begin: {e}")))?;
        let mut rows = tx
            .query(
                "UPDATE tasks SET status = ?1, updated_at = MAX(updated_at, ?2)
                 WHERE tag = ?3 AND status = ?4 AND updated_at < ?5
                 RETURNING id",
                params![
                    TaskStatus::ReProcess.as_str(),
                    ts,
                    tag,
                    TaskStatus::InProgress.as_str(),
                    cutoff
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reset_in_progress: {e}")))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("reset_in_progress row: {e}")))?
        {
            ids.push(row.get::<i64>(0).map_err(column_err("task.id"))?);
        }
        drop(rows);
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("reset_in_progress commit: {e}")))?;

        ids.sort_unstable();
        Ok(ids)
    }

    // ── Logs ────────────────────────────────────────────────────────

    async fn append_log(&self, log: &NewTaskLog) -> Result<TaskLog, TaskError> {
        let message_json = to_json(&log.message)?;

        let conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| DatabaseError::Query(format!("append_log begin: {e}")))?;

        let exists = {
            let mut rows = tx
                .query("SELECT 1 FROM tasks WHERE id = ?1", params![log.task_id])
                .await
                .map_err(|e| DatabaseError::Query(format!("append_log lookup: {e}")))?;
            rows.next()
                .await
                .map_err(|e| DatabaseError::Query(format!("append_log lookup row: {e}")))?
                .is_some()
        };
        if !exists {
            return Err(TaskError::Log {
                task_id: log.task_id,
                reason: "task not found".to_string(),
            });
        }

        tx.execute(
            "INSERT INTO task_logs (message, status, created_at, updated_at, task_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message_json,
                log.status.as_str(),
                format_timestamp(log.created_at),
                format_timestamp(log.updated_at),
                log.task_id
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("append_log: {e}")))?;
        let id = tx.last_insert_rowid();
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("append_log commit: {e}")))?;

        debug!(task_id = log.task_id, log_id = id, status = %log.status, "Task log appended");
        Ok(TaskLog {
            id,
            message: log.message.clone(),
            status: log.status,
            created_at: log.created_at.trunc_subsecs(6),
            updated_at: log.updated_at.trunc_subsecs(6),
            task_id: log.task_id,
        })
    }
}
