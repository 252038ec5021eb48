//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. Status transitions are
//! implemented as conditional `UPDATE ... WHERE status IN (...)` statements
//! and report the affected-row count, so every status race is decided by the
//! database's own serialization order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::model::{Job, Status, Task, ToolUse};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL store backend.
///
/// Holds a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests and demos).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_status(s: &str) -> Status {
    s.parse().unwrap_or(Status::Pending)
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Quoted `IN (...)` list of the statuses that may transition to `to`.
fn predecessors_in_list(to: Status) -> String {
    Status::valid_predecessors(to)
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

const JOB_COLUMNS: &str = "job_id, description, status, created_at, started_at, ended_at";

const TASK_COLUMNS: &str = "id, job_id, content, status, error, created_at, started_at, ended_at";

const TOOL_USE_COLUMNS: &str = "id, task_id, tool_name, args, result, created_at";

fn row_to_job(row: &libsql::Row) -> Result<Job, libsql::Error> {
    let status_str: String = row.get(2)?;
    let created_str: String = row.get(3)?;
    let started_str: Option<String> = row.get(4).ok();
    let ended_str: Option<String> = row.get(5).ok();

    Ok(Job {
        job_id: row.get(0)?,
        description: row.get(1).ok(),
        status: parse_status(&status_str),
        created_at: parse_datetime(&created_str),
        started_at: parse_optional_datetime(&started_str),
        ended_at: parse_optional_datetime(&ended_str),
        tasks: Vec::new(),
    })
}

fn row_to_task(row: &libsql::Row) -> Result<Task, libsql::Error> {
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(5)?;
    let started_str: Option<String> = row.get(6).ok();
    let ended_str: Option<String> = row.get(7).ok();

    Ok(Task {
        id: row.get(0)?,
        job_id: row.get(1)?,
        content: row.get(2)?,
        status: parse_status(&status_str),
        error: row.get(4).ok(),
        created_at: parse_datetime(&created_str),
        started_at: parse_optional_datetime(&started_str),
        ended_at: parse_optional_datetime(&ended_str),
        tool_uses: Vec::new(),
    })
}

fn row_to_tool_use(row: &libsql::Row) -> Result<ToolUse, libsql::Error> {
    let args_str: String = row.get(3)?;
    let created_str: String = row.get(5)?;

    Ok(ToolUse {
        id: row.get(0)?,
        task_id: row.get(1)?,
        tool_name: row.get(2)?,
        args: serde_json::from_str(&args_str).unwrap_or(serde_json::Value::Null),
        result: row.get(4).ok(),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(
        &self,
        job_id: &str,
        description: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO jobs (job_id, description, status, created_at) VALUES (?1, ?2, 'pending', ?3)",
                params![job_id, opt_text(description), created_at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_job: {e}")))?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
                params![job_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_job(&row).map_err(|e| DatabaseError::Query(format!("get_job row: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    async fn list_jobs(&self, status: Option<Status>) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = match status {
            Some(status) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY id ASC"
                    ),
                    params![status.as_str()],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id ASC"),
                    (),
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("list_jobs: {e}")))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            jobs.push(
                row_to_job(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_jobs row: {e}")))?,
            );
        }
        Ok(jobs)
    }

    async fn transition_job(
        &self,
        job_id: &str,
        to: Status,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let in_list = predecessors_in_list(to);
        if in_list.is_empty() {
            return Ok(false);
        }

        // started_at is filled on the first transition out of pending, which
        // keeps the "started iff not pending" invariant even for jobs
        // cancelled straight from pending.
        let sql = if to.is_terminal() {
            format!(
                "UPDATE jobs SET status = ?2, started_at = COALESCE(started_at, ?3), ended_at = ?3 \
                 WHERE job_id = ?1 AND status IN ({in_list})"
            )
        } else {
            format!(
                "UPDATE jobs SET status = ?2, started_at = COALESCE(started_at, ?3) \
                 WHERE job_id = ?1 AND status IN ({in_list})"
            )
        };

        let affected = self
            .conn()
            .execute(&sql, params![job_id, to.as_str(), now.to_rfc3339()])
            .await
            .map_err(|e| DatabaseError::Query(format!("transition_job: {e}")))?;
        Ok(affected > 0)
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn insert_task(
        &self,
        job_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO tasks (job_id, content, status, created_at) VALUES (?1, ?2, 'pending', ?3)",
                params![job_id, content, created_at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_task: {e}")))?;
        Ok(self.conn().last_insert_rowid())
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![task_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_task(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_task row: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task: {e}"))),
        }
    }

    async fn list_tasks(&self, job_id: &str) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE job_id = ?1 ORDER BY id ASC"),
                params![job_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            tasks.push(
                row_to_task(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_tasks row: {e}")))?,
            );
        }
        Ok(tasks)
    }

    async fn transition_task(
        &self,
        task_id: i64,
        to: Status,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let in_list = predecessors_in_list(to);
        if in_list.is_empty() {
            return Ok(false);
        }

        let sql = if to.is_terminal() {
            format!(
                "UPDATE tasks SET status = ?2, ended_at = ?3, \
                 started_at = CASE WHEN ?2 = 'cancelled' THEN started_at ELSE COALESCE(started_at, ?3) END \
                 WHERE id = ?1 AND status IN ({in_list})"
            )
        } else {
            format!(
                "UPDATE tasks SET status = ?2, started_at = COALESCE(started_at, ?3) \
                 WHERE id = ?1 AND status IN ({in_list})"
            )
        };

        let affected = self
            .conn()
            .execute(&sql, params![task_id, to.as_str(), now.to_rfc3339()])
            .await
            .map_err(|e| DatabaseError::Query(format!("transition_task: {e}")))?;
        Ok(affected > 0)
    }

    async fn set_task_error(&self, task_id: i64, error: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE tasks SET error = ?2 WHERE id = ?1",
                params![task_id, error],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_task_error: {e}")))?;
        Ok(affected > 0)
    }

    async fn cancel_tasks_for_job(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE tasks SET status = 'cancelled', ended_at = ?2 \
                 WHERE job_id = ?1 AND status IN ('pending', 'running')",
                params![job_id, now.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("cancel_tasks_for_job: {e}")))?;
        Ok(affected)
    }

    // ── Tool uses ───────────────────────────────────────────────────

    async fn insert_tool_use(
        &self,
        task_id: i64,
        tool_name: &str,
        args: &serde_json::Value,
        result: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let args_json = serde_json::to_string(args)
            .map_err(|e| DatabaseError::Serialization(format!("tool use args: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO tool_uses (task_id, tool_name, args, result, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    task_id,
                    tool_name,
                    args_json,
                    opt_text(result),
                    created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_tool_use: {e}")))?;
        Ok(self.conn().last_insert_rowid())
    }

    async fn get_tool_use(&self, tool_use_id: i64) -> Result<Option<ToolUse>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TOOL_USE_COLUMNS} FROM tool_uses WHERE id = ?1"),
                params![tool_use_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_tool_use: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_tool_use(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_tool_use row: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_tool_use: {e}"))),
        }
    }

    async fn list_tool_uses(&self, task_id: i64) -> Result<Vec<ToolUse>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TOOL_USE_COLUMNS} FROM tool_uses WHERE task_id = ?1 ORDER BY id ASC"
                ),
                params![task_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tool_uses: {e}")))?;

        let mut uses = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            uses.push(
                row_to_tool_use(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_tool_uses row: {e}")))?,
            );
        }
        Ok(uses)
    }

    async fn set_tool_result(
        &self,
        tool_use_id: i64,
        result: &str,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE tool_uses SET result = ?2 WHERE id = ?1",
                params![tool_use_id, result],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_tool_result: {e}")))?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn insert_and_get_job() {
        let store = store().await;
        let now = Utc::now();
        store
            .insert_job("job_aaaa0001", Some("demo"), now)
            .await
            .unwrap();

        let job = store.get_job("job_aaaa0001").await.unwrap().unwrap();
        assert_eq!(job.job_id, "job_aaaa0001");
        assert_eq!(job.description.as_deref(), Some("demo"));
        assert_eq!(job.status, Status::Pending);
        assert!(job.started_at.is_none());
        assert!(job.ended_at.is_none());

        assert!(store.get_job("job_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_transition_is_conditional() {
        let store = store().await;
        let now = Utc::now();
        store.insert_job("job_t", None, now).await.unwrap();

        // pending -> completed is not legal
        assert!(!store.transition_job("job_t", Status::Completed, now).await.unwrap());

        assert!(store.transition_job("job_t", Status::Running, now).await.unwrap());
        // second caller loses the race
        assert!(!store.transition_job("job_t", Status::Running, now).await.unwrap());

        assert!(store.transition_job("job_t", Status::Completed, now).await.unwrap());
        // terminal: nothing more is allowed
        assert!(!store.transition_job("job_t", Status::Cancelled, now).await.unwrap());

        let job = store.get_job("job_t").await.unwrap().unwrap();
        assert_eq!(job.status, Status::Completed);
        assert!(job.started_at.is_some());
        assert!(job.ended_at.is_some());
    }

    #[tokio::test]
    async fn cancel_from_pending_sets_both_timestamps() {
        let store = store().await;
        let now = Utc::now();
        store.insert_job("job_c", None, now).await.unwrap();
        assert!(store.transition_job("job_c", Status::Cancelled, now).await.unwrap());

        let job = store.get_job("job_c").await.unwrap().unwrap();
        assert_eq!(job.status, Status::Cancelled);
        assert!(job.started_at.is_some());
        assert!(job.ended_at.is_some());
    }

    #[tokio::test]
    async fn tasks_keep_insertion_order() {
        let store = store().await;
        let now = Utc::now();
        store.insert_job("job_o", None, now).await.unwrap();

        let a = store.insert_task("job_o", "first", now).await.unwrap();
        let b = store.insert_task("job_o", "second", now).await.unwrap();
        let c = store.insert_task("job_o", "third", now).await.unwrap();
        assert!(a < b && b < c);

        let tasks = store.list_tasks("job_o").await.unwrap();
        let contents: Vec<_> = tasks.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn cancel_sweep_skips_terminal_tasks() {
        let store = store().await;
        let now = Utc::now();
        store.insert_job("job_s", None, now).await.unwrap();
        let done = store.insert_task("job_s", "done", now).await.unwrap();
        let pending = store.insert_task("job_s", "pending", now).await.unwrap();

        store.transition_task(done, Status::Running, now).await.unwrap();
        store.transition_task(done, Status::Completed, now).await.unwrap();

        let swept = store.cancel_tasks_for_job("job_s", now).await.unwrap();
        assert_eq!(swept, 1);

        let t = store.get_task(done).await.unwrap().unwrap();
        assert_eq!(t.status, Status::Completed);
        let t = store.get_task(pending).await.unwrap().unwrap();
        assert_eq!(t.status, Status::Cancelled);
        assert!(t.started_at.is_none());
        assert!(t.ended_at.is_some());
    }

    #[tokio::test]
    async fn tool_result_last_write_wins() {
        let store = store().await;
        let now = Utc::now();
        store.insert_job("job_u", None, now).await.unwrap();
        let task = store.insert_task("job_u", "t", now).await.unwrap();

        let id = store
            .insert_tool_use(task, "search", &serde_json::json!({"q": "x"}), None, now)
            .await
            .unwrap();

        assert!(store.set_tool_result(id, "one").await.unwrap());
        assert!(store.set_tool_result(id, "two").await.unwrap());
        assert!(!store.set_tool_result(id + 999, "lost").await.unwrap());

        let tu = store.get_tool_use(id).await.unwrap().unwrap();
        assert_eq!(tu.result.as_deref(), Some("two"));
        assert_eq!(tu.args, serde_json::json!({"q": "x"}));
    }

    #[tokio::test]
    async fn list_jobs_filters_by_status() {
        let store = store().await;
        let now = Utc::now();
        store.insert_job("job_1", None, now).await.unwrap();
        store.insert_job("job_2", None, now).await.unwrap();
        store.transition_job("job_2", Status::Running, now).await.unwrap();
        store.transition_job("job_2", Status::Failed, now).await.unwrap();

        let failed = store.list_jobs(Some(Status::Failed)).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job_id, "job_2");

        let all = store.list_jobs(None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["job_1", "job_2"]);
    }

    #[tokio::test]
    async fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let now = Utc::now();

        {
            let store = LibSqlStore::new_local(&path).await.unwrap();
            store.insert_job("job_persist", None, now).await.unwrap();
        }

        let store = LibSqlStore::new_local(&path).await.unwrap();
        let job = store.get_job("job_persist").await.unwrap().unwrap();
        assert_eq!(job.status, Status::Pending);
    }
}
