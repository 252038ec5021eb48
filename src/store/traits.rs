//! Backend-agnostic `Store` trait — the durable storage seam.
//!
//! The engine is written against this trait; the libSQL backend implements
//! it. Status transitions are conditional check-and-set operations: they
//! commit only when the row's current status is a valid predecessor of the
//! target, and report whether a row actually changed. That makes the store's
//! serialization order the arbiter of every status race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::model::{Job, Status, Task, ToolUse};

/// Durable keyed storage for Job, Task, and ToolUse records.
///
/// `get_job`/`list_jobs` return jobs with an empty `tasks` vector;
/// `get_task`/`list_tasks` return tasks with an empty `tool_uses` vector.
/// The engine assembles the full tree.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert a new pending job.
    async fn insert_job(
        &self,
        job_id: &str,
        description: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Get a job by its external id.
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, DatabaseError>;

    /// List jobs in creation order, optionally filtered by status.
    async fn list_jobs(&self, status: Option<Status>) -> Result<Vec<Job>, DatabaseError>;

    /// Atomically transition a job to `to` if its current status permits it.
    ///
    /// Returns `true` iff the transition committed. Sets `started_at` on the
    /// first transition out of pending and `ended_at` on reaching a terminal
    /// status.
    async fn transition_job(
        &self,
        job_id: &str,
        to: Status,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Append a pending task to a job. Returns the task id; insertion order
    /// is execution order.
    async fn insert_task(
        &self,
        job_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError>;

    /// Get a task by id.
    async fn get_task(&self, task_id: i64) -> Result<Option<Task>, DatabaseError>;

    /// List a job's tasks in insertion order.
    async fn list_tasks(&self, job_id: &str) -> Result<Vec<Task>, DatabaseError>;

    /// Atomically transition a task, with the same contract as
    /// [`Store::transition_job`].
    async fn transition_task(
        &self,
        task_id: i64,
        to: Status,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Record a failure detail on a task. Returns `false` if the id is
    /// unknown.
    async fn set_task_error(&self, task_id: i64, error: &str) -> Result<bool, DatabaseError>;

    /// Mark all non-terminal tasks of a job cancelled. Returns the number of
    /// tasks affected.
    async fn cancel_tasks_for_job(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>;

    // ── Tool uses ───────────────────────────────────────────────────

    /// Record a tool invocation under a task. Returns the tool-use id.
    async fn insert_tool_use(
        &self,
        task_id: i64,
        tool_name: &str,
        args: &serde_json::Value,
        result: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError>;

    /// Get a tool use by id.
    async fn get_tool_use(&self, tool_use_id: i64) -> Result<Option<ToolUse>, DatabaseError>;

    /// List a task's tool uses in insertion order.
    async fn list_tool_uses(&self, task_id: i64) -> Result<Vec<ToolUse>, DatabaseError>;

    /// Set (or overwrite — last write wins) a tool use's result. Returns
    /// `false` if the id is unknown.
    async fn set_tool_result(&self, tool_use_id: i64, result: &str)
    -> Result<bool, DatabaseError>;
}
