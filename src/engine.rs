//! Job engine — owns the data model and all status mutation.
//!
//! Every operation is synchronous with respect to the store; the engine does
//! no background work of its own. Concurrency safety comes from the store's
//! conditional transitions: callers racing on the same row get exactly one
//! winner, and the losers see `false`.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{Job, JobStats, Status, Task, ToolUse};
use crate::store::Store;

/// Reference to a status-bearing entity, used by [`JobEngine::update_status`].
#[derive(Debug, Clone)]
pub enum EntityRef<'a> {
    Job(&'a str),
    Task(i64),
}

/// Synchronous job/task lifecycle operations over a [`Store`].
pub struct JobEngine {
    store: Arc<dyn Store>,
}

impl JobEngine {
    /// Create an engine bound to a store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a new pending job. Returns its external id.
    pub async fn create_job(&self, description: Option<&str>) -> Result<String, EngineError> {
        let job_id = format!("job_{}", &Uuid::new_v4().simple().to_string()[..8]);
        self.store
            .insert_job(&job_id, description, Utc::now())
            .await?;
        debug!(job = %job_id, "Created job");
        Ok(job_id)
    }

    /// Append a task to a job. Fails if the job is unknown or terminal.
    pub async fn add_task(&self, job_id: &str, content: &str) -> Result<i64, EngineError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound { id: job_id.into() })?;

        if job.status.is_terminal() {
            return Err(EngineError::InvalidState {
                id: job_id.into(),
                status: job.status,
                operation: "add a task".into(),
            });
        }

        let task_id = self.store.insert_task(job_id, content, Utc::now()).await?;
        debug!(job = %job_id, task = task_id, "Added task");
        Ok(task_id)
    }

    /// Get a job with its tasks and each task's tool uses, in insertion
    /// order.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, EngineError> {
        match self.store.get_job(job_id).await? {
            Some(job) => Ok(Some(self.load_tree(job).await?)),
            None => Ok(None),
        }
    }

    /// Get a bare task record (tool uses included).
    pub async fn get_task(&self, task_id: i64) -> Result<Option<Task>, EngineError> {
        match self.store.get_task(task_id).await? {
            Some(mut task) => {
                task.tool_uses = self.store.list_tool_uses(task_id).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// List jobs in creation order, optionally filtered by status. Each job
    /// carries its full task tree.
    pub async fn list_jobs(&self, status: Option<Status>) -> Result<Vec<Job>, EngineError> {
        let mut jobs = Vec::new();
        for job in self.store.list_jobs(status).await? {
            jobs.push(self.load_tree(job).await?);
        }
        Ok(jobs)
    }

    /// Record a tool invocation under a task. `result` may be `None` while
    /// the call is in flight and supplied later via
    /// [`JobEngine::update_tool_result`].
    pub async fn record_tool_use(
        &self,
        task_id: i64,
        tool_name: &str,
        args: &serde_json::Value,
        result: Option<&str>,
    ) -> Result<i64, EngineError> {
        if self.store.get_task(task_id).await?.is_none() {
            return Err(EngineError::TaskNotFound { id: task_id });
        }

        let id = self
            .store
            .insert_tool_use(task_id, tool_name, args, result, Utc::now())
            .await?;
        debug!(task = task_id, tool = %tool_name, tool_use = id, "Recorded tool use");
        Ok(id)
    }

    /// Set a tool use's result. Last write wins; fails with
    /// `ToolUseNotFound` if the id is unknown.
    pub async fn update_tool_result(
        &self,
        tool_use_id: i64,
        result: &str,
    ) -> Result<(), EngineError> {
        if !self.store.set_tool_result(tool_use_id, result).await? {
            return Err(EngineError::ToolUseNotFound { id: tool_use_id });
        }
        Ok(())
    }

    /// Record a failure detail on a task.
    pub async fn record_task_error(
        &self,
        task_id: i64,
        error: &str,
    ) -> Result<bool, EngineError> {
        Ok(self.store.set_task_error(task_id, error).await?)
    }

    /// Transition a job or task. Returns `false` (no mutation) when the
    /// transition is illegal for the entity's current status or the id is
    /// unknown. Start/end timestamps are set by the store as part of the
    /// same conditional update.
    pub async fn update_status(
        &self,
        entity: EntityRef<'_>,
        new_status: Status,
    ) -> Result<bool, EngineError> {
        let now = Utc::now();
        let applied = match entity {
            EntityRef::Job(job_id) => self.store.transition_job(job_id, new_status, now).await?,
            EntityRef::Task(task_id) => {
                self.store.transition_task(task_id, new_status, now).await?
            }
        };
        Ok(applied)
    }

    /// Cancel a job and all of its non-terminal tasks.
    ///
    /// The job's own `pending|running -> cancelled` transition is the gate:
    /// of any number of concurrent cancel requests exactly one observes
    /// `true`, and a cancel racing a completion resolves to whichever
    /// transition commits first in the store. Returns `false` if the job is
    /// already terminal or unknown.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool, EngineError> {
        let now = Utc::now();
        let won = self.store.transition_job(job_id, Status::Cancelled, now).await?;
        if won {
            let swept = self.store.cancel_tasks_for_job(job_id, now).await?;
            debug!(job = %job_id, tasks = swept, "Cancelled job");
        }
        Ok(won)
    }

    /// Aggregate task counts, tool-use count, and elapsed time for a job.
    pub async fn get_job_stats(&self, job_id: &str) -> Result<JobStats, EngineError> {
        let job = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound { id: job_id.into() })?;
        Ok(JobStats::from_job(&job))
    }

    async fn load_tree(&self, mut job: Job) -> Result<Job, EngineError> {
        let mut tasks = self.store.list_tasks(&job.job_id).await?;
        for task in &mut tasks {
            task.tool_uses = self.store.list_tool_uses(task.id).await?;
        }
        job.tasks = tasks;
        Ok(job)
    }
}

/// List a job's tool uses flattened across tasks, newest last. Convenience
/// for failure diagnosis.
pub fn last_tool_use(job: &Job) -> Option<&ToolUse> {
    job.tasks.iter().flat_map(|t| t.tool_uses.iter()).last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlStore;

    async fn engine() -> JobEngine {
        JobEngine::new(Arc::new(LibSqlStore::new_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn create_job_is_pending_with_unique_id() {
        let engine = engine().await;
        let a = engine.create_job(Some("one")).await.unwrap();
        let b = engine.create_job(None).await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("job_"));

        let job = engine.get_job(&a).await.unwrap().unwrap();
        assert_eq!(job.status, Status::Pending);
        assert_eq!(job.description.as_deref(), Some("one"));
        assert!(job.tasks.is_empty());
    }

    #[tokio::test]
    async fn add_task_unknown_job() {
        let engine = engine().await;
        let err = engine.add_task("job_nope", "x").await.unwrap_err();
        assert!(matches!(err, EngineError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn add_task_to_terminal_job_is_invalid() {
        let engine = engine().await;
        let job_id = engine.create_job(None).await.unwrap();
        assert!(engine.cancel_job(&job_id).await.unwrap());

        let err = engine.add_task(&job_id, "late").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn update_status_enforces_transition_table() {
        let engine = engine().await;
        let job_id = engine.create_job(None).await.unwrap();

        assert!(!engine
            .update_status(EntityRef::Job(&job_id), Status::Completed)
            .await
            .unwrap());
        assert!(engine
            .update_status(EntityRef::Job(&job_id), Status::Running)
            .await
            .unwrap());
        assert!(!engine
            .update_status(EntityRef::Job(&job_id), Status::Running)
            .await
            .unwrap());
        assert!(engine
            .update_status(EntityRef::Job(&job_id), Status::Completed)
            .await
            .unwrap());

        // unknown entity is a plain false, not an error
        assert!(!engine
            .update_status(EntityRef::Job("job_ghost"), Status::Running)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn timestamps_follow_status() {
        let engine = engine().await;
        let job_id = engine.create_job(None).await.unwrap();

        let job = engine.get_job(&job_id).await.unwrap().unwrap();
        assert!(job.started_at.is_none() && job.ended_at.is_none());

        engine
            .update_status(EntityRef::Job(&job_id), Status::Running)
            .await
            .unwrap();
        let job = engine.get_job(&job_id).await.unwrap().unwrap();
        assert!(job.started_at.is_some() && job.ended_at.is_none());

        engine
            .update_status(EntityRef::Job(&job_id), Status::Failed)
            .await
            .unwrap();
        let job = engine.get_job(&job_id).await.unwrap().unwrap();
        assert!(job.started_at.is_some() && job.ended_at.is_some());
    }

    #[tokio::test]
    async fn cancel_job_sweeps_tasks_once() {
        let engine = engine().await;
        let job_id = engine.create_job(None).await.unwrap();
        engine.add_task(&job_id, "a").await.unwrap();
        engine.add_task(&job_id, "b").await.unwrap();

        assert!(engine.cancel_job(&job_id).await.unwrap());
        assert!(!engine.cancel_job(&job_id).await.unwrap());
        assert!(!engine.cancel_job("job_missing").await.unwrap());

        let job = engine.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, Status::Cancelled);
        assert!(job.tasks.iter().all(|t| t.status == Status::Cancelled));
        assert!(job.tasks.iter().all(|t| t.ended_at.is_some()));
    }

    #[tokio::test]
    async fn tool_use_flow() {
        let engine = engine().await;
        let job_id = engine.create_job(None).await.unwrap();
        let task_id = engine.add_task(&job_id, "look things up").await.unwrap();

        let err = engine
            .record_tool_use(9999, "search", &serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound { .. }));

        let tu = engine
            .record_tool_use(task_id, "search", &serde_json::json!({"q": "rust"}), None)
            .await
            .unwrap();
        engine.update_tool_result(tu, "first").await.unwrap();
        engine.update_tool_result(tu, "final").await.unwrap();
        let err = engine.update_tool_result(tu + 100, "ignored").await.unwrap_err();
        assert!(matches!(err, EngineError::ToolUseNotFound { .. }));

        let job = engine.get_job(&job_id).await.unwrap().unwrap();
        let uses = &job.tasks[0].tool_uses;
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].result.as_deref(), Some("final"));
        assert_eq!(last_tool_use(&job).unwrap().id, tu);
    }

    #[tokio::test]
    async fn stats_aggregate_tasks_and_tool_uses() {
        let engine = engine().await;
        let job_id = engine.create_job(None).await.unwrap();
        let t1 = engine.add_task(&job_id, "a").await.unwrap();
        engine.add_task(&job_id, "b").await.unwrap();
        engine
            .record_tool_use(t1, "echo", &serde_json::json!({}), Some("ok"))
            .await
            .unwrap();

        let stats = engine.get_job_stats(&job_id).await.unwrap();
        assert_eq!(stats.tasks_total, 2);
        assert_eq!(stats.tasks_pending, 2);
        assert_eq!(stats.tool_uses, 1);
        assert!(stats.elapsed_secs.is_none());

        let err = engine.get_job_stats("job_missing").await.unwrap_err();
        assert!(matches!(err, EngineError::JobNotFound { .. }));
    }
}
