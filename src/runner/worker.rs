//! Per-job worker — drives one job's tasks sequentially.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, warn};

use crate::engine::{EntityRef, JobEngine};
use crate::error::EngineError;
use crate::executor::{ExecutorRegistry, TaskContext, route_content};
use crate::model::Status;
use crate::runner::RunningMap;
use crate::runner::TrackedJob;

/// Executes a single job: tasks in insertion order, cancellation checked at
/// task boundaries only. A task body that never returns therefore blocks
/// this job's cancellation indefinitely; the worker never preempts a
/// suspended body.
pub struct Worker {
    engine: Arc<JobEngine>,
    executors: Arc<ExecutorRegistry>,
    job_id: String,
    cancel: Arc<AtomicBool>,
    running: RunningMap,
}

impl Worker {
    pub(crate) fn new(
        engine: Arc<JobEngine>,
        executors: Arc<ExecutorRegistry>,
        job_id: String,
        cancel: Arc<AtomicBool>,
        running: RunningMap,
    ) -> Self {
        Self {
            engine,
            executors,
            job_id,
            cancel,
            running,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Run the job to a terminal status. Never propagates errors: a storage
    /// failure aborts this run, best-effort marks the job failed, and is
    /// logged. Always deregisters from the running-map as the final step.
    pub async fn run(self) {
        debug!(job = %self.job_id, "Worker starting");

        match self.run_inner().await {
            Ok(status) => {
                info!(job = %self.job_id, status = %status, "Job finished");
            }
            Err(e) => {
                error!(job = %self.job_id, error = %e, "Job run aborted on storage failure");
                // Leave the job in its last durable state if even this fails.
                match self
                    .engine
                    .update_status(EntityRef::Job(&self.job_id), Status::Failed)
                    .await
                {
                    Ok(_) => {}
                    Err(e) => {
                        error!(job = %self.job_id, error = %e, "Could not mark job failed");
                    }
                }
            }
        }

        TrackedJob::remove_from(&self.running, &self.job_id).await;
    }

    async fn run_inner(&self) -> Result<Status, EngineError> {
        let job = match self.engine.get_job(&self.job_id).await? {
            Some(job) => job,
            None => {
                // start_job verified existence; a vanished row means the
                // store was swapped underneath us. Still attempt the failed
                // transition so a reappearing row is not left running.
                warn!(job = %self.job_id, "Job disappeared before execution");
                self.engine
                    .update_status(EntityRef::Job(&self.job_id), Status::Failed)
                    .await?;
                return Ok(Status::Failed);
            }
        };

        let mut any_failed = false;

        for task in job.tasks.iter().filter(|t| !t.status.is_terminal()) {
            if self.cancelled() {
                return self.finish_cancelled().await;
            }

            // A lost flip means the task changed underneath us (e.g. a
            // cancel sweep); skip it rather than execute a non-pending task.
            if !self
                .engine
                .update_status(EntityRef::Task(task.id), Status::Running)
                .await?
            {
                debug!(job = %self.job_id, task = task.id, "Skipping task: no longer pending");
                continue;
            }

            match self.execute_task(task.id, &task.content).await {
                Ok(summary) => {
                    debug!(job = %self.job_id, task = task.id, %summary, "Task completed");
                    self.engine
                        .update_status(EntityRef::Task(task.id), Status::Completed)
                        .await?;
                }
                Err(reason) => {
                    warn!(job = %self.job_id, task = task.id, %reason, "Task failed");
                    any_failed = true;
                    self.engine.record_task_error(task.id, &reason).await?;
                    self.engine
                        .update_status(EntityRef::Task(task.id), Status::Failed)
                        .await?;
                    // No retries: a failed task fails the job and later
                    // tasks are never started.
                    break;
                }
            }
        }

        if self.cancelled() {
            return self.finish_cancelled().await;
        }

        let final_status = if any_failed {
            Status::Failed
        } else {
            Status::Completed
        };
        self.engine
            .update_status(EntityRef::Job(&self.job_id), final_status)
            .await?;
        Ok(final_status)
    }

    /// Invoke the pluggable task body. Failures come back as a reason
    /// string; they fail this task only, never the process.
    async fn execute_task(&self, task_id: i64, content: &str) -> Result<String, String> {
        let (executor_name, input) = route_content(content);
        let executor = self
            .executors
            .resolve(&executor_name)
            .await
            .map_err(|e| e.to_string())?;

        let ctx = TaskContext::new(
            self.engine.clone(),
            self.job_id.clone(),
            task_id,
            input,
        );
        executor.execute(&ctx).await.map_err(|e| e.to_string())
    }

    /// Cancellation observed at a task boundary: stop iterating and mark the
    /// job and its remaining tasks cancelled. A no-op when the cancel
    /// request already did the marking.
    async fn finish_cancelled(&self) -> Result<Status, EngineError> {
        let _ = self.engine.cancel_job(&self.job_id).await?;
        Ok(Status::Cancelled)
    }
}
