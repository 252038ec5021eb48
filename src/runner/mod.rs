//! Job runner — concurrent background execution of jobs.
//!
//! One tokio task per running job; tasks within a job run strictly
//! sequentially. The runner's only shared mutable state is the running-map
//! (job id → cancellation flag + join handle), guarded by a single mutex.
//! Starting a job passes two gates in order: a slot reservation in the
//! running-map (checked and inserted under one lock hold, which is what
//! makes `max_parallel_jobs` exact under concurrent starts) and then the
//! `pending -> running` store transition, whose single winner is the only
//! caller whose worker ever runs.

pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::{EntityRef, JobEngine};
use crate::error::EngineError;
use crate::executor::ExecutorRegistry;
use crate::model::Status;
use crate::runner::worker::Worker;

/// A job currently executing in the background.
pub(crate) struct TrackedJob {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Shared running-map type, also held by each worker so it can deregister
/// itself as its final step.
pub(crate) type RunningMap = Arc<Mutex<HashMap<String, TrackedJob>>>;

/// Orchestrates background execution of jobs against a [`JobEngine`].
pub struct JobRunner {
    engine: Arc<JobEngine>,
    executors: Arc<ExecutorRegistry>,
    max_parallel_jobs: usize,
    running: RunningMap,
}

impl JobRunner {
    /// Create a runner bound to an engine and an executor registry.
    pub fn new(
        engine: Arc<JobEngine>,
        executors: Arc<ExecutorRegistry>,
        max_parallel_jobs: usize,
    ) -> Self {
        Self {
            engine,
            executors,
            max_parallel_jobs,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start executing a job in the background. Returns immediately.
    ///
    /// Returns `false` when the job is unknown, already running, already
    /// terminal, or the runner is at capacity.
    pub async fn start_job(&self, job_id: &str) -> Result<bool, EngineError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (start_tx, start_rx) = oneshot::channel();
        let worker = Worker::new(
            self.engine.clone(),
            self.executors.clone(),
            job_id.to_string(),
            cancel.clone(),
            self.running.clone(),
        );

        // The worker blocks on the start signal until its running-map entry
        // exists, so it cannot try to deregister before registration. If the
        // sender is dropped on any refusal path below, the task exits without
        // ever running the worker.
        let handle = tokio::spawn(async move {
            if start_rx.await.is_err() {
                return;
            }
            worker.run().await;
        });

        // Reserve the slot: the capacity check and the map insert happen in
        // one critical section, so N concurrent starts can never pass the
        // check together and overshoot the limit.
        {
            let mut running = self.running.lock().await;
            if running.contains_key(job_id) {
                warn!(job = %job_id, "Job is already running");
                return Ok(false);
            }
            if running.len() >= self.max_parallel_jobs {
                warn!(
                    job = %job_id,
                    max = self.max_parallel_jobs,
                    "Maximum parallel jobs reached"
                );
                return Ok(false);
            }
            running.insert(job_id.to_string(), TrackedJob { cancel, handle });
        }

        // The conditional pending -> running flip is the exclusion gate.
        // Exactly one concurrent caller wins it; everyone else gets false.
        // A loser gives its reserved slot back.
        let flipped = self
            .engine
            .update_status(EntityRef::Job(job_id), Status::Running)
            .await;
        match flipped {
            Ok(true) => {}
            Ok(false) => {
                TrackedJob::remove_from(&self.running, job_id).await;
                return Ok(false);
            }
            Err(e) => {
                TrackedJob::remove_from(&self.running, job_id).await;
                return Err(e);
            }
        }

        let _ = start_tx.send(());

        info!(job = %job_id, "Started job");
        Ok(true)
    }

    /// Request cancellation of a job.
    ///
    /// If the job is executing here, its cooperative flag is raised first;
    /// the flag is only checked at task boundaries, so a task body that
    /// never returns will block that job's cancellation indefinitely. The
    /// returned bool is the engine's verdict, which guarantees exactly one
    /// `true` across concurrent cancel requests.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool, EngineError> {
        let flag = {
            let running = self.running.lock().await;
            running.get(job_id).map(|t| t.cancel.clone())
        };

        if let Some(flag) = flag {
            flag.store(true, Ordering::SeqCst);
        }

        let won = self.engine.cancel_job(job_id).await?;
        if won {
            info!(job = %job_id, "Cancelled job");
        }
        Ok(won)
    }

    /// Check whether a job is executing in this runner.
    pub async fn is_running(&self, job_id: &str) -> bool {
        self.running.lock().await.contains_key(job_id)
    }

    /// Number of jobs currently executing.
    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Signal cancellation to every running job and wait for all their
    /// background tasks to finish. After this returns the running-map is
    /// empty and no background work survives.
    pub async fn shutdown(&self) {
        let tracked: Vec<(String, TrackedJob)> = {
            let mut running = self.running.lock().await;
            running.drain().collect()
        };

        if tracked.is_empty() {
            return;
        }
        info!(jobs = tracked.len(), "Shutting down runner");

        let mut handles = Vec::with_capacity(tracked.len());
        for (job_id, job) in tracked {
            job.cancel.store(true, Ordering::SeqCst);
            handles.push(async move {
                if job.handle.await.is_err() {
                    warn!(job = %job_id, "Worker task panicked during shutdown");
                }
            });
        }
        join_all(handles).await;

        info!("Runner shut down");
    }
}

impl TrackedJob {
    /// Deregister hook used by workers; removal happens under the same lock
    /// that guarded insertion.
    pub(crate) async fn remove_from(map: &RunningMap, job_id: &str) {
        map.lock().await.remove(job_id);
    }
}
