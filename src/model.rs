//! Job / Task / ToolUse data model and the shared status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution status shared by jobs and tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created, not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with a failure.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl Status {
    /// Check if this status allows transitioning to another status.
    ///
    /// Terminal statuses allow no transitions at all.
    pub fn can_transition_to(&self, target: Status) -> bool {
        use Status::*;

        matches!(
            (self, target),
            (Pending, Running) | (Pending, Cancelled) |
            (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// All statuses from which `target` is reachable in one step.
    ///
    /// Used by the store to build conditional status updates: the update
    /// only commits when the current row status is in this set, which makes
    /// the transition itself the serialization point under concurrency.
    pub fn valid_predecessors(target: Status) -> &'static [Status] {
        use Status::*;
        match target {
            Pending => &[],
            Running => &[Pending],
            Completed | Failed => &[Running],
            Cancelled => &[Pending, Running],
        }
    }

    /// Database / wire string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// A top-level unit of work composed of ordered tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Externally visible job identifier (`job_<hex>`), distinct from any
    /// store-internal surrogate key.
    pub job_id: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Current status.
    pub status: Status,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// Set on the first run attempt. Present iff status is not pending.
    pub started_at: Option<DateTime<Utc>>,
    /// Set on reaching a terminal status. Present iff status is terminal.
    pub ended_at: Option<DateTime<Utc>>,
    /// Tasks in insertion order (= execution order).
    pub tasks: Vec<Task>,
}

/// One step within a job, executed sequentially.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier.
    pub id: i64,
    /// Owning job's external identifier.
    pub job_id: String,
    /// Instruction payload, interpreted by the task executor.
    pub content: String,
    pub status: Status,
    /// Failure detail captured when the executor fails.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Tool invocations recorded while executing this task, in insertion order.
    pub tool_uses: Vec<ToolUse>,
}

/// A record of one tool invocation made while executing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUse {
    /// Store-assigned identifier.
    pub id: i64,
    /// Owning task.
    pub task_id: i64,
    /// Name of the tool that was invoked.
    pub tool_name: String,
    /// Arguments passed to the tool. Key order is preserved as recorded.
    pub args: serde_json::Value,
    /// Result of the invocation; `None` while the call is in flight.
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregated per-job statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    pub job_id: String,
    pub status: Status,
    pub tasks_total: usize,
    pub tasks_pending: usize,
    pub tasks_running: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub tasks_cancelled: usize,
    pub tool_uses: usize,
    /// Seconds from start until end (or now, if still running). `None`
    /// before the first run attempt.
    pub elapsed_secs: Option<f64>,
}

impl JobStats {
    /// Compute stats from a fully loaded job.
    pub fn from_job(job: &Job) -> Self {
        let count = |s: Status| job.tasks.iter().filter(|t| t.status == s).count();
        let elapsed_secs = job.started_at.map(|start| {
            let end = job.ended_at.unwrap_or_else(Utc::now);
            let ms = end.signed_duration_since(start).num_milliseconds().max(0);
            ms as f64 / 1000.0
        });

        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            tasks_total: job.tasks.len(),
            tasks_pending: count(Status::Pending),
            tasks_running: count(Status::Running),
            tasks_completed: count(Status::Completed),
            tasks_failed: count(Status::Failed),
            tasks_cancelled: count(Status::Cancelled),
            tool_uses: job.tasks.iter().map(|t| t.tool_uses.len()).sum(),
            elapsed_secs,
        }
    }
}
