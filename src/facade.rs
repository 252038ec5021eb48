//! Agent-facing job tool — one entry point per logical action.
//!
//! Every method returns a structured JSON payload; failures surface as an
//! `{"error": ...}` object rather than a fault crossing the boundary. The
//! `execute` dispatcher mirrors how an agent invokes the tool with an
//! `action` string plus parameters.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::engine::JobEngine;
use crate::error::EngineError;
use crate::model::Status;
use crate::runner::JobRunner;

/// Facade over the engine and runner for external callers.
pub struct JobTool {
    engine: Arc<JobEngine>,
    runner: Arc<JobRunner>,
}

impl JobTool {
    pub fn new(engine: Arc<JobEngine>, runner: Arc<JobRunner>) -> Self {
        Self { engine, runner }
    }

    /// Create a new job.
    pub async fn create_job(&self, description: Option<&str>) -> Value {
        match self.engine.create_job(description).await {
            Ok(job_id) => json!({"job_id": job_id, "status": "created"}),
            Err(e) => error_payload(e),
        }
    }

    /// Add a task to a job.
    pub async fn add_task(&self, job_id: &str, content: &str) -> Value {
        match self.engine.add_task(job_id, content).await {
            Ok(task_id) => json!({"task_id": task_id, "status": "added"}),
            Err(e) => error_payload(e),
        }
    }

    /// Get a job with its tasks and tool uses.
    pub async fn get_job(&self, job_id: &str) -> Value {
        match self.engine.get_job(job_id).await {
            Ok(Some(job)) => serde_json::to_value(&job)
                .unwrap_or_else(|e| json!({"error": format!("serialization: {e}")})),
            Ok(None) => json!({"error": format!("Job {job_id} not found")}),
            Err(e) => error_payload(e),
        }
    }

    /// List jobs, optionally filtered by a status string.
    pub async fn list_jobs(&self, status: Option<&str>) -> Value {
        let filter = match status {
            Some(s) => match s.parse::<Status>() {
                Ok(status) => Some(status),
                Err(_) => return json!({"error": format!("Invalid status: {s}")}),
            },
            None => None,
        };

        match self.engine.list_jobs(filter).await {
            Ok(jobs) => json!({"jobs": jobs}),
            Err(e) => error_payload(e),
        }
    }

    /// Start running a job in the background.
    pub async fn run_job(&self, job_id: &str) -> Value {
        match self.runner.start_job(job_id).await {
            Ok(true) => json!({
                "message": format!("Job {job_id} started"),
                "status": "running",
            }),
            Ok(false) => json!({"error": format!("Failed to start job {job_id}")}),
            Err(e) => error_payload(e),
        }
    }

    /// Request cancellation of a job.
    pub async fn cancel_job(&self, job_id: &str) -> Value {
        match self.runner.cancel_job(job_id).await {
            Ok(true) => json!({
                "message": format!("Job {job_id} cancelled"),
                "status": "cancelled",
            }),
            Ok(false) => {
                json!({"error": format!("Could not cancel job {job_id} - already finished or not found")})
            }
            Err(e) => error_payload(e),
        }
    }

    /// Get aggregated statistics for a job.
    pub async fn get_job_stats(&self, job_id: &str) -> Value {
        match self.engine.get_job_stats(job_id).await {
            Ok(stats) => serde_json::to_value(&stats)
                .unwrap_or_else(|e| json!({"error": format!("serialization: {e}")})),
            Err(e) => error_payload(e),
        }
    }

    /// Dispatch on an `action` string with JSON parameters.
    pub async fn execute(&self, action: &str, params: &Value) -> Value {
        let str_param = |key: &str| params.get(key).and_then(|v| v.as_str());

        match action {
            "create_job" => self.create_job(str_param("description")).await,
            "add_task" => match (str_param("job_id"), str_param("content")) {
                (Some(job_id), Some(content)) => self.add_task(job_id, content).await,
                _ => json!({"error": "add_task requires job_id and content"}),
            },
            "get_job" => match str_param("job_id") {
                Some(job_id) => self.get_job(job_id).await,
                None => json!({"error": "get_job requires job_id"}),
            },
            "list_jobs" => self.list_jobs(str_param("status")).await,
            "run_job" => match str_param("job_id") {
                Some(job_id) => self.run_job(job_id).await,
                None => json!({"error": "run_job requires job_id"}),
            },
            "cancel_job" => match str_param("job_id") {
                Some(job_id) => self.cancel_job(job_id).await,
                None => json!({"error": "cancel_job requires job_id"}),
            },
            "get_job_stats" => match str_param("job_id") {
                Some(job_id) => self.get_job_stats(job_id).await,
                None => json!({"error": "get_job_stats requires job_id"}),
            },
            other => json!({"error": format!("Unknown action: {other}")}),
        }
    }

    /// JSON-schema parameter definition for agent function calling.
    pub fn parameters_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "description": "The action to perform",
                    "enum": [
                        "create_job", "add_task", "get_job", "list_jobs",
                        "run_job", "cancel_job", "get_job_stats"
                    ]
                },
                "job_id": {
                    "type": "string",
                    "description": "Job ID for the operation"
                },
                "description": {
                    "type": "string",
                    "description": "Description for a new job"
                },
                "content": {
                    "type": "string",
                    "description": "Content for a new task"
                },
                "status": {
                    "type": "string",
                    "description": "Status filter for listing jobs",
                    "enum": ["pending", "running", "completed", "failed", "cancelled"]
                }
            },
            "required": ["action"]
        })
    }
}

fn error_payload(e: EngineError) -> Value {
    json!({"error": e.to_string()})
}
