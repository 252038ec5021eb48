//! Built-in task executors.

use async_trait::async_trait;

use crate::error::ExecutorError;
use crate::executor::{TaskContext, TaskExecutor};

/// Default demo executor: records one `echo` tool use with the task input,
/// then fills in its result. Useful for wiring checks and as a template for
/// real executors.
pub struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<String, ExecutorError> {
        tracing::debug!(job = %ctx.job_id(), task = ctx.task_id(), "Echoing task input");

        let tool_use_id = ctx
            .record_tool_use("echo", &serde_json::json!({"query": ctx.input()}), None)
            .await
            .map_err(|e| ExecutorError::Failed {
                reason: format!("recording tool use: {e}"),
            })?;

        let result = serde_json::json!({
            "success": true,
            "message": format!("Processed task: {}", ctx.input()),
        });
        ctx.update_tool_result(tool_use_id, &result.to_string())
            .await
            .map_err(|e| ExecutorError::Failed {
                reason: format!("updating tool result: {e}"),
            })?;

        Ok(format!("echoed {} bytes", ctx.input().len()))
    }
}
