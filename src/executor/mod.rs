//! Task executor abstraction — the pluggable per-task body.
//!
//! The runner never interprets task content itself; it resolves an executor
//! from the registry and hands it a [`TaskContext`] through which the body
//! can record tool uses against the engine.

pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::JobEngine;
use crate::error::{EngineError, ExecutorError};

/// Executor used when task content does not name one explicitly.
pub const DEFAULT_EXECUTOR: &str = "echo";

/// A pluggable task body.
///
/// Failures are returned, not panicked: the runner converts an `Err` into a
/// `failed` task status and captures the reason on the task record.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Registry name of this executor.
    fn name(&self) -> &str;

    /// Execute one task. The returned string is a human-readable summary of
    /// what was done.
    async fn execute(&self, ctx: &TaskContext) -> Result<String, ExecutorError>;
}

impl std::fmt::Debug for dyn TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskExecutor({})", self.name())
    }
}

/// Execution context handed to a task body.
///
/// Wraps the engine so the body can record tool invocations without seeing
/// the rest of the engine surface.
pub struct TaskContext {
    engine: Arc<JobEngine>,
    job_id: String,
    task_id: i64,
    input: String,
}

impl TaskContext {
    pub fn new(engine: Arc<JobEngine>, job_id: String, task_id: i64, input: String) -> Self {
        Self {
            engine,
            job_id,
            task_id,
            input,
        }
    }

    /// The owning job's external id.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The task being executed.
    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    /// Instruction payload for this task (content, or the `input` field of
    /// structured content).
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Record a tool invocation under this task. Pass `result: None` while
    /// the call is in flight and fill it in later.
    pub async fn record_tool_use(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
        result: Option<&str>,
    ) -> Result<i64, EngineError> {
        self.engine
            .record_tool_use(self.task_id, tool_name, args, result)
            .await
    }

    /// Set (or overwrite) a recorded tool use's result.
    pub async fn update_tool_result(
        &self,
        tool_use_id: i64,
        result: &str,
    ) -> Result<(), EngineError> {
        self.engine.update_tool_result(tool_use_id, result).await
    }
}

/// How a task's content routes to an executor.
///
/// Plain text goes to [`DEFAULT_EXECUTOR`]; a JSON object of the form
/// `{"executor": "name", "input": "..."}` dispatches by name.
pub fn route_content(content: &str) -> (String, String) {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(content) {
        if let Some(name) = map.get("executor").and_then(|v| v.as_str()) {
            let input = match map.get("input") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            return (name.to_string(), input);
        }
    }
    (DEFAULT_EXECUTOR.to_string(), content.to_string())
}

/// Registry of available task executors.
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn TaskExecutor>>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with the built-in executors installed.
    pub async fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(builtin::EchoExecutor)).await;
        registry
    }

    /// Register an executor under its own name.
    pub async fn register(&self, executor: Arc<dyn TaskExecutor>) {
        let name = executor.name().to_string();
        self.executors.write().await.insert(name.clone(), executor);
        tracing::debug!(executor = %name, "Registered executor");
    }

    /// Look up an executor by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.read().await.get(name).cloned()
    }

    /// Resolve an executor, failing with `UnknownExecutor` when absent.
    pub async fn resolve(&self, name: &str) -> Result<Arc<dyn TaskExecutor>, ExecutorError> {
        self.get(name)
            .await
            .ok_or_else(|| ExecutorError::UnknownExecutor { name: name.into() })
    }

    /// List registered executor names.
    pub async fn list(&self) -> Vec<String> {
        self.executors.read().await.keys().cloned().collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl TaskExecutor for Named {
        fn name(&self) -> &str {
            self.0
        }
        async fn execute(&self, _ctx: &TaskContext) -> Result<String, ExecutorError> {
            Ok("ok".into())
        }
    }

    #[tokio::test]
    async fn register_and_resolve() {
        let registry = ExecutorRegistry::new();
        registry.register(Arc::new(Named("alpha"))).await;

        assert!(registry.get("alpha").await.is_some());
        assert!(registry.get("beta").await.is_none());
        assert_eq!(registry.list().await, vec!["alpha".to_string()]);
        let err = registry.resolve("beta").await.unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownExecutor { .. }));
    }

    #[tokio::test]
    async fn builtins_include_echo() {
        let registry = ExecutorRegistry::with_builtins().await;
        assert!(registry.get(DEFAULT_EXECUTOR).await.is_some());
    }

    #[test]
    fn plain_content_routes_to_default() {
        let (name, input) = route_content("summarize the report");
        assert_eq!(name, DEFAULT_EXECUTOR);
        assert_eq!(input, "summarize the report");
    }

    #[test]
    fn structured_content_routes_by_name() {
        let (name, input) = route_content(r#"{"executor": "scraper", "input": "https://x"}"#);
        assert_eq!(name, "scraper");
        assert_eq!(input, "https://x");
    }

    #[test]
    fn structured_content_without_input() {
        let (name, input) = route_content(r#"{"executor": "noop"}"#);
        assert_eq!(name, "noop");
        assert_eq!(input, "");
    }

    #[test]
    fn json_without_executor_key_is_plain_content() {
        let raw = r#"{"query": "x"}"#;
        let (name, input) = route_content(raw);
        assert_eq!(name, DEFAULT_EXECUTOR);
        assert_eq!(input, raw);
    }
}
