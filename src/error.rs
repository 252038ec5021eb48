//! Error types for the job engine.

use crate::model::Status;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
}

/// Storage backend errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Engine-level errors: identifier resolution and state-machine violations.
///
/// Operations where callers are expected to handle a lost status race return
/// `Ok(false)` instead of `InvalidState`; the variant is reserved for
/// operations with no boolean channel (e.g. adding a task to a terminal job).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Job {id} not found")]
    JobNotFound { id: String },

    #[error("Task {id} not found")]
    TaskNotFound { id: i64 },

    #[error("Tool use {id} not found")]
    ToolUseNotFound { id: i64 },

    #[error("Job {id} is {status}, cannot {operation}")]
    InvalidState {
        id: String,
        status: Status,
        operation: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Task executor errors, scoped to a single task.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("No executor registered under name {name}")]
    UnknownExecutor { name: String },

    #[error("Task execution failed: {reason}")]
    Failed { reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
