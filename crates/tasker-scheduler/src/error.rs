//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] tasker_store::StoreError),

    /// Supervisor error.
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// Dispatch error.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Invalid configuration or configuration path.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Requested status change is not allowed.
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    /// No payload registered under this name.
    #[error("unknown payload: {0}")]
    UnknownPayload(String),

    /// The payload ran and failed.
    #[error("task {task_id} failed: {source}")]
    PayloadFailed {
        task_id: String,
        #[source]
        source: PayloadError,
    },

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the external process supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("supervisor binary not found: {0}")]
    BinaryNotFound(String),

    #[error("supervisor command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("not connected to supervisor")]
    NotConnected,

    #[error("process not found: {0}")]
    ProcessNotFound(String),

    #[error("invalid supervisor output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from starting a task's harness.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to spawn harness for {task_id}: {source}")]
    Spawn {
        task_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("harness for {task_id} exited with {}: {stderr}", match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    })]
    HarnessFailed {
        task_id: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("supervisor rejected {task_id}: {source}")]
    Supervisor {
        task_id: String,
        #[source]
        source: SupervisorError,
    },

    #[error("cannot resolve harness command: {0}")]
    Harness(String),
}

/// Failure reported by a payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}
