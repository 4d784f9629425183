//! Error types for task storage.

use thiserror::Error;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error reading or writing the backing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Task not found.
    #[error("task not found: {0}")]
    NotFound(String),

    /// A task with this id already exists.
    #[error("task already exists: {0}")]
    AlreadyExists(String),

    /// The backing store is unusable (corrupt document, unsupported version).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this error reports a missing task.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
