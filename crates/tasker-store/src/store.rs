//! The task store contract.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{JsonFileStore, MemoryStore, StoreError, Task};

/// Durable keyed persistence for tasks.
///
/// `create` must make the new id visible to a subsequent `list`. Nothing here
/// provides an atomic read-modify-write: a caller doing `get` then `set` can lose
/// an update made by another process in between.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All task ids, in store order.
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Fetch a task by id.
    async fn get(&self, id: &str) -> Result<Task, StoreError>;

    /// Persist a new task. Fails with `AlreadyExists` on an id collision.
    async fn create(&self, task: &Task) -> Result<(), StoreError>;

    /// Insert or replace a task.
    async fn set(&self, task: &Task) -> Result<(), StoreError>;
}

/// Which store adapter to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageDriver {
    /// Single JSON document on disk.
    #[default]
    JsonFile,
    /// Process-local map. Not reachable from spawned harness processes.
    Memory,
}

/// Storage settings. These are forwarded to harness processes so they reach the
/// same store as the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub driver: StorageDriver,
    /// Path of the JSON document; defaults to `tasker.json` in the temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// A JSON-file store at the given path.
    pub fn json_file(path: impl Into<PathBuf>) -> Self {
        Self {
            driver: StorageDriver::JsonFile,
            path: Some(path.into()),
        }
    }

    /// Resolved document path for the JSON-file driver.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(JsonFileStore::default_path)
    }
}

/// Open the store described by `config`.
pub fn open(config: &StorageConfig) -> Result<Arc<dyn TaskStore>, StoreError> {
    match config.driver {
        StorageDriver::JsonFile => Ok(Arc::new(JsonFileStore::new(config.resolved_path()))),
        StorageDriver::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
