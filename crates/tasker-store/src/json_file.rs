//! JSON-file task store.
//!
//! All tasks live in one document. Every operation re-reads the file, so several
//! processes (the scheduler, CLI invocations and harness children) can share it.
//! Writes hold an exclusive lock on a `.lock` sidecar for the whole
//! read-modify-write, so no process overwrites records another one added.
//! Two writers of the same task still race; the later `set` wins.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::lock::FileLock;
use crate::{StoreError, Task, TaskStore};

/// Current document version.
const FILE_VERSION: u32 = 1;

/// Task file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskFile {
    version: u32,
    tasks: Vec<Task>,
}

impl Default for TaskFile {
    fn default() -> Self {
        Self {
            version: FILE_VERSION,
            tasks: Vec::new(),
        }
    }
}

/// Task store backed by a single JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Default document location.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join("tasker.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar file guarding read-modify-write across processes.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Hold both the in-process and the cross-process write locks.
    async fn lock(&self) -> Result<(tokio::sync::MutexGuard<'_, ()>, FileLock), StoreError> {
        let guard = self.write_lock.lock().await;
        let file_lock = FileLock::acquire(&self.lock_path()).await?;
        Ok((guard, file_lock))
    }

    /// Read the document. A missing file is an empty store.
    async fn read(&self) -> Result<TaskFile, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(path = %self.path.display(), "task file missing, treating as empty");
                return Ok(TaskFile::default());
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(TaskFile::default());
        }

        let file: TaskFile = serde_json::from_str(&content)?;
        if file.version != FILE_VERSION {
            return Err(StoreError::Unavailable(format!(
                "unsupported task file version {} in {}",
                file.version,
                self.path.display()
            )));
        }
        Ok(file)
    }

    /// Write the document via a temp file and rename.
    async fn write(&self, file: &TaskFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(file)?;

        // Per-process temp name so concurrent harness processes don't share it
        let temp_path = self
            .path
            .with_extension(format!("tmp.{}", std::process::id()));
        let mut temp = fs::File::create(&temp_path).await?;
        temp.write_all(content.as_bytes()).await?;
        temp.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;
        debug!(path = %self.path.display(), tasks = file.tasks.len(), "wrote task file");
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let file = self.read().await?;
        Ok(file.tasks.into_iter().map(|t| t.id).collect())
    }

    async fn get(&self, id: &str) -> Result<Task, StoreError> {
        let file = self.read().await?;
        file.tasks
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let _locks = self.lock().await?;
        let mut file = self.read().await?;
        if file.tasks.iter().any(|t| t.id == task.id) {
            return Err(StoreError::AlreadyExists(task.id.clone()));
        }
        file.tasks.push(task.clone());
        self.write(&file).await
    }

    async fn set(&self, task: &Task) -> Result<(), StoreError> {
        let _locks = self.lock().await?;
        let mut file = self.read().await?;
        match file.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => file.tasks.push(task.clone()),
        }
        self.write(&file).await
    }
}
