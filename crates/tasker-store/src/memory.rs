//! In-memory task store.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{StoreError, Task, TaskStore};

/// Task store kept in process memory, in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: RwLock<Vec<Task>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.tasks.read().await.iter().map(|t| t.id.clone()).collect())
    }

    async fn get(&self, id: &str) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(StoreError::AlreadyExists(task.id.clone()));
        }
        tasks.push(task.clone());
        Ok(())
    }

    async fn set(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskStatus;

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let store = MemoryStore::new();
        store.create(&Task::new("a", "primes")).await.unwrap();

        let err = store.create(&Task::new("a", "delay")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == "a"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn list_preserves_insertion_order() {
        let store = MemoryStore::new();
        for id in ["task-3", "task-1", "task-2"] {
            store.create(&Task::new(id, "primes")).await.unwrap();
        }
        assert_eq!(store.list().await.unwrap(), vec!["task-3", "task-1", "task-2"]);
    }

    #[tokio::test]
    async fn set_replaces_in_place() {
        let store = MemoryStore::new();
        store.create(&Task::new("a", "primes")).await.unwrap();
        store.create(&Task::new("b", "primes")).await.unwrap();

        let mut a = store.get("a").await.unwrap();
        a.status = TaskStatus::Paused;
        store.set(&a).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().status, TaskStatus::Paused);
        assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        assert!(store.get("nope").await.unwrap_err().is_not_found());
    }
}
