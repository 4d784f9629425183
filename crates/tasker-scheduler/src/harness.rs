//! The execution harness: the in-process side of a dispatched task.
//!
//! The dispatcher starts a fresh process with a task id and forwarded
//! settings. That process rebuilds the scheduler configuration, opens the same
//! store, runs the payload and persists the outcome.

use tasker_store::{Task, TaskStore};
use tracing::{error, info};

use crate::{PayloadRegistry, SchedulerConfig, SchedulerError};

/// Entry point for a harness process.
///
/// `forwarded` is the JSON produced by [`SchedulerConfig::forwarded`]. The
/// harness never installs a cycle loop of its own.
#[tracing::instrument(skip(forwarded, registry))]
pub async fn run_task(
    task_id: &str,
    forwarded: &str,
    registry: &PayloadRegistry,
) -> Result<Task, SchedulerError> {
    let mut config = SchedulerConfig::default();
    config.apply_forwarded(forwarded)?;
    config.cycle.auto_install = false;

    let store = tasker_store::open(&config.storage)?;
    execute_task(store.as_ref(), task_id, registry).await
}

/// Load a task, run its payload and record completion.
///
/// On payload failure the stored task is left as it was and the error is
/// returned; the caller turns that into a non-zero exit.
pub async fn execute_task(
    store: &dyn TaskStore,
    task_id: &str,
    registry: &PayloadRegistry,
) -> Result<Task, SchedulerError> {
    let mut task = store.get(task_id).await?;

    let payload = registry
        .resolve(&task.payload_ref)
        .ok_or_else(|| SchedulerError::UnknownPayload(task.payload_ref.clone()))?;

    info!(task_id, payload = %task.payload_ref, "executing payload");
    let results = match payload.execute(&task.params).await {
        Ok(results) => results,
        Err(source) => {
            error!(task_id, error = %source, "payload failed");
            return Err(SchedulerError::PayloadFailed {
                task_id: task_id.to_string(),
                source,
            });
        }
    };

    task.complete(results);
    store.set(&task).await?;
    info!(task_id, "task complete");
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Payload, PayloadError};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tasker_store::{MemoryStore, Params, StorageConfig, TaskStatus};

    struct Sum;

    #[async_trait]
    impl Payload for Sum {
        async fn execute(&self, params: &Params) -> Result<Option<Value>, PayloadError> {
            let a = params.get("a").and_then(Value::as_i64).unwrap_or(0);
            let b = params.get("b").and_then(Value::as_i64).unwrap_or(0);
            Ok(Some(json!(a + b)))
        }
    }

    struct Quiet;

    #[async_trait]
    impl Payload for Quiet {
        async fn execute(&self, _params: &Params) -> Result<Option<Value>, PayloadError> {
            Ok(None)
        }
    }

    struct Broken;

    #[async_trait]
    impl Payload for Broken {
        async fn execute(&self, _params: &Params) -> Result<Option<Value>, PayloadError> {
            Err(PayloadError::Failed("boom".into()))
        }
    }

    fn registry() -> PayloadRegistry {
        PayloadRegistry::new()
            .with("sum", Sum)
            .with("quiet", Quiet)
            .with("broken", Broken)
    }

    async fn seeded(payload: &str) -> MemoryStore {
        let store = MemoryStore::new();
        let mut params = Params::new();
        params.insert("a".into(), json!(2));
        params.insert("b".into(), json!(3));
        store
            .create(&Task::new("task-1", payload).with_params(params))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn success_marks_complete_with_results() {
        let store = seeded("sum").await;

        let task = execute_task(&store, "task-1", &registry()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.results, Some(json!(5)));

        let stored = store.get("task-1").await.unwrap();
        assert_eq!(stored, task);
    }

    #[tokio::test]
    async fn success_without_results_still_completes() {
        let store = seeded("quiet").await;

        let task = execute_task(&store, "task-1", &registry()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.results, None);
    }

    #[tokio::test]
    async fn failure_leaves_task_untouched() {
        let store = seeded("broken").await;
        let before = store.get("task-1").await.unwrap();

        let err = execute_task(&store, "task-1", &registry()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::PayloadFailed { ref task_id, .. } if task_id == "task-1"));
        assert_eq!(store.get("task-1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn unknown_payload_fails_before_running() {
        let store = seeded("nope").await;

        let err = execute_task(&store, "task-1", &registry()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownPayload(ref name) if name == "nope"));
        assert_eq!(store.get("task-1").await.unwrap().status, TaskStatus::Wait);
    }

    #[tokio::test]
    async fn missing_task_fails_fast() {
        let store = MemoryStore::new();
        let err = execute_task(&store, "task-9", &registry()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Store(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn run_task_uses_forwarded_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig::json_file(dir.path().join("tasks.json"));
        let store = tasker_store::open(&storage).unwrap();
        store.create(&Task::new("task-1", "quiet")).await.unwrap();

        let mut config = SchedulerConfig::default();
        config.storage = storage;
        let forwarded = config.forwarded().unwrap();

        let task = run_task("task-1", &forwarded, &registry()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(store.get("task-1").await.unwrap().status, TaskStatus::Complete);
    }
}
