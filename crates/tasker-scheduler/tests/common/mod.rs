//! Shared fakes for scheduler integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tasker_scheduler::{
    ProcessInfo, ProcessSpec, ProcessStatus, Supervisor, SupervisorError, TaskEvent,
};
use tasker_store::{MemoryStore, StoreError, Task, TaskStore};
use tokio::sync::{Notify, broadcast};

/// In-memory supervisor that records every call.
#[derive(Default)]
pub struct RecordingSupervisor {
    processes: Mutex<Vec<ProcessInfo>>,
    started: Mutex<Vec<ProcessSpec>>,
    deleted: Mutex<Vec<String>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    fail_delete: AtomicBool,
    fail_connect: AtomicBool,
    /// When set, the next `connect` signals `entered` and waits on the gate.
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl RecordingSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_process(&self, name: &str, status: ProcessStatus, created_at: DateTime<Utc>) {
        self.processes.lock().unwrap().push(ProcessInfo {
            name: name.to_string(),
            status,
            created_at,
        });
    }

    pub fn set_status(&self, name: &str, status: ProcessStatus) {
        for process in self.processes.lock().unwrap().iter_mut() {
            if process.name == name {
                process.status = status.clone();
            }
        }
    }

    pub fn process_names(&self) -> Vec<String> {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn started(&self) -> Vec<ProcessSpec> {
        self.started.lock().unwrap().clone()
    }

    pub fn started_names(&self) -> Vec<String> {
        self.started().into_iter().map(|s| s.name).collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn fail_deletes(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    pub fn fail_connects(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    /// Block the next `connect`. Returns (entered, release).
    pub fn hold_next_connect(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some((entered.clone(), release.clone()));
        (entered, release)
    }
}

#[async_trait]
impl Supervisor for RecordingSupervisor {
    async fn connect(&self) -> Result<(), SupervisorError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SupervisorError::BinaryNotFound("pm2".into()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProcessInfo>, SupervisorError> {
        Ok(self.processes.lock().unwrap().clone())
    }

    async fn start(&self, spec: &ProcessSpec) -> Result<(), SupervisorError> {
        self.started.lock().unwrap().push(spec.clone());
        self.processes.lock().unwrap().push(ProcessInfo {
            name: spec.name.clone(),
            status: ProcessStatus::Online,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), SupervisorError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(SupervisorError::CommandFailed {
                command: format!("pm2 delete {}", name),
                stderr: "refused".into(),
            });
        }
        let mut processes = self.processes.lock().unwrap();
        let before = processes.len();
        processes.retain(|p| p.name != name);
        if processes.len() == before {
            return Err(SupervisorError::ProcessNotFound(name.to_string()));
        }
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SupervisorError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Memory store with injectable failures.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_list: AtomicBool,
    broken: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_list(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    pub fn break_task(&self, id: &str) {
        self.broken.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("list refused".into()));
        }
        self.inner.list().await
    }

    async fn get(&self, id: &str) -> Result<Task, StoreError> {
        if self.broken.lock().unwrap().contains(id) {
            return Err(StoreError::Unavailable(format!("{} unreadable", id)));
        }
        self.inner.get(id).await
    }

    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        self.inner.create(task).await
    }

    async fn set(&self, task: &Task) -> Result<(), StoreError> {
        self.inner.set(task).await
    }
}

/// Everything currently buffered on a receiver.
pub fn drain(rx: &mut broadcast::Receiver<TaskEvent>) -> Vec<TaskEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
