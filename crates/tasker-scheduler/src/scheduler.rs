//! The cycle engine and task API.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tasker_store::{NewTask, StoreError, Task, TaskStatus, TaskStore};
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    Dispatcher, EventBus, ExecMode, Pm2Supervisor, ReconcileReport, SchedulerConfig,
    SchedulerError, Supervisor, TaskEvent, allocate_id, reconcile,
};

/// How many generated ids to try before giving up on a creation race.
const MAX_ID_ATTEMPTS: usize = 8;

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Tasks handed to the dispatcher successfully.
    pub dispatched: Vec<String>,
    /// Tasks that were not waiting, or are still supervised.
    pub skipped: Vec<String>,
    /// Tasks whose dispatch failed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Outcome of the cleanup pass, when one ran.
    pub reconcile: Option<ReconcileReport>,
    /// This call found a cycle in flight and folded into it.
    pub coalesced: bool,
}

impl CycleReport {
    fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Default::default()
        }
    }
}

struct Inner {
    store: Arc<dyn TaskStore>,
    config: RwLock<SchedulerConfig>,
    supervisor: Arc<dyn Supervisor>,
    events: EventBus,
    /// Held for the duration of a cycle.
    cycle_lock: Mutex<()>,
    /// Set when a cycle was requested while one was in flight.
    rerun: AtomicBool,
    /// Stop signal for the installed cycle loop.
    timer: Mutex<Option<watch::Sender<bool>>>,
}

/// The task scheduler.
///
/// Cheap to clone; clones share the store, configuration, event bus and timer.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler over an open store, supervised by `pm2`.
    pub fn new(store: Arc<dyn TaskStore>, config: SchedulerConfig) -> Self {
        Self::with_supervisor(store, config, Arc::new(Pm2Supervisor::default()))
    }

    /// Create a scheduler with an explicit supervisor.
    pub fn with_supervisor(
        store: Arc<dyn TaskStore>,
        config: SchedulerConfig,
        supervisor: Arc<dyn Supervisor>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config: RwLock::new(config),
                supervisor,
                events: EventBus::new(),
                cycle_lock: Mutex::new(()),
                rerun: AtomicBool::new(false),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Open the configured store and build a scheduler. Starts the cycle loop
    /// when `cycle.auto_install` is set.
    pub async fn setup(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let store = tasker_store::open(&config.storage)?;
        let auto_install = config.cycle.auto_install;
        let scheduler = Self::new(store, config);
        if auto_install {
            scheduler.start().await;
        }
        Ok(scheduler)
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> SchedulerConfig {
        self.inner.config.read().await.clone()
    }

    /// Read a setting by dotted path.
    pub async fn get_config(&self, path: &str) -> Result<Value, SchedulerError> {
        self.inner.config.read().await.get(path)
    }

    /// Replace a setting by dotted path. Takes effect from the next cycle;
    /// storage settings only affect harness processes, not the open store.
    pub async fn set_config(&self, path: &str, value: Value) -> Result<(), SchedulerError> {
        self.inner.config.write().await.set(path, value)?;
        debug!(path, "configuration updated");
        Ok(())
    }

    /// Persist a new task, allocating an id from the naming template if none
    /// was given.
    #[tracing::instrument(skip(self, new_task), fields(payload = %new_task.payload_ref))]
    pub async fn create(&self, new_task: NewTask) -> Result<Task, SchedulerError> {
        if let Some(status) = new_task.status
            && status == TaskStatus::Complete
        {
            return Err(SchedulerError::InvalidStatus(
                "tasks cannot be created complete".to_string(),
            ));
        }

        let store = self.inner.store.as_ref();
        let task = match new_task.id.clone() {
            Some(id) => {
                let task = new_task.into_task(id);
                store.create(&task).await?;
                task
            }
            None => {
                let naming = self.inner.config.read().await.naming.clone();
                let mut attempt = 1;
                loop {
                    let id = allocate_id(store, &naming).await?;
                    let task = new_task.clone().into_task(id);
                    match store.create(&task).await {
                        Ok(()) => break task,
                        Err(StoreError::AlreadyExists(id)) if attempt < MAX_ID_ATTEMPTS => {
                            debug!(id = %id, attempt, "allocated id was taken, retrying");
                            attempt += 1;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        };

        info!(task_id = %task.id, status = %task.status, "created task");
        self.inner.events.emit(TaskEvent::Created(task.id.clone()));
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<Task, SchedulerError> {
        Ok(self.inner.store.get(id).await?)
    }

    /// All task ids, in store order.
    pub async fn list(&self) -> Result<Vec<String>, SchedulerError> {
        Ok(self.inner.store.list().await?)
    }

    /// Pause or resume a task. Only the harness completes tasks.
    pub async fn set_status(&self, id: &str, status: TaskStatus) -> Result<Task, SchedulerError> {
        if status == TaskStatus::Complete {
            return Err(SchedulerError::InvalidStatus(format!(
                "cannot mark {} complete by hand",
                id
            )));
        }

        let mut task = self.inner.store.get(id).await?;
        task.status = status;
        self.inner.store.set(&task).await?;
        info!(task_id = id, status = %status, "task status changed");
        Ok(task)
    }

    /// Run one cycle.
    ///
    /// If a cycle is already in flight this returns immediately with a
    /// coalesced report, and the running cycle makes one more pass when it
    /// finishes. The report of the final pass is returned to the caller that
    /// ran it.
    #[tracing::instrument(skip(self))]
    pub async fn cycle(&self) -> Result<CycleReport, SchedulerError> {
        let mut result = Ok(CycleReport::coalesced());
        loop {
            let guard = match self.inner.cycle_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    self.inner.rerun.store(true, Ordering::SeqCst);
                    // The holder may have released between the attempts, in
                    // which case nobody is left to see the flag.
                    match self.inner.cycle_lock.try_lock() {
                        Ok(guard) => guard,
                        Err(_) => {
                            debug!("cycle in flight, coalescing");
                            return result;
                        }
                    }
                }
            };

            // Pending requests are served by the pass about to run.
            self.inner.rerun.store(false, Ordering::SeqCst);
            result = self.run_cycle_once().await;
            while self.inner.rerun.swap(false, Ordering::SeqCst) {
                debug!("running coalesced cycle");
                result = self.run_cycle_once().await;
            }
            drop(guard);

            // A caller may have set the flag after the last swap but before the
            // lock was released; it was told its request would run.
            if !self.inner.rerun.swap(false, Ordering::SeqCst) {
                return result;
            }
        }
    }

    /// Wait for any in-flight cycle to settle.
    pub async fn wait_idle(&self) {
        let _guard = self.inner.cycle_lock.lock().await;
    }

    async fn run_cycle_once(&self) -> Result<CycleReport, SchedulerError> {
        let inner = &self.inner;

        let ids = match inner.store.list().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to list tasks");
                inner
                    .events
                    .emit(TaskEvent::Error(format!("listing tasks: {}", e)));
                return Err(e.into());
            }
        };

        let config = inner.config.read().await.clone();
        let mut report = CycleReport::default();

        if config.exec.mode == ExecMode::Managed && config.clean.enabled {
            match reconcile(
                inner.supervisor.as_ref(),
                &ids,
                config.clean.expiry.as_duration(),
                &inner.events,
            )
            .await
            {
                Ok(cleanup) => report.reconcile = Some(cleanup),
                Err(e) => {
                    warn!(error = %e, "cleanup failed");
                    inner.events.emit(TaskEvent::Error(format!("cleanup: {}", e)));
                }
            }
        }

        if ids.is_empty() {
            debug!("no tasks");
            return Ok(report);
        }

        let prepared = config.forwarded().and_then(|forwarded| {
            let dispatcher =
                Dispatcher::from_config(&config, inner.supervisor.clone(), inner.events.clone())?;
            Ok((forwarded, dispatcher))
        });
        let (forwarded, dispatcher) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(error = %e, "cannot prepare dispatch");
                inner.events.emit(TaskEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        let supervised = match dispatcher.begin_cycle().await {
            Ok(supervised) => supervised,
            Err(e) => {
                error!(error = %e, "cannot reach supervisor");
                inner
                    .events
                    .emit(TaskEvent::Error(format!("supervisor: {}", e)));
                return Err(e.into());
            }
        };

        for id in &ids {
            match self.promote(&dispatcher, &supervised, id, &forwarded).await {
                Ok(true) => report.dispatched.push(id.clone()),
                Ok(false) => report.skipped.push(id.clone()),
                Err(e) => {
                    error!(task_id = %id, error = %e, "task dispatch failed");
                    inner.events.emit(TaskEvent::Error(format!("{}: {}", id, e)));
                    report.failed.push((id.clone(), e.to_string()));
                }
            }
        }

        dispatcher.end_cycle().await;

        info!(
            dispatched = report.dispatched.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "cycle complete"
        );
        Ok(report)
    }

    /// Dispatch one task if it is waiting. Returns whether it was dispatched.
    async fn promote(
        &self,
        dispatcher: &Dispatcher,
        supervised: &HashSet<String>,
        id: &str,
        forwarded: &str,
    ) -> Result<bool, SchedulerError> {
        let task = self.inner.store.get(id).await?;
        if !task.is_waiting() {
            return Ok(false);
        }
        if supervised.contains(id) {
            debug!(task_id = id, "already supervised, not starting again");
            return Ok(false);
        }

        self.inner.events.emit(TaskEvent::Run(id.to_string()));
        dispatcher.dispatch(id, forwarded).await?;
        Ok(true)
    }

    /// Install the cycle loop. Runs a cycle right away, then again each
    /// `cycle.duration` after the previous one settles. No-op if running.
    pub async fn start(&self) {
        let mut timer = self.inner.timer.lock().await;
        if timer.is_some() {
            debug!("cycle loop already running");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run_loop(stop_rx).await });
        *timer = Some(stop_tx);

        info!("cycle loop started");
        self.inner.events.emit(TaskEvent::CycleStarted);
    }

    /// Uninstall the cycle loop. A cycle already in flight runs to completion.
    /// No-op if not running.
    pub async fn stop(&self) {
        let Some(stop_tx) = self.inner.timer.lock().await.take() else {
            debug!("cycle loop not running");
            return;
        };

        let _ = stop_tx.send(true);

        info!("cycle loop stopped");
        self.inner.events.emit(TaskEvent::CycleStopped);
    }

    /// Whether the cycle loop is installed.
    pub async fn is_running(&self) -> bool {
        self.inner.timer.lock().await.is_some()
    }

    async fn run_loop(self, mut stop_rx: watch::Receiver<bool>) {
        loop {
            if *stop_rx.borrow() {
                break;
            }

            if let Err(e) = self.cycle().await {
                warn!(error = %e, "cycle failed");
            }

            if *stop_rx.borrow() {
                break;
            }

            let delay = self.inner.config.read().await.cycle.duration.as_duration();
            debug!(?delay, "next cycle armed");
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sleep(delay) => {}
            }
        }

        debug!("cycle loop exited");
    }
}
