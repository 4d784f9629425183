//! Lifecycle notifications.

use std::fmt;

use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast channel capacity for task events.
/// Inline harness output is forwarded line by line, so leave room for bursts.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A lifecycle signal emitted by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// A task was persisted.
    Created(String),
    /// A waiting task is about to be dispatched.
    Run(String),
    /// The harness for a task was started (managed) or finished (inline).
    Started(String),
    /// A supervised task is still active.
    Checkin(String),
    /// A stopped, expired process was removed from the supervisor.
    Clean(String),
    /// A stopped process is not yet old enough to remove.
    CleanPending(String),
    /// A line of harness stdout (inline mode).
    Output { task_id: String, line: String },
    /// A failure that happened mid-cycle.
    Error(String),
    /// The cycle loop was installed.
    CycleStarted,
    /// The cycle loop was uninstalled.
    CycleStopped,
}

impl TaskEvent {
    /// Event name as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Created(_) => "created",
            TaskEvent::Run(_) => "run",
            TaskEvent::Started(_) => "started",
            TaskEvent::Checkin(_) => "checkin",
            TaskEvent::Clean(_) => "clean",
            TaskEvent::CleanPending(_) => "cleanPending",
            TaskEvent::Output { .. } => "output",
            TaskEvent::Error(_) => "error",
            TaskEvent::CycleStarted => "cycleStarted",
            TaskEvent::CycleStopped => "cycleStopped",
        }
    }

    /// The task this event refers to, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskEvent::Created(id)
            | TaskEvent::Run(id)
            | TaskEvent::Started(id)
            | TaskEvent::Checkin(id)
            | TaskEvent::Clean(id)
            | TaskEvent::CleanPending(id) => Some(id),
            TaskEvent::Output { task_id, .. } => Some(task_id),
            TaskEvent::Error(_) | TaskEvent::CycleStarted | TaskEvent::CycleStopped => None,
        }
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskEvent::Output { task_id, line } => write!(f, "output {} > {}", task_id, line),
            TaskEvent::Error(detail) => write!(f, "error: {}", detail),
            other => match other.task_id() {
                Some(id) => write!(f, "{} {}", other.name(), id),
                None => f.write_str(other.name()),
            },
        }
    }
}

/// Process-wide fan-out of task events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Send an event to all subscribers.
    pub fn emit(&self, event: TaskEvent) {
        if self.tx.send(event).is_err() {
            trace!("no subscribers for task event");
        }
    }
}
