//! Cycle engine for Tasker.
//!
//! This crate provides a background job scheduler that:
//! - Promotes waiting tasks into execution on a self-rescheduling cycle
//! - Dispatches through an external supervisor or inline child processes
//! - Reconciles supervisor state and cleans up expired processes
//! - Runs task payloads out of process through the execution harness

mod config;
mod dispatch;
mod duration;
mod error;
mod events;
mod harness;
mod naming;
mod payload;
mod reconcile;
mod scheduler;
mod supervisor;

pub use config::{
    CleanConfig, CycleConfig, ExecConfig, ExecMode, NamingConfig, SchedulerConfig, WrapperConfig,
};
pub use dispatch::{Dispatcher, HarnessCommand, InlineDispatcher, ManagedDispatcher};
pub use duration::{HumanDuration, parse_duration};
pub use error::{DispatchError, PayloadError, SchedulerError, SupervisorError};
pub use events::{EventBus, TaskEvent};
pub use harness::{execute_task, run_task};
pub use naming::{allocate_id, next_free_id};
pub use payload::{Payload, PayloadRegistry};
pub use reconcile::{ReconcileReport, Reconciliation, classify, reconcile};
pub use scheduler::{CycleReport, Scheduler};
pub use supervisor::{Pm2Supervisor, ProcessInfo, ProcessSpec, ProcessStatus, Supervisor};

pub use tasker_store::{NewTask, Params, StorageConfig, StorageDriver, Task, TaskStatus, TaskStore};
