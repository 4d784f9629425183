//! Task records and persistence for Tasker.
//!
//! This crate provides:
//! - The `Task` record and its status machine
//! - The `TaskStore` contract the scheduler persists through
//! - A JSON-file adapter and an in-memory adapter

mod error;
mod json_file;
mod lock;
mod memory;
mod store;
mod types;

pub use error::StoreError;
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use store::{StorageConfig, StorageDriver, TaskStore, open};
pub use types::{NewTask, Params, Task, TaskStatus};
