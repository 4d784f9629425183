//! Payload registry.
//!
//! A task names its work by `payloadRef`. The harness resolves that name in a
//! registry of handlers compiled into the binary.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tasker_store::Params;

use crate::PayloadError;

/// Executable task logic.
#[async_trait]
pub trait Payload: Send + Sync {
    /// Run with the task's params. `Ok(None)` means success with no result.
    async fn execute(&self, params: &Params) -> Result<Option<Value>, PayloadError>;
}

/// Name to handler map, built at startup.
#[derive(Clone, Default)]
pub struct PayloadRegistry {
    handlers: BTreeMap<String, Arc<dyn Payload>>,
}

impl std::fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("payloads", &self.names())
            .finish()
    }
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, payload: impl Payload + 'static) {
        self.handlers.insert(name.into(), Arc::new(payload));
    }

    /// Builder form of [`PayloadRegistry::register`].
    pub fn with(mut self, name: impl Into<String>, payload: impl Payload + 'static) -> Self {
        self.register(name, payload);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Payload>> {
        self.handlers.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}
