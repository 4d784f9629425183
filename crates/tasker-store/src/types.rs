//! Task record types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form keyed data handed to a payload.
pub type Params = Map<String, Value>;

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique id within the store.
    pub id: String,
    /// Name of the registered payload that runs this task.
    pub payload_ref: String,
    /// Current status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Parameters passed to the payload.
    #[serde(default)]
    pub params: Params,
    /// Value returned by the payload, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    /// When this task was created.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a waiting task with no params.
    pub fn new(id: impl Into<String>, payload_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload_ref: payload_ref.into(),
            status: TaskStatus::Wait,
            params: Params::new(),
            results: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Whether a cycle should dispatch this task.
    pub fn is_waiting(&self) -> bool {
        self.status == TaskStatus::Wait
    }

    /// Mark the task complete, attaching the payload result if there is one.
    pub fn complete(&mut self, results: Option<Value>) {
        self.status = TaskStatus::Complete;
        if results.is_some() {
            self.results = results;
        }
    }
}

/// Status of a task.
///
/// There is no `running` status: liveness lives in the supervisor or in the
/// blocked inline dispatcher, never in the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Eligible for dispatch on the next cycle.
    #[default]
    Wait,
    /// Held back until explicitly set to `wait`.
    Paused,
    /// Finished successfully.
    Complete,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Wait => "wait",
            TaskStatus::Paused => "paused",
            TaskStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wait" => Ok(TaskStatus::Wait),
            "paused" => Ok(TaskStatus::Paused),
            "complete" => Ok(TaskStatus::Complete),
            other => Err(format!(
                "unknown task status '{}', expected wait/paused/complete",
                other
            )),
        }
    }
}

/// A request to create a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    /// Explicit id; allocated from the naming template when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub payload_ref: String,
    /// Initial status, `wait` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub params: Params,
}

impl NewTask {
    pub fn new(payload_ref: impl Into<String>) -> Self {
        Self {
            payload_ref: payload_ref.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Set a single param.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Build the record under the given id.
    pub fn into_task(self, id: String) -> Task {
        Task {
            id,
            payload_ref: self.payload_ref,
            status: self.status.unwrap_or_default(),
            params: self.params,
            results: None,
            created_at: Utc::now(),
        }
    }
}
