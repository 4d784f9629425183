//! Scheduler configuration.
//!
//! Every setting is addressable by a dotted path (`exec.mode`, `clean.expiry`),
//! which is how the CLI overrides settings and how settings are forwarded to
//! harness processes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tasker_store::StorageConfig;

use crate::{HumanDuration, SchedulerError};

/// Complete scheduler configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub clean: CleanConfig,
    pub cycle: CycleConfig,
    pub exec: ExecConfig,
    pub naming: NamingConfig,
    pub storage: StorageConfig,
}

/// Supervisor cleanup settings (managed mode only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    pub enabled: bool,
    /// How long a stopped process is kept before deletion.
    pub expiry: HumanDuration,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiry: HumanDuration::from_mins(10),
        }
    }
}

/// Cycle timer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Start the cycle loop as soon as the scheduler is set up.
    pub auto_install: bool,
    /// Delay between the end of one cycle and the start of the next.
    pub duration: HumanDuration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            auto_install: false,
            duration: HumanDuration::from_mins(2),
        }
    }
}

/// Execution backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Spawn the harness and wait for it.
    #[default]
    Inline,
    /// Hand the harness to the external supervisor.
    Managed,
}

/// Execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub mode: ExecMode,
    /// Dotted paths of settings passed to harness processes.
    pub transfer_settings: Vec<String>,
    /// Restart policy handed to the supervisor.
    pub autorestart: bool,
    pub wrapper: WrapperConfig,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            mode: ExecMode::Inline,
            transfer_settings: vec!["storage".to_string()],
            autorestart: false,
            wrapper: WrapperConfig::default(),
        }
    }
}

/// How to launch the execution harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapperConfig {
    /// Harness executable; the current executable when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
    /// Arguments placed before the task id and forwarded settings.
    pub args: Vec<String>,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: vec!["run-task".to_string()],
        }
    }
}

/// Template for generated task ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub prefix: String,
    pub suffix: String,
    pub offset: u64,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: "task-".to_string(),
            suffix: String::new(),
            offset: 1,
        }
    }
}

impl SchedulerConfig {
    /// Load a TOML configuration file. Missing sections take their defaults.
    pub fn load(path: &Path) -> Result<Self, SchedulerError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            SchedulerError::InvalidConfig(format!("{}: {}", path.display(), e))
        })
    }

    /// Read a setting by dotted path.
    pub fn get(&self, path: &str) -> Result<Value, SchedulerError> {
        let root = serde_json::to_value(self)?;
        let mut current = &root;
        for segment in path.split('.') {
            current = current.get(segment).ok_or_else(|| unknown_path(path))?;
        }
        Ok(current.clone())
    }

    /// Replace a setting by dotted path.
    ///
    /// The path must name an existing setting (optional settings that are unset
    /// count as existing). The whole configuration is revalidated, so a value of
    /// the wrong shape is rejected and leaves `self` untouched.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), SchedulerError> {
        let mut root = serde_json::to_value(&*self)?;

        let segments: Vec<&str> = path.split('.').collect();
        let (leaf, parents) = segments
            .split_last()
            .filter(|(leaf, _)| !leaf.is_empty())
            .ok_or_else(|| unknown_path(path))?;

        let mut node = &mut root;
        for segment in parents {
            node = node
                .get_mut(*segment)
                .filter(|v| v.is_object())
                .ok_or_else(|| unknown_path(path))?;
        }
        let object = node.as_object_mut().ok_or_else(|| unknown_path(path))?;
        if !object.contains_key(*leaf) && !is_known_optional(&segments) {
            return Err(unknown_path(path));
        }
        object.insert(leaf.to_string(), value);

        *self = serde_json::from_value(root).map_err(|e| {
            SchedulerError::InvalidConfig(format!("bad value for '{}': {}", path, e))
        })?;
        Ok(())
    }

    /// Set a setting from CLI text. JSON literals (`true`, `5`, `["a"]`) are
    /// parsed as such; anything else is taken as a string.
    pub fn set_str(&mut self, path: &str, raw: &str) -> Result<(), SchedulerError> {
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        self.set(path, value)
    }

    /// Apply a `path=value` override.
    pub fn apply_override(&mut self, assignment: &str) -> Result<(), SchedulerError> {
        let (path, raw) = assignment.split_once('=').ok_or_else(|| {
            SchedulerError::InvalidConfig(format!(
                "override '{}' must look like path=value",
                assignment
            ))
        })?;
        self.set_str(path.trim(), raw.trim())
    }

    /// Serialize the settings named by `exec.transfer_settings` for a harness.
    ///
    /// The result is a JSON object keyed by dotted path.
    pub fn forwarded(&self) -> Result<String, SchedulerError> {
        let mut forwarded = Map::new();
        for path in &self.exec.transfer_settings {
            forwarded.insert(path.clone(), self.get(path)?);
        }
        Ok(serde_json::to_string(&Value::Object(forwarded))?)
    }

    /// Apply settings produced by [`SchedulerConfig::forwarded`].
    pub fn apply_forwarded(&mut self, json: &str) -> Result<(), SchedulerError> {
        let value: Value = serde_json::from_str(json)?;
        let Value::Object(settings) = value else {
            return Err(SchedulerError::InvalidConfig(
                "forwarded settings must be a JSON object".to_string(),
            ));
        };
        for (path, value) in settings {
            self.set(&path, value)?;
        }
        Ok(())
    }
}

fn unknown_path(path: &str) -> SchedulerError {
    SchedulerError::InvalidConfig(format!("unknown setting '{}'", path))
}

/// Optional settings are skipped when unset, so they are missing from the
/// serialized tree.
fn is_known_optional(segments: &[&str]) -> bool {
    matches!(segments, ["storage", "path"] | ["exec", "wrapper", "program"])
}
