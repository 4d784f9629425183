//! External process supervisor contract and the PM2 adapter.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::SupervisorError;

/// State of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Launching,
    Online,
    Stopping,
    Stopped,
    Errored,
    Other(String),
}

impl ProcessStatus {
    /// Whether the process has finished running.
    ///
    /// `errored` counts as stopped: a single-shot harness that exits non-zero with
    /// restarts disabled ends up there and will never come back on its own.
    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Stopped | ProcessStatus::Errored)
    }
}

impl From<&str> for ProcessStatus {
    fn from(s: &str) -> Self {
        match s {
            "launching" => ProcessStatus::Launching,
            "online" => ProcessStatus::Online,
            "stopping" => ProcessStatus::Stopping,
            "stopped" => ProcessStatus::Stopped,
            "errored" => ProcessStatus::Errored,
            other => ProcessStatus::Other(other.to_string()),
        }
    }
}

/// A process as reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: String,
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
}

/// A request to start a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Process name; the task id.
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub autorestart: bool,
}

/// The subset of a process manager's API the scheduler needs.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn connect(&self) -> Result<(), SupervisorError>;

    async fn list(&self) -> Result<Vec<ProcessInfo>, SupervisorError>;

    /// Start a process. Returns once the supervisor acknowledges the request.
    async fn start(&self, spec: &ProcessSpec) -> Result<(), SupervisorError>;

    async fn delete(&self, name: &str) -> Result<(), SupervisorError>;

    async fn disconnect(&self) -> Result<(), SupervisorError>;
}

/// Entry of `pm2 jlist`.
#[derive(Debug, Deserialize)]
struct Pm2Process {
    name: String,
    pm2_env: Pm2Env,
}

#[derive(Debug, Deserialize)]
struct Pm2Env {
    status: String,
    /// Epoch milliseconds.
    created_at: i64,
}

/// Parse the JSON printed by `pm2 jlist`.
fn parse_jlist(output: &str) -> Result<Vec<ProcessInfo>, SupervisorError> {
    let procs: Vec<Pm2Process> = serde_json::from_str(output.trim())
        .map_err(|e| SupervisorError::InvalidOutput(format!("pm2 jlist: {}", e)))?;

    procs
        .into_iter()
        .map(|p| {
            let created_at = Utc
                .timestamp_millis_opt(p.pm2_env.created_at)
                .single()
                .ok_or_else(|| {
                    SupervisorError::InvalidOutput(format!(
                        "bad created_at {} for {}",
                        p.pm2_env.created_at, p.name
                    ))
                })?;
            Ok(ProcessInfo {
                status: ProcessStatus::from(p.pm2_env.status.as_str()),
                name: p.name,
                created_at,
            })
        })
        .collect()
}

/// Supervisor backed by the `pm2` command-line tool.
#[derive(Debug)]
pub struct Pm2Supervisor {
    binary: PathBuf,
    connected: AtomicBool,
}

impl Default for Pm2Supervisor {
    fn default() -> Self {
        Self::new("pm2")
    }
}

impl Pm2Supervisor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> Result<(), SupervisorError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SupervisorError::NotConnected)
        }
    }

    /// Run a pm2 subcommand and return its stdout.
    async fn run(&self, args: &[String]) -> Result<String, SupervisorError> {
        let command = format!("{} {}", self.binary.display(), args.join(" "));
        debug!(command = %command, "running pm2");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SupervisorError::BinaryNotFound(self.binary.display().to_string())
                } else {
                    SupervisorError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(SupervisorError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Supervisor for Pm2Supervisor {
    async fn connect(&self) -> Result<(), SupervisorError> {
        self.run(&["ping".to_string()]).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProcessInfo>, SupervisorError> {
        self.ensure_connected()?;
        let output = self.run(&["jlist".to_string()]).await?;
        parse_jlist(&output)
    }

    async fn start(&self, spec: &ProcessSpec) -> Result<(), SupervisorError> {
        self.ensure_connected()?;
        let mut args = vec![
            "start".to_string(),
            spec.program.display().to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--interpreter".to_string(),
            "none".to_string(),
        ];
        if !spec.autorestart {
            args.push("--no-autorestart".to_string());
        }
        if !spec.args.is_empty() {
            args.push("--".to_string());
            args.extend(spec.args.iter().cloned());
        }

        self.run(&args).await?;
        info!(name = %spec.name, "pm2 started process");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), SupervisorError> {
        self.ensure_connected()?;
        self.run(&["delete".to_string(), name.to_string()])
            .await
            .map_err(|e| match e {
                SupervisorError::CommandFailed { stderr, .. } if stderr.contains("not found") => {
                    SupervisorError::ProcessNotFound(name.to_string())
                }
                other => other,
            })?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SupervisorError> {
        // Each CLI call is its own connection to the pm2 daemon
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
