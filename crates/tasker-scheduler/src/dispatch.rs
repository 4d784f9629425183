//! Execution dispatch: starting the harness for a task.
//!
//! The two backends have different completion contracts. Managed dispatch
//! returns once the supervisor acknowledges the start; inline dispatch blocks
//! until the harness process exits. They are kept as separate strategies.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{
    DispatchError, EventBus, ExecMode, ProcessSpec, SchedulerConfig, Supervisor,
    SupervisorError, TaskEvent, WrapperConfig,
};

/// Harness stderr lines kept for a failure report.
const STDERR_TAIL_LINES: usize = 20;

/// Longest stderr line kept, in bytes.
const STDERR_LINE_MAX: usize = 1024;

/// The command line that runs the execution harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessCommand {
    pub program: PathBuf,
    /// Leading arguments; the task id and forwarded settings follow.
    pub args: Vec<String>,
}

impl HarnessCommand {
    /// Resolve the wrapper settings, defaulting to the current executable.
    pub fn resolve(wrapper: &WrapperConfig) -> Result<Self, DispatchError> {
        let program = match &wrapper.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()
                .map_err(|e| DispatchError::Harness(format!("current executable: {}", e)))?,
        };
        Ok(Self {
            program,
            args: wrapper.args.clone(),
        })
    }

    /// Full argument list for one task.
    pub fn args_for(&self, task_id: &str, forwarded: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(task_id.to_string());
        args.push(forwarded.to_string());
        args
    }
}

/// Hands tasks to the external supervisor and returns on acknowledgement.
pub struct ManagedDispatcher {
    supervisor: Arc<dyn Supervisor>,
    command: HarnessCommand,
    autorestart: bool,
    events: EventBus,
}

impl ManagedDispatcher {
    pub fn new(
        supervisor: Arc<dyn Supervisor>,
        command: HarnessCommand,
        autorestart: bool,
        events: EventBus,
    ) -> Self {
        Self {
            supervisor,
            command,
            autorestart,
            events,
        }
    }

    async fn dispatch(&self, task_id: &str, forwarded: &str) -> Result<(), DispatchError> {
        let spec = ProcessSpec {
            name: task_id.to_string(),
            program: self.command.program.clone(),
            args: self.command.args_for(task_id, forwarded),
            autorestart: self.autorestart,
        };

        self.supervisor
            .start(&spec)
            .await
            .map_err(|source| DispatchError::Supervisor {
                task_id: task_id.to_string(),
                source,
            })?;

        info!(task_id, "task handed to supervisor");
        self.events.emit(TaskEvent::Started(task_id.to_string()));
        Ok(())
    }
}

/// Spawns the harness as a child process and waits for it.
pub struct InlineDispatcher {
    command: HarnessCommand,
    events: EventBus,
}

impl InlineDispatcher {
    pub fn new(command: HarnessCommand, events: EventBus) -> Self {
        Self { command, events }
    }

    async fn dispatch(&self, task_id: &str, forwarded: &str) -> Result<(), DispatchError> {
        let args = self.command.args_for(task_id, forwarded);
        info!(
            task_id,
            program = %self.command.program.display(),
            "spawning harness"
        );

        let mut child = Command::new(&self.command.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DispatchError::Spawn {
                task_id: task_id.to_string(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let forward_stdout = async {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        debug!(task_id, line = %line, "harness output");
                        self.events.emit(TaskEvent::Output {
                            task_id: task_id.to_string(),
                            line,
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(task_id, error = %e, "failed reading harness stdout");
                        break;
                    }
                }
            }
        };

        let collect_stderr = async {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let Some(stderr) = stderr else {
                return String::new();
            };
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(mut line)) => {
                        debug!(task_id, line = %line, "harness stderr");
                        if line.len() > STDERR_LINE_MAX {
                            let mut cut = STDERR_LINE_MAX;
                            while !line.is_char_boundary(cut) {
                                cut -= 1;
                            }
                            line.truncate(cut);
                        }
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(task_id, error = %e, "failed reading harness stderr");
                        break;
                    }
                }
            }
            Vec::from(tail).join("\n")
        };

        let ((), stderr_text, status) = tokio::join!(forward_stdout, collect_stderr, child.wait());
        let status = status.map_err(|source| DispatchError::Spawn {
            task_id: task_id.to_string(),
            source,
        })?;

        if !status.success() {
            return Err(DispatchError::HarnessFailed {
                task_id: task_id.to_string(),
                code: status.code(),
                stderr: stderr_text.trim().to_string(),
            });
        }

        info!(task_id, "harness finished");
        self.events.emit(TaskEvent::Started(task_id.to_string()));
        Ok(())
    }
}

/// The dispatch strategy for a cycle.
pub enum Dispatcher {
    Managed(ManagedDispatcher),
    Inline(InlineDispatcher),
}

impl Dispatcher {
    /// Build the dispatcher selected by `exec.mode`.
    pub fn from_config(
        config: &SchedulerConfig,
        supervisor: Arc<dyn Supervisor>,
        events: EventBus,
    ) -> Result<Self, DispatchError> {
        let command = HarnessCommand::resolve(&config.exec.wrapper)?;
        Ok(match config.exec.mode {
            ExecMode::Managed => Dispatcher::Managed(ManagedDispatcher::new(
                supervisor,
                command,
                config.exec.autorestart,
                events,
            )),
            ExecMode::Inline => Dispatcher::Inline(InlineDispatcher::new(command, events)),
        })
    }

    /// Prepare for a dispatch phase.
    ///
    /// Managed mode connects to the supervisor and returns the names it already
    /// knows about, so a task that is still supervised is not started twice.
    pub async fn begin_cycle(&self) -> Result<HashSet<String>, SupervisorError> {
        match self {
            Dispatcher::Managed(managed) => {
                managed.supervisor.connect().await?;
                let procs = match managed.supervisor.list().await {
                    Ok(procs) => procs,
                    Err(e) => {
                        if let Err(disconnect_err) = managed.supervisor.disconnect().await {
                            warn!(error = %disconnect_err, "failed to disconnect from supervisor");
                        }
                        return Err(e);
                    }
                };
                Ok(procs.into_iter().map(|p| p.name).collect())
            }
            Dispatcher::Inline(_) => Ok(HashSet::new()),
        }
    }

    /// Start the harness for one task.
    pub async fn dispatch(&self, task_id: &str, forwarded: &str) -> Result<(), DispatchError> {
        match self {
            Dispatcher::Managed(managed) => managed.dispatch(task_id, forwarded).await,
            Dispatcher::Inline(inline) => inline.dispatch(task_id, forwarded).await,
        }
    }

    /// Release resources held for the dispatch phase.
    pub async fn end_cycle(&self) {
        if let Dispatcher::Managed(managed) = self
            && let Err(e) = managed.supervisor.disconnect().await
        {
            warn!(error = %e, "failed to disconnect from supervisor");
        }
    }
}
