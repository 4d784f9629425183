//! Tasker: lightweight background job scheduler
//!
//! Main binary with subcommands:
//! - `daemon`: Run the cycle loop until interrupted
//! - `cycle`: Run a single cycle
//! - `create`, `list`, `get`, `set-status`: Manage tasks
//! - `run-task`: The execution harness, started by the dispatcher

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::Result;
use serde_json::Value;
use tasker_scheduler::{NewTask, Params, Scheduler, SchedulerConfig, Task, TaskStatus};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;
mod payloads;

#[derive(Parser)]
#[command(name = "tasker")]
#[command(about = "Lightweight background job scheduler", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "TASKER_CONFIG")]
    config: Option<PathBuf>,

    /// Override a setting by dotted path, e.g. `--set exec.mode=managed`
    #[arg(long = "set", global = true, value_name = "PATH=VALUE")]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cycle loop until Ctrl-C
    Daemon,

    /// Run a single cycle and print what it did
    Cycle,

    /// Create a task
    Create {
        /// Registered payload name
        payload: String,

        /// Explicit task id (allocated from the naming template otherwise)
        #[arg(long)]
        id: Option<String>,

        /// Create the task paused
        #[arg(long)]
        paused: bool,

        /// Task param as key=value; JSON literals are parsed
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Task params as a JSON object, applied before --param
        #[arg(long)]
        params_json: Option<String>,
    },

    /// List tasks
    List,

    /// Show a task
    Get {
        /// Task id
        id: String,
    },

    /// Pause or resume a task
    SetStatus {
        /// Task id
        id: String,

        /// `wait` or `paused`
        status: TaskStatus,
    },

    /// List the payloads this binary can run
    Payloads,

    /// Execute one task (invoked by the dispatcher)
    RunTask {
        /// Task id
        task_id: String,

        /// Forwarded settings as JSON
        settings: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tasker=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunTask { task_id, settings } => run_task(&task_id, &settings).await,

        Commands::Payloads => {
            for name in payloads::builtin_registry().names() {
                println!("{}", name);
            }
            Ok(())
        }

        Commands::Daemon => {
            let config = load_config(cli.config.as_deref(), &cli.overrides)?;
            daemon::run(config).await
        }

        Commands::Cycle => {
            let scheduler = open_scheduler(cli.config.as_deref(), &cli.overrides).await?;
            cycle(&scheduler).await
        }

        Commands::Create {
            payload,
            id,
            paused,
            params,
            params_json,
        } => {
            let mut new_task =
                NewTask::new(payload).with_params(parse_params(params_json.as_deref(), &params)?);
            if let Some(id) = id {
                new_task = new_task.with_id(id);
            }
            if paused {
                new_task = new_task.with_status(TaskStatus::Paused);
            }

            let scheduler = open_scheduler(cli.config.as_deref(), &cli.overrides).await?;
            let task = scheduler
                .create(new_task)
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            print_task(&task)
        }

        Commands::List => {
            let scheduler = open_scheduler(cli.config.as_deref(), &cli.overrides).await?;
            let ids = scheduler
                .list()
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            for id in ids {
                match scheduler.get(&id).await {
                    Ok(task) => println!("{}\t{}\t{}", task.id, task.status, task.payload_ref),
                    Err(e) => println!("{}\t<{}>", id, e),
                }
            }
            Ok(())
        }

        Commands::Get { id } => {
            let scheduler = open_scheduler(cli.config.as_deref(), &cli.overrides).await?;
            let task = scheduler
                .get(&id)
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            print_task(&task)
        }

        Commands::SetStatus { id, status } => {
            let scheduler = open_scheduler(cli.config.as_deref(), &cli.overrides).await?;
            let task = scheduler
                .set_status(&id, status)
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            print_task(&task)
        }
    }
}

async fn open_scheduler(path: Option<&Path>, overrides: &[String]) -> Result<Scheduler> {
    let config = load_config(path, overrides)?;
    Scheduler::setup(config)
        .await
        .map_err(|e| miette::miette!("{}", e))
}

/// Build the configuration from defaults, an optional file and `--set` overrides.
fn load_config(path: Option<&Path>, overrides: &[String]) -> Result<SchedulerConfig> {
    let mut config = match path {
        Some(path) => SchedulerConfig::load(path).map_err(|e| miette::miette!("{}", e))?,
        None => SchedulerConfig::default(),
    };
    for assignment in overrides {
        config
            .apply_override(assignment)
            .map_err(|e| miette::miette!("{}", e))?;
    }
    Ok(config)
}

async fn cycle(scheduler: &Scheduler) -> Result<()> {
    let report = scheduler
        .cycle()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    if let Some(cleanup) = &report.reconcile {
        for id in &cleanup.cleaned {
            println!("cleaned  {}", id);
        }
    }
    for id in &report.dispatched {
        println!("started  {}", id);
    }
    for (id, reason) in &report.failed {
        println!("failed   {}: {}", id, reason);
    }
    if report.dispatched.is_empty() && report.failed.is_empty() {
        println!("nothing to run");
    }
    Ok(())
}

/// The harness side of a dispatch. A failure exits non-zero with the error on
/// stderr, which is how the dispatcher learns about it.
async fn run_task(task_id: &str, settings: &str) -> Result<()> {
    let registry = payloads::builtin_registry();
    let task = tasker_scheduler::run_task(task_id, settings, &registry)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    match &task.results {
        Some(results) => println!("{} complete: {}", task.id, results),
        None => println!("{} complete", task.id),
    }
    Ok(())
}

/// Merge `--params-json` and `--param` flags into a params object.
fn parse_params(json: Option<&str>, pairs: &[String]) -> Result<Params> {
    let mut params = match json {
        Some(json) => match serde_json::from_str(json) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(miette::miette!("--params-json must be a JSON object")),
            Err(e) => return Err(miette::miette!("invalid --params-json: {}", e)),
        },
        None => Params::new(),
    };

    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| miette::miette!("param '{}' must look like key=value", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        params.insert(key.trim().to_string(), value);
    }
    Ok(params)
}

fn print_task(task: &Task) -> Result<()> {
    let text = serde_json::to_string_pretty(task).map_err(|e| miette::miette!("{}", e))?;
    println!("{}", text);
    Ok(())
}
