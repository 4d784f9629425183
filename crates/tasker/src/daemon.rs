//! Daemon command: run the cycle loop until interrupted.

use miette::Result;
use tasker_scheduler::{ExecMode, Scheduler, SchedulerConfig, StorageDriver, TaskEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

pub async fn run(config: SchedulerConfig) -> Result<()> {
    if config.storage.driver == StorageDriver::Memory {
        warn!("memory storage is not shared with harness processes; dispatched tasks will fail");
    }
    info!(
        mode = ?config.exec.mode,
        interval = %config.cycle.duration,
        clean = config.exec.mode == ExecMode::Managed && config.clean.enabled,
        "starting daemon"
    );

    let scheduler = Scheduler::setup(config)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    let mut events = scheduler.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    scheduler.start().await;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("failed to listen for shutdown signal: {}", e))?;
    info!("received shutdown signal");

    scheduler.stop().await;
    scheduler.wait_idle().await;
    logger.abort();

    info!("daemon shut down gracefully");
    Ok(())
}

fn log_event(event: &TaskEvent) {
    match event {
        TaskEvent::Error(detail) => warn!(event = event.name(), "{}", detail),
        TaskEvent::Output { task_id, line } => info!(task_id = %task_id, "> {}", line),
        TaskEvent::CycleStarted | TaskEvent::CycleStopped => debug!(event = event.name()),
        other => info!(event = other.name(), task_id = other.task_id().unwrap_or_default()),
    }
}
