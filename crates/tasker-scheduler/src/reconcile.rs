//! Supervisor reconciliation and cleanup (managed mode).

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{EventBus, ProcessInfo, Supervisor, SupervisorError, TaskEvent};

/// What to do with one watched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Stopped and past the expiry cutoff: delete it.
    Clean,
    /// Stopped but not yet expired.
    CleanPending,
    /// Still active.
    Checkin,
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub cleaned: Vec<String>,
    pub pending: Vec<String>,
    pub checked_in: Vec<String>,
}

/// Classify a process against the expiry cutoff.
pub fn classify(process: &ProcessInfo, cutoff: DateTime<Utc>) -> Reconciliation {
    if !process.status.is_stopped() {
        Reconciliation::Checkin
    } else if process.created_at <= cutoff {
        Reconciliation::Clean
    } else {
        Reconciliation::CleanPending
    }
}

/// Cross-reference supervisor processes against the watched task ids.
///
/// Connects, lists, emits `clean`/`cleanPending`/`checkin` per watched process
/// and deletes expired stopped ones. Processes with unwatched names are ignored.
/// The supervisor connection is released whether or not the pass succeeds; the
/// first failure aborts the remainder of the pass.
#[tracing::instrument(skip_all, fields(watched = watched.len()))]
pub async fn reconcile(
    supervisor: &dyn Supervisor,
    watched: &[String],
    expiry: Duration,
    events: &EventBus,
) -> Result<ReconcileReport, SupervisorError> {
    supervisor.connect().await?;
    let result = reconcile_connected(supervisor, watched, expiry, events).await;
    if let Err(e) = supervisor.disconnect().await {
        warn!(error = %e, "failed to disconnect from supervisor after cleanup");
    }
    result
}

async fn reconcile_connected(
    supervisor: &dyn Supervisor,
    watched: &[String],
    expiry: Duration,
    events: &EventBus,
) -> Result<ReconcileReport, SupervisorError> {
    let watched: HashSet<&str> = watched.iter().map(String::as_str).collect();
    let cutoff = chrono::Duration::from_std(expiry)
        .ok()
        .and_then(|expiry| Utc::now().checked_sub_signed(expiry))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut report = ReconcileReport::default();
    for process in supervisor.list().await? {
        if !watched.contains(process.name.as_str()) {
            continue;
        }

        match classify(&process, cutoff) {
            Reconciliation::Clean => {
                supervisor.delete(&process.name).await?;
                info!(task_id = %process.name, "cleaned expired process");
                events.emit(TaskEvent::Clean(process.name.clone()));
                report.cleaned.push(process.name);
            }
            Reconciliation::CleanPending => {
                debug!(task_id = %process.name, "stopped process not yet expired");
                events.emit(TaskEvent::CleanPending(process.name.clone()));
                report.pending.push(process.name);
            }
            Reconciliation::Checkin => {
                debug!(task_id = %process.name, status = ?process.status, "process still active");
                events.emit(TaskEvent::Checkin(process.name.clone()));
                report.checked_in.push(process.name);
            }
        }
    }

    Ok(report)
}
