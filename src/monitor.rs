//! Status reconciliation loop.
//!
//! Periodically mirrors executor-reported job states onto active runs. Every
//! failure mode inside a cycle is contained to the run that hit it; the loop
//! itself only stops when asked to.

use anyhow::Result;
use std::time::Duration;

use crate::executor::{JobExecutor, JobQuery};
use crate::run::{RunStatus, RunStore};
use crate::util::now_epoch_ms;

/// Wall-clock seam so the loop can be driven without sleeping in tests.
pub trait Clock {
    fn sleep(&self, duration: Duration);
    fn now_ms(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn now_ms(&self) -> u64 {
        now_epoch_ms()
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub checked: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Translate an executor status token into a run status. Matching is
/// case-insensitive; unknown tokens map to `None` and leave the run alone.
pub fn map_executor_status(raw: &str) -> Option<RunStatus> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "SUBMITTED" => Some(RunStatus::Submitted),
        "RUNNING" | "IN_PROGRESS" | "PROCESSING" => Some(RunStatus::Running),
        "COMPLETED" | "SUCCESS" | "FINISHED" => Some(RunStatus::Completed),
        "FAILED" | "ERROR" => Some(RunStatus::Failed),
        "CANCELLED" | "CANCELED" => Some(RunStatus::Cancelled),
        _ => None,
    }
}

/// One reconciliation pass over every active run.
pub fn poll_cycle(
    store: &dyn RunStore,
    executor: &dyn JobExecutor,
    now_ms: u64,
) -> Result<CycleReport> {
    let active = store.active_runs()?;
    let mut report = CycleReport {
        checked: active.len(),
        ..CycleReport::default()
    };

    for mut run in active {
        let Some(job_id) = run.external_job_id.clone() else {
            continue;
        };
        let query = match executor.status(&job_id) {
            Ok(query) => query,
            Err(err) => {
                tracing::warn!(run_id = run.id, job_id = %job_id, error = %err, "status query failed");
                report.skipped += 1;
                continue;
            }
        };
        let (status, error_message) = match query {
            JobQuery::Found {
                status,
                error_message,
            } => (status, error_message),
            JobQuery::NotFound => {
                tracing::warn!(run_id = run.id, job_id = %job_id, "job unknown to executor");
                report.skipped += 1;
                continue;
            }
        };
        let Some(target) = map_executor_status(&status) else {
            tracing::warn!(run_id = run.id, job_id = %job_id, status = %status, "unrecognized executor status");
            report.skipped += 1;
            continue;
        };
        if target == run.status {
            continue;
        }
        if target == RunStatus::Failed {
            run.error_message = error_message.or_else(|| Some(format!("job {job_id} failed")));
        }
        let previous = run.status;
        if let Err(err) = run.transition(target, now_ms) {
            tracing::warn!(run_id = run.id, error = %err, "transition rejected");
            report.skipped += 1;
            continue;
        }
        store.update(&run)?;
        report.updated += 1;
        tracing::info!(
            run_id = run.id,
            job_id = %job_id,
            from = %previous,
            to = %target,
            "run status reconciled"
        );
    }

    if report.updated == 0 {
        tracing::debug!(checked = report.checked, "quiescent cycle");
    }
    Ok(report)
}

/// Run reconciliation cycles forever, or for `max_cycles` when given. A
/// failing cycle is logged and the loop keeps going.
pub fn run_monitor(
    store: &dyn RunStore,
    executor: &dyn JobExecutor,
    clock: &dyn Clock,
    poll_interval: Duration,
    max_cycles: Option<u64>,
) -> Result<()> {
    let mut cycle = 0u64;
    loop {
        match poll_cycle(store, executor, clock.now_ms()) {
            Ok(report) => {
                tracing::debug!(
                    checked = report.checked,
                    updated = report.updated,
                    skipped = report.skipped,
                    "cycle finished"
                );
            }
            Err(err) => {
                tracing::error!(error = %err, "reconciliation cycle failed");
            }
        }
        cycle += 1;
        if let Some(limit) = max_cycles {
            if cycle >= limit {
                return Ok(());
            }
        }
        clock.sleep(poll_interval);
    }
}
