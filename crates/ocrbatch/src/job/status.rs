//! Job status snapshot and ETA estimation.

use chrono::DateTime;
use serde::Serialize;

/// Point-in-time view of a job, assembled from the queue store and the run
/// registry. Safe to read while a run is active — readers never block the
/// runner.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_root: String,
    pub is_running: bool,
    pub start_unix_timestamp_millis: Option<i64>,
    pub total_tasks: u64,
    pub pending_tasks: u64,
    pub running_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub last_error_message: Option<String>,
    /// `None` means unknown (no completed task yet), never zero-as-unknown.
    pub eta_seconds: Option<i64>,
}

/// Per-task durations in seconds from `(started_at, completed_at)` RFC3339
/// pairs. Unparsable rows are skipped rather than poisoning the estimate.
pub(crate) fn completed_durations_seconds(pairs: &[(String, String)]) -> Vec<f64> {
    pairs
        .iter()
        .filter_map(|(started_at, completed_at)| {
            let started = DateTime::parse_from_rfc3339(started_at).ok()?;
            let completed = DateTime::parse_from_rfc3339(completed_at).ok()?;
            let seconds = (completed - started).num_milliseconds() as f64 / 1000.0;
            (seconds >= 0.0).then_some(seconds)
        })
        .collect()
}

/// `mean(completed durations) * pending`. The running task's partial elapsed
/// time is deliberately ignored — per-task variance dominates precision
/// anyway. Unknown until at least one task has completed.
pub(crate) fn compute_eta_seconds(durations: &[f64], pending_tasks: u64) -> Option<i64> {
    if durations.is_empty() {
        return None;
    }

    let average = durations.iter().sum::<f64>() / durations.len() as f64;
    Some((average * pending_tasks as f64).round() as i64)
}
