//! Canonical metric names for the reconciliation service.
//!
//! Use these constants everywhere to avoid stringly-typed drift between the
//! counters and their Prometheus rendering.

/// Metric name prefix.
pub const PREFIX: &str = "runwatch";

/// Insert notifications received.
pub const INSERTS_RECEIVED: &str = "inserts_received";
/// Insert notifications discarded by the dedup gate.
pub const INSERTS_DEDUPLICATED: &str = "inserts_deduplicated";
/// Inserts not persisted because the job was already done.
pub const INSERTS_SKIPPED_DONE: &str = "inserts_skipped_done";
/// Single-record writes performed by the insert and completion paths.
pub const JOBS_PERSISTED: &str = "jobs_persisted";
/// Completion notifications received.
pub const COMPLETIONS_RECEIVED: &str = "completions_received";
/// Completions nacked because their insert was not yet observed.
pub const COMPLETION_NACKS: &str = "completion_nacks";
/// Completions acknowledged after exhausting their nack budget.
pub const COMPLETION_GAVE_UP: &str = "completion_gave_up";
/// Completions acknowledged because they were older than the race window.
pub const COMPLETION_STALE: &str = "completion_stale";
/// Project sweeps run.
pub const SWEEPS_RUN: &str = "sweeps_run";
/// Records refreshed by sweeps.
pub const SWEEP_RECORDS_REFRESHED: &str = "sweep_records_refreshed";
/// Records evicted by sweeps after exceeding max staleness.
pub const SWEEP_RECORDS_EVICTED: &str = "sweep_records_evicted";
/// Bulk writes that failed fully or partially.
pub const BULK_WRITE_FAILURES: &str = "bulk_write_failures";
/// Remote query-service call failures.
pub const REMOTE_ERRORS: &str = "remote_errors";

/// Full exposition name, e.g. `runwatch_sweeps_run_total`.
pub fn counter_name(key: &str) -> String {
    let mut name = String::with_capacity(PREFIX.len() + key.len() + 7);
    name.push_str(PREFIX);
    name.push('_');
    name.push_str(key);
    name.push_str("_total");
    name
}
