//! Reconciliation counters.
//!
//! Lock-free atomics, one per [`Counter`]. A [`Metrics`] instance is owned by
//! the engine and shared by reference, so tests observe isolated counts.

use runwatch_protocol::metrics as keys;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

const COUNTER_COUNT: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    InsertsReceived,
    InsertsDeduplicated,
    InsertsSkippedDone,
    JobsPersisted,
    CompletionsReceived,
    CompletionNacks,
    CompletionGaveUp,
    CompletionStale,
    SweepsRun,
    SweepRecordsRefreshed,
    SweepRecordsEvicted,
    BulkWriteFailures,
    RemoteErrors,
}

impl Counter {
    pub const ALL: [Counter; COUNTER_COUNT] = [
        Counter::InsertsReceived,
        Counter::InsertsDeduplicated,
        Counter::InsertsSkippedDone,
        Counter::JobsPersisted,
        Counter::CompletionsReceived,
        Counter::CompletionNacks,
        Counter::CompletionGaveUp,
        Counter::CompletionStale,
        Counter::SweepsRun,
        Counter::SweepRecordsRefreshed,
        Counter::SweepRecordsEvicted,
        Counter::BulkWriteFailures,
        Counter::RemoteErrors,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Counter::InsertsReceived => keys::INSERTS_RECEIVED,
            Counter::InsertsDeduplicated => keys::INSERTS_DEDUPLICATED,
            Counter::InsertsSkippedDone => keys::INSERTS_SKIPPED_DONE,
            Counter::JobsPersisted => keys::JOBS_PERSISTED,
            Counter::CompletionsReceived => keys::COMPLETIONS_RECEIVED,
            Counter::CompletionNacks => keys::COMPLETION_NACKS,
            Counter::CompletionGaveUp => keys::COMPLETION_GAVE_UP,
            Counter::CompletionStale => keys::COMPLETION_STALE,
            Counter::SweepsRun => keys::SWEEPS_RUN,
            Counter::SweepRecordsRefreshed => keys::SWEEP_RECORDS_REFRESHED,
            Counter::SweepRecordsEvicted => keys::SWEEP_RECORDS_EVICTED,
            Counter::BulkWriteFailures => keys::BULK_WRITE_FAILURES,
            Counter::RemoteErrors => keys::REMOTE_ERRORS,
        }
    }

    fn help(self) -> &'static str {
        match self {
            Counter::InsertsReceived => "Insert notifications received",
            Counter::InsertsDeduplicated => "Insert notifications discarded as redeliveries",
            Counter::InsertsSkippedDone => "Inserts not persisted because the job was already done",
            Counter::JobsPersisted => "Single-record job writes",
            Counter::CompletionsReceived => "Completion notifications received",
            Counter::CompletionNacks => "Completions nacked before their insert was observed",
            Counter::CompletionGaveUp => "Completions acknowledged after exhausting retries",
            Counter::CompletionStale => "Completions acknowledged as too old to matter",
            Counter::SweepsRun => "Project sweeps run",
            Counter::SweepRecordsRefreshed => "Records refreshed by sweeps",
            Counter::SweepRecordsEvicted => "Stale unlisted records evicted by sweeps",
            Counter::BulkWriteFailures => "Bulk writes that failed fully or partially",
            Counter::RemoteErrors => "Remote query-service failures",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

pub struct Metrics {
    counters: [AtomicU64; COUNTER_COUNT],
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    #[inline]
    pub fn inc(&self, counter: Counter) {
        self.add(counter, 1);
    }

    #[inline]
    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: Counter::ALL
                .iter()
                .map(|counter| (counter.key(), self.get(*counter)))
                .collect(),
        }
    }

    /// Prometheus text exposition format.
    pub fn prometheus_format(&self) -> String {
        let mut out = String::new();
        for counter in Counter::ALL {
            let name = keys::counter_name(counter.key());
            let _ = writeln!(out, "# HELP {} {}", name, counter.help());
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, self.get(counter));
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<&'static str, u64>,
}

impl MetricsSnapshot {
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters.get(counter.key()).copied().unwrap_or(0)
    }
}
