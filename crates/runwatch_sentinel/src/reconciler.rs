//! Job-state reconciliation engine.
//!
//! Per identity a job is Unknown (no record), Active (persisted, not done) or
//! Done (persisted, state Done). Three entry points move it between those:
//!
//! - [`Reconciler::on_insert`]: push notification that a job was created
//! - [`Reconciler::on_complete`]: push notification that a job finished
//! - [`Reconciler::reconcile_project`]: periodic sweep against the remote listing
//!
//! Push delivery is at-least-once and unordered; sweeps for different
//! projects may run concurrently. The dedup gate and the nack counter are
//! the only shared mutable state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use runwatch_protocol::{defaults, Job, JobDetail, JobIdentity, JobNotification, JobState, JobStats};
use runwatch_store::{JobQuery, StateStore};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dedup::{DedupGate, ExpiringCache};
use crate::detail::{DetailError, DetailFetcher};
use crate::error::{ReconcileError, Result};
use crate::metrics::{Counter, Metrics};
use crate::nack::{NackCounter, NackDecision};
use crate::remote::QueryService;

/// States listed from the remote service during a sweep, in order.
const LISTED_STATES: [JobState; 2] = [JobState::Running, JobState::Pending];

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Lifetime of a dedup-gate entry.
    pub dedup_ttl: Duration,
    /// Completions whose end time is older than this are acknowledged outright.
    pub race_window: ChronoDuration,
    /// Nacks sent before an early completion is acknowledged anyway.
    pub max_nacks: u32,
    /// Idle nack counters are dropped after this long.
    pub nack_ttl: Duration,
    /// Unlisted records not refreshed for this long are evicted. `None` keeps them.
    pub max_staleness: Option<ChronoDuration>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            dedup_ttl: Duration::from_secs(defaults::DEDUP_TTL_SECS),
            race_window: ChronoDuration::seconds(defaults::RACE_WINDOW_SECS as i64),
            max_nacks: defaults::MAX_COMPLETION_NACKS,
            nack_ttl: Duration::from_secs(defaults::NACK_TTL_SECS),
            max_staleness: Some(ChronoDuration::seconds(defaults::MAX_STALENESS_SECS as i64)),
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    /// Redelivery; nothing written.
    Duplicate,
    /// The job was already done when the insert was processed; nothing written.
    SkippedDone,
    Persisted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompleteOutcome {
    /// The record was marked Done.
    Updated,
    /// Early completion older than the race window; acknowledged, nothing written.
    Stale,
    /// Early completion out of retries; acknowledged, nothing written.
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    Insert(InsertOutcome),
    Complete(CompleteOutcome),
}

/// Summary of one project sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub project_id: String,
    /// Records loaded for the project.
    pub loaded: usize,
    /// Records whose detail was refreshed from the remote service.
    pub refreshed: usize,
    /// Remote jobs returned by the Running and Pending listings.
    pub listed: usize,
    /// Keys of active records absent from the listings.
    pub unmatched: Vec<String>,
    /// Keys deleted for exceeding max staleness.
    pub evicted: Vec<String>,
    /// Records skipped because their configuration was unrecognized.
    pub skipped: usize,
    /// True if the listing failed and unmatched records could not be judged.
    pub listing_failed: bool,
    /// True if the bulk write failed fully or partially.
    pub write_failed: bool,
}

// ============================================================================
// Engine
// ============================================================================

pub struct Reconciler {
    store: StateStore,
    remote: Arc<dyn QueryService>,
    fetcher: DetailFetcher,
    gate: DedupGate,
    nacks: NackCounter,
    metrics: Metrics,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: StateStore,
        remote: Arc<dyn QueryService>,
        cache: Arc<dyn ExpiringCache>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            fetcher: DetailFetcher::new(Arc::clone(&remote), store.clone()),
            gate: DedupGate::new(cache, config.dedup_ttl),
            nacks: NackCounter::new(config.nack_ttl),
            metrics: Metrics::new(),
            store,
            remote,
            config,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn QueryService> {
        &self.remote
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn gate(&self) -> &DedupGate {
        &self.gate
    }

    pub fn nacks(&self) -> &NackCounter {
        &self.nacks
    }

    /// Route a decoded push notification to its path.
    pub async fn handle(&self, notification: JobNotification) -> Result<NotificationOutcome> {
        match notification {
            JobNotification::Insert { identity, stats } => self
                .on_insert(identity, stats)
                .await
                .map(NotificationOutcome::Insert),
            JobNotification::Complete {
                identity,
                stats,
                detail,
            } => self
                .on_complete(identity, stats, detail)
                .await
                .map(NotificationOutcome::Complete),
        }
    }

    // ------------------------------------------------------------------------
    // Insert path
    // ------------------------------------------------------------------------

    pub async fn on_insert(&self, identity: JobIdentity, stats: JobStats) -> Result<InsertOutcome> {
        self.metrics.inc(Counter::InsertsReceived);
        let key = identity.canonical_key();

        if self.gate.observe(&identity) {
            debug!(key = %key, "Insert already observed, skipping");
            self.metrics.inc(Counter::InsertsDeduplicated);
            return Ok(InsertOutcome::Duplicate);
        }

        let mut job = Job::new(identity, stats);
        match self.fetcher.fetch_detail(&job.identity).await {
            Ok(detail) if detail.is_done() => {
                debug!(key = %key, "Job already done, skipping insert");
                self.metrics.inc(Counter::InsertsSkippedDone);
                return Ok(InsertOutcome::SkippedDone);
            }
            Ok(detail) => job.detail = detail,
            Err(err) => {
                self.note_detail_error(&key, &err);
            }
        }

        if let Err(err) = self.store.jobs().put(&job).await {
            // Let the redelivery through the gate again.
            self.gate.forget(&job.identity);
            return Err(err.into());
        }
        self.metrics.inc(Counter::JobsPersisted);
        debug!(key = %key, state = %job.detail.state, "Job inserted");
        Ok(InsertOutcome::Persisted)
    }

    // ------------------------------------------------------------------------
    // Completion path
    // ------------------------------------------------------------------------

    pub async fn on_complete(
        &self,
        identity: JobIdentity,
        stats: JobStats,
        detail: JobDetail,
    ) -> Result<CompleteOutcome> {
        self.metrics.inc(Counter::CompletionsReceived);
        let key = identity.canonical_key();

        let existing = if self.gate.seen(&identity) {
            self.load_tolerant(&key).await?
        } else {
            // The gate entry may simply have expired; the store decides.
            match self.store.jobs().get(&key).await {
                Ok(job) => Some(job),
                Err(err) if err.is_not_found() => {
                    return self.early_completion(&key, &stats, Utc::now());
                }
                Err(err) => return Err(err.into()),
            }
        };

        let mut job = match existing {
            Some(job) => job,
            None => self.fresh_record(identity, &stats).await,
        };
        let end_time = stats
            .end_time
            .or(detail.last_updated)
            .or(job.detail.last_updated);
        if end_time.is_some() {
            job.stats.end_time = end_time;
        }
        if let Some(error) = detail.error.filter(|e| !e.is_empty()) {
            job.detail.error = Some(error);
        }
        job.detail.state = JobState::Done;

        self.store.jobs().put(&job).await?;
        self.nacks.clear(&key);
        self.metrics.inc(Counter::JobsPersisted);
        debug!(key = %key, end_time = ?job.stats.end_time, "Job marked done");
        Ok(CompleteOutcome::Updated)
    }

    /// Completion with no observed insert and no persisted record.
    fn early_completion(
        &self,
        key: &str,
        stats: &JobStats,
        now: DateTime<Utc>,
    ) -> Result<CompleteOutcome> {
        // A missing end time is as old as it gets.
        let stale = stats
            .end_time
            .map_or(true, |end| now - end > self.config.race_window);
        if stale {
            debug!(key, end_time = ?stats.end_time, "Completion older than race window, acking");
            self.nacks.clear(key);
            self.metrics.inc(Counter::CompletionStale);
            return Ok(CompleteOutcome::Stale);
        }

        match self.nacks.decide(key, self.config.max_nacks) {
            NackDecision::GiveUp(attempts) => {
                info!(key, attempts, "Completion never matched an insert, acking");
                self.metrics.inc(Counter::CompletionGaveUp);
                Ok(CompleteOutcome::GaveUp)
            }
            NackDecision::Nack(attempts) => {
                debug!(key, attempts, end_time = ?stats.end_time, "Completion before insert, nacking");
                self.metrics.inc(Counter::CompletionNacks);
                Err(ReconcileError::RetryableRace {
                    key: key.to_string(),
                    attempts,
                })
            }
        }
    }

    /// Record for a completion whose insert was observed but never persisted
    /// (e.g. skipped as already done). The detail is fetched best effort so the
    /// row keeps its type and owner.
    async fn fresh_record(&self, identity: JobIdentity, stats: &JobStats) -> Job {
        let mut job = Job::new(identity, stats.clone());
        match self.fetcher.fetch_detail(&job.identity).await {
            Ok(detail) => job.detail = detail,
            Err(err) => self.note_detail_error(&job.key(), &err),
        }
        job
    }

    /// Load a record, treating "not found" as a warning.
    async fn load_tolerant(&self, key: &str) -> Result<Option<Job>> {
        match self.store.jobs().get(key).await {
            Ok(job) => Ok(Some(job)),
            Err(err) if err.is_not_found() => {
                warn!(key, "Completed job has no persisted record, writing a fresh one");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    // ------------------------------------------------------------------------
    // Sweep path
    // ------------------------------------------------------------------------

    /// Refresh every active record of `project_id` against the remote service.
    ///
    /// Remote failures only degrade the sweep; store read failures abort it;
    /// bulk write failures are logged and left for the next sweep.
    pub async fn reconcile_project(&self, project_id: &str) -> Result<SweepReport> {
        self.metrics.inc(Counter::SweepsRun);
        let records = self
            .store
            .jobs()
            .query(&JobQuery::for_project(project_id))
            .await?;

        let mut report = SweepReport {
            project_id: project_id.to_string(),
            loaded: records.len(),
            ..Default::default()
        };

        let mut active: BTreeMap<String, Job> = records
            .into_iter()
            .filter(|job| !job.is_done())
            .map(|job| (job.key(), job))
            .collect();
        let reservation = self.fetcher.reservation_for(project_id).await;
        let mut refreshed: BTreeSet<String> = BTreeSet::new();

        for (key, job) in active.iter_mut() {
            match self.fetcher.fetch_with(&job.identity, reservation.as_ref()).await {
                Ok(detail) => {
                    job.detail = detail;
                    refreshed.insert(key.clone());
                }
                Err(DetailError::UnrecognizedConfig(kind)) => {
                    warn!(key = %key, kind = %kind, "Skipping job with unrecognized configuration");
                    report.skipped += 1;
                }
                Err(err) => self.note_detail_error(key, &err),
            }
        }

        let mut unmatched: BTreeSet<String> = active.keys().cloned().collect();
        for state in LISTED_STATES {
            let listed = match self.remote.list_jobs(project_id, state).await {
                Ok(listed) => listed,
                Err(err) => {
                    warn!(project_id, state = %state, error = %err, "Remote listing failed");
                    self.metrics.inc(Counter::RemoteErrors);
                    report.listing_failed = true;
                    continue;
                }
            };
            report.listed += listed.len();

            for remote_job in &listed {
                let key = remote_job.identity(project_id).canonical_key();
                let Some(job) = active.get_mut(&key) else {
                    debug!(key = %key, "Listed job has no persisted record");
                    continue;
                };
                unmatched.remove(&key);
                match self.fetcher.describe(remote_job, reservation.as_ref()) {
                    Ok(detail) => {
                        job.detail = detail;
                        refreshed.insert(key);
                    }
                    Err(err) => debug!(key = %key, error = %err, "Listed job not described"),
                }
            }
        }

        for key in &unmatched {
            debug!(key = %key, "Active job absent from remote listing, leaving for completion");
        }
        report.unmatched = unmatched.iter().cloned().collect();

        if !report.listing_failed {
            report.evicted = self.stale_keys(&active, &unmatched, Utc::now());
        }

        let to_write: Vec<Job> = refreshed
            .iter()
            .filter(|key| !report.evicted.contains(*key))
            .filter_map(|key| active.get(key).cloned())
            .collect();
        report.refreshed = to_write.len();
        self.metrics.add(Counter::SweepRecordsRefreshed, to_write.len() as u64);

        if !to_write.is_empty() {
            if let Err(err) = self.store.jobs().put_multi(&to_write).await {
                warn!(project_id, error = %err, "Bulk write failed, next sweep will repair");
                self.metrics.inc(Counter::BulkWriteFailures);
                report.write_failed = true;
            }
        }

        if !report.evicted.is_empty() {
            self.store.jobs().delete_multi(&report.evicted).await?;
            self.metrics.add(Counter::SweepRecordsEvicted, report.evicted.len() as u64);
            info!(project_id, count = report.evicted.len(), "Evicted stale jobs");
        }

        debug!(
            project_id,
            loaded = report.loaded,
            refreshed = report.refreshed,
            listed = report.listed,
            unmatched = report.unmatched.len(),
            "Sweep finished"
        );
        Ok(report)
    }

    /// Unmatched records whose last refresh (or creation) is older than max staleness.
    fn stale_keys(
        &self,
        active: &BTreeMap<String, Job>,
        unmatched: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let Some(max_staleness) = self.config.max_staleness else {
            return Vec::new();
        };
        unmatched
            .iter()
            .filter(|key| {
                active.get(*key).is_some_and(|job| {
                    job.detail
                        .last_updated
                        .or(job.stats.create_time)
                        .is_some_and(|seen| now - seen > max_staleness)
                })
            })
            .cloned()
            .collect()
    }

    fn note_detail_error(&self, key: &str, err: &DetailError) {
        match err {
            DetailError::Remote(remote) => {
                warn!(key, error = %remote, "Detail fetch failed, keeping prior detail");
                self.metrics.inc(Counter::RemoteErrors);
            }
            DetailError::UnrecognizedConfig(kind) => {
                warn!(key, kind = %kind, "Unrecognized job configuration");
            }
        }
    }
}
