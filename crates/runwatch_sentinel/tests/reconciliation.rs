//! End-to-end reconciliation scenarios against an in-process query service,
//! an in-memory store and an in-memory dedup cache.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use runwatch_protocol::envelope::JobEvent;
use runwatch_protocol::remote::{
    JobReference, QueryOptions, QueryStatistics, RemoteConfiguration, RemoteStatus,
    RemoteTimelineSample,
};
use runwatch_protocol::{
    decode_push, JobIdentity, JobState, JobStats, PushRequest, QueryResponse, RemoteJob,
    TimelineSample,
};
use runwatch_sentinel::{
    CompleteOutcome, Counter, InsertOutcome, MemoryCache, NotificationOutcome, QueryService,
    ReconcileError, Reconciler, ReconcilerConfig, RemoteError, ReservationSync,
};
use runwatch_store::{
    JobQuery, JobStore, MemoryBackend, ReservationStore, StateStore, StateStoreBackend, StoreError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Fakes
// ============================================================================

/// In-process query service with scripted jobs, listings and query rows.
#[derive(Default)]
struct FakeQueryService {
    jobs: Mutex<HashMap<String, RemoteJob>>,
    listings: Mutex<HashMap<(String, JobState), Vec<RemoteJob>>>,
    rows: Mutex<Option<QueryResponse>>,
    get_calls: AtomicUsize,
}

impl FakeQueryService {
    fn set_job(&self, job: RemoteJob) {
        let key = job.identity("").canonical_key();
        self.jobs.lock().unwrap().insert(key, job);
    }

    fn set_listing(&self, project_id: &str, state: JobState, jobs: Vec<RemoteJob>) {
        self.listings
            .lock()
            .unwrap()
            .insert((project_id.to_string(), state), jobs);
    }

    fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryService for FakeQueryService {
    async fn get_job(&self, identity: &JobIdentity) -> Result<RemoteJob, RemoteError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let key = identity.canonical_key();
        self.jobs
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(RemoteError::NotFound(key))
    }

    async fn list_jobs(&self, project_id: &str, state: JobState) -> Result<Vec<RemoteJob>, RemoteError> {
        Ok(self
            .listings
            .lock()
            .unwrap()
            .get(&(project_id.to_string(), state))
            .cloned()
            .unwrap_or_default())
    }

    async fn run_query(&self, project_id: &str, _sql: &str) -> Result<QueryResponse, RemoteError> {
        self.rows
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RemoteError::Unavailable(project_id.to_string()))
    }
}

/// Memory backend whose bulk writes always fail.
#[derive(Default)]
struct FailingBulkWrites {
    inner: MemoryBackend,
}

#[async_trait]
impl StateStoreBackend for FailingBulkWrites {
    async fn init(&self) -> runwatch_store::Result<()> {
        Ok(())
    }

    fn jobs(&self) -> &dyn JobStore {
        self
    }

    fn reservations(&self) -> &dyn ReservationStore {
        self.inner.reservations()
    }
}

#[async_trait]
impl JobStore for FailingBulkWrites {
    async fn get(&self, key: &str) -> runwatch_store::Result<runwatch_protocol::Job> {
        self.inner.jobs().get(key).await
    }

    async fn put(&self, job: &runwatch_protocol::Job) -> runwatch_store::Result<()> {
        self.inner.jobs().put(job).await
    }

    async fn put_multi(&self, jobs: &[runwatch_protocol::Job]) -> runwatch_store::Result<()> {
        Err(StoreError::PartialWrite {
            applied: 0,
            failed: jobs.len(),
            first_error: "quota exceeded".to_string(),
        })
    }

    async fn delete(&self, key: &str) -> runwatch_store::Result<()> {
        self.inner.jobs().delete(key).await
    }

    async fn delete_multi(&self, keys: &[String]) -> runwatch_store::Result<()> {
        self.inner.jobs().delete_multi(keys).await
    }

    async fn query(&self, query: &JobQuery) -> runwatch_store::Result<Vec<runwatch_protocol::Job>> {
        self.inner.jobs().query(query).await
    }

    async fn distinct_projects(&self) -> runwatch_store::Result<Vec<String>> {
        self.inner.jobs().distinct_projects().await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn engine_with(store: StateStore, remote: Arc<FakeQueryService>) -> Reconciler {
    Reconciler::new(
        store,
        remote,
        Arc::new(MemoryCache::new()),
        ReconcilerConfig::default(),
    )
}

fn sample(active: i64, completed: i64, pending: i64, elapsed: i64) -> RemoteTimelineSample {
    RemoteTimelineSample {
        elapsed_ms: Some(elapsed),
        total_slot_ms: Some(elapsed * 2),
        pending_units: Some(pending),
        completed_units: Some(completed),
        active_units: Some(active),
    }
}

fn query_job(identity: &JobIdentity, state: &str, timeline: Vec<RemoteTimelineSample>) -> RemoteJob {
    RemoteJob {
        id: format!("{}:{}.{}", identity.project_id, identity.location, identity.job_id),
        job_reference: JobReference {
            project_id: identity.project_id.clone(),
            job_id: identity.job_id.clone(),
            location: identity.location.clone(),
        },
        status: RemoteStatus {
            state: state.to_string(),
            error_result: None,
        },
        user_email: "ana@example.com".to_string(),
        configuration: Some(RemoteConfiguration {
            query: Some(QueryOptions {
                query: "SELECT 1".to_string(),
                destination_table: None,
                priority: None,
            }),
            ..Default::default()
        }),
        statistics: runwatch_protocol::remote::RemoteStatistics {
            query: Some(QueryStatistics {
                timeline,
                statement_type: "SELECT".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn push_body(event: &JobEvent) -> Vec<u8> {
    serde_json::to_vec(&PushRequest::wrap(event, "msg-1", "projects/p/subscriptions/s")).unwrap()
}

fn ended(at: DateTime<Utc>) -> JobStats {
    JobStats {
        end_time: Some(at),
        ..Default::default()
    }
}

fn created(at: DateTime<Utc>) -> JobStats {
    JobStats {
        create_time: Some(at),
        ..Default::default()
    }
}

// ============================================================================
// Push paths
// ============================================================================

#[tokio::test]
async fn test_redelivered_insert_is_a_no_op() {
    let remote = Arc::new(FakeQueryService::default());
    let identity = JobIdentity::new("p1", "US", "j1");
    remote.set_job(query_job(&identity, "RUNNING", vec![]));
    let engine = engine_with(StateStore::memory(), Arc::clone(&remote));

    let body = push_body(&JobEvent::insert(identity.clone(), created(Utc::now())));
    let (_, first) = decode_push(&body).unwrap();
    let (_, second) = decode_push(&body).unwrap();

    assert_eq!(
        engine.handle(first).await.unwrap(),
        NotificationOutcome::Insert(InsertOutcome::Persisted)
    );
    assert_eq!(
        engine.handle(second).await.unwrap(),
        NotificationOutcome::Insert(InsertOutcome::Duplicate)
    );

    assert_eq!(remote.get_calls(), 1);
    let jobs = engine.store().jobs().query(&JobQuery::all()).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(engine.metrics().get(Counter::InsertsDeduplicated), 1);
}

#[tokio::test]
async fn test_early_completion_nacked_twice_then_acked() {
    let remote = Arc::new(FakeQueryService::default());
    let engine = engine_with(StateStore::memory(), remote);
    let identity = JobIdentity::new("p1", "US", "early");
    let stats = ended(Utc::now() - ChronoDuration::minutes(5));

    for attempt in 1..=2u32 {
        let err = engine
            .on_complete(identity.clone(), stats.clone(), Default::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        match err {
            ReconcileError::RetryableRace { attempts, .. } => assert_eq!(attempts, attempt),
            other => panic!("expected race, got {:?}", other),
        }
    }

    let third = engine
        .on_complete(identity.clone(), stats, Default::default())
        .await
        .unwrap();
    assert_eq!(third, CompleteOutcome::GaveUp);
    assert!(engine
        .store()
        .jobs()
        .get(&identity.canonical_key())
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_old_completion_acked_without_counting() {
    let remote = Arc::new(FakeQueryService::default());
    let engine = engine_with(StateStore::memory(), remote);
    let identity = JobIdentity::new("p1", "US", "old");

    let outcome = engine
        .on_complete(
            identity.clone(),
            ended(Utc::now() - ChronoDuration::minutes(45)),
            Default::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, CompleteOutcome::Stale);
    assert_eq!(engine.nacks().count(&identity.canonical_key()), 0);
    assert_eq!(engine.metrics().get(Counter::CompletionNacks), 0);
}

#[tokio::test]
async fn test_insert_then_complete_end_to_end() {
    let remote = Arc::new(FakeQueryService::default());
    let identity = JobIdentity::new("p1", "US", "j1");
    remote.set_job(query_job(&identity, "RUNNING", vec![sample(4, 1, 2, 1000)]));
    let engine = engine_with(StateStore::memory(), Arc::clone(&remote));
    let key = identity.canonical_key();

    let insert = push_body(&JobEvent::insert(identity.clone(), JobStats::default()));
    let (_, notification) = decode_push(&insert).unwrap();
    engine.handle(notification).await.unwrap();

    let stored = engine.store().jobs().get(&key).await.unwrap();
    assert_eq!(stored.detail.state, JobState::Running);
    assert_eq!(stored.detail.job_type, Some(runwatch_protocol::JobType::Query));
    assert_eq!(stored.detail.owning_account, "ana@example.com");

    let end = Utc::now() - ChronoDuration::seconds(3);
    let completion = push_body(&JobEvent::completed(identity.clone(), ended(end), None));
    let (_, notification) = decode_push(&completion).unwrap();
    assert_eq!(
        engine.handle(notification).await.unwrap(),
        NotificationOutcome::Complete(CompleteOutcome::Updated)
    );

    let done = engine.store().jobs().get(&key).await.unwrap();
    assert_eq!(done.detail.state, JobState::Done);
    assert_eq!(done.stats.end_time, Some(end));
    assert_eq!(done.identity, identity);
}

#[tokio::test]
async fn test_completion_without_end_time_uses_last_update() {
    let remote = Arc::new(FakeQueryService::default());
    let identity = JobIdentity::new("p1", "EU", "j2");
    remote.set_job(query_job(&identity, "RUNNING", vec![]));
    let engine = engine_with(StateStore::memory(), remote);

    engine
        .on_insert(identity.clone(), JobStats::default())
        .await
        .unwrap();
    let before = engine.store().jobs().get(&identity.canonical_key()).await.unwrap();
    assert!(before.detail.last_updated.is_some());

    engine
        .on_complete(
            identity.clone(),
            JobStats::default(),
            runwatch_protocol::JobDetail {
                error: Some("Quota exceeded".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let after = engine.store().jobs().get(&identity.canonical_key()).await.unwrap();
    assert_eq!(after.detail.state, JobState::Done);
    assert_eq!(after.stats.end_time, before.detail.last_updated);
    assert_eq!(after.detail.error.as_deref(), Some("Quota exceeded"));
}

#[tokio::test]
async fn test_insert_of_finished_job_is_skipped() {
    let remote = Arc::new(FakeQueryService::default());
    let identity = JobIdentity::new("p1", "US", "quick");
    remote.set_job(query_job(&identity, "DONE", vec![]));
    let engine = engine_with(StateStore::memory(), remote);

    let outcome = engine
        .on_insert(identity.clone(), JobStats::default())
        .await
        .unwrap();
    assert_eq!(outcome, InsertOutcome::SkippedDone);
    assert!(engine
        .store()
        .jobs()
        .query(&JobQuery::all())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_completion_after_skipped_insert_keeps_detail() {
    let remote = Arc::new(FakeQueryService::default());
    let identity = JobIdentity::new("p1", "US", "quick");
    remote.set_job(query_job(&identity, "DONE", vec![]));
    let engine = engine_with(StateStore::memory(), Arc::clone(&remote));

    let inserted = engine
        .on_insert(identity.clone(), JobStats::default())
        .await
        .unwrap();
    assert_eq!(inserted, InsertOutcome::SkippedDone);

    let end = Utc::now() - ChronoDuration::seconds(5);
    let outcome = engine
        .on_complete(identity.clone(), ended(end), Default::default())
        .await
        .unwrap();
    assert_eq!(outcome, CompleteOutcome::Updated);

    let stored = engine.store().jobs().get(&identity.canonical_key()).await.unwrap();
    assert_eq!(stored.detail.state, JobState::Done);
    assert_eq!(stored.detail.job_type, Some(runwatch_protocol::JobType::Query));
    assert_eq!(stored.detail.owning_account, "ana@example.com");
    assert_eq!(stored.stats.end_time, Some(end));
}

// ============================================================================
// Sweeps
// ============================================================================

#[tokio::test]
async fn test_sweep_refreshes_timeline_from_listing() {
    let remote = Arc::new(FakeQueryService::default());
    let engine = engine_with(StateStore::memory(), Arc::clone(&remote));
    let identity = JobIdentity::new("p1", "US", "long");
    let create_time = Utc::now() - ChronoDuration::minutes(20);

    let mut job = runwatch_protocol::Job::new(identity.clone(), created(create_time));
    job.detail.state = JobState::Running;
    job.detail.timeline = vec![TimelineSample {
        active_units: 1,
        ..Default::default()
    }];
    engine.store().jobs().put(&job).await.unwrap();

    // Detail fetch misses; the listing alone carries the fresh timeline.
    remote.set_listing(
        "p1",
        JobState::Running,
        vec![query_job(
            &identity,
            "RUNNING",
            vec![sample(8, 2, 5, 1000), sample(6, 9, 1, 2000)],
        )],
    );

    let report = engine.reconcile_project("p1").await.unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(report.listed, 1);
    assert_eq!(report.refreshed, 1);
    assert!(report.unmatched.is_empty());

    let stored = engine.store().jobs().get(&identity.canonical_key()).await.unwrap();
    assert_eq!(stored.identity, identity);
    assert_eq!(stored.stats.create_time, Some(create_time));
    assert_eq!(stored.detail.timeline.len(), 2);
    assert_eq!(stored.last_timeline().active_units, 6);
    assert_eq!(stored.last_timeline().completed_units, 9);
    assert_eq!(stored.last_timeline().elapsed_ms, 2000);
}

#[tokio::test]
async fn test_sweep_evicts_only_stale_unlisted_jobs() {
    let remote = Arc::new(FakeQueryService::default());
    let engine = engine_with(StateStore::memory(), remote);
    let now = Utc::now();

    let mut stale = runwatch_protocol::Job::new(JobIdentity::new("p1", "US", "stale"), JobStats::default());
    stale.detail.state = JobState::Running;
    stale.detail.last_updated = Some(now - ChronoDuration::hours(8));
    let mut recent = runwatch_protocol::Job::new(JobIdentity::new("p1", "US", "recent"), JobStats::default());
    recent.detail.state = JobState::Pending;
    recent.detail.last_updated = Some(now - ChronoDuration::minutes(10));
    let mut finished = runwatch_protocol::Job::new(JobIdentity::new("p1", "US", "finished"), JobStats::default());
    finished.detail.state = JobState::Done;
    finished.detail.last_updated = Some(now - ChronoDuration::days(3));
    for job in [&stale, &recent, &finished] {
        engine.store().jobs().put(job).await.unwrap();
    }

    let report = engine.reconcile_project("p1").await.unwrap();
    assert_eq!(report.loaded, 3);
    assert_eq!(report.unmatched, vec![recent.key(), stale.key()]);
    assert_eq!(report.evicted, vec![stale.key()]);

    let jobs = engine.store().jobs();
    assert!(jobs.get(&stale.key()).await.unwrap_err().is_not_found());
    assert!(jobs.get(&recent.key()).await.is_ok());
    assert!(jobs.get(&finished.key()).await.is_ok());
    assert_eq!(engine.metrics().get(Counter::SweepRecordsEvicted), 1);
}

#[tokio::test]
async fn test_sweep_survives_bulk_write_failure() {
    let remote = Arc::new(FakeQueryService::default());
    let identity = JobIdentity::new("p1", "US", "j");
    remote.set_job(query_job(&identity, "RUNNING", vec![sample(1, 0, 3, 10)]));
    let store = StateStore::from_backend(FailingBulkWrites::default());
    let engine = engine_with(store, remote);

    let mut job = runwatch_protocol::Job::new(identity.clone(), JobStats::default());
    job.detail.state = JobState::Running;
    engine.store().jobs().put(&job).await.unwrap();

    let report = engine.reconcile_project("p1").await.unwrap();
    assert!(report.write_failed);
    assert_eq!(engine.metrics().get(Counter::BulkWriteFailures), 1);

    // Nothing applied; the next sweep repairs.
    let stored = engine.store().jobs().get(&identity.canonical_key()).await.unwrap();
    assert!(stored.detail.timeline.is_empty());
}

// ============================================================================
// Reservations
// ============================================================================

#[tokio::test]
async fn test_reservation_sync_annotates_new_jobs() {
    let remote = Arc::new(FakeQueryService::default());
    *remote.rows.lock().unwrap() = Some(
        serde_json::from_str(
            r#"{
                "schema": {"fields": [{"name": "reservation_id"}, {"name": "project_id"}, {"name": "slot_count"}]},
                "rows": [
                    {"f": [{"v": "res-prod"}, {"v": "p1"}, {"v": "2000"}]},
                    {"f": [{"v": "res-dev"}, {"v": null}, {"v": "100"}]}
                ],
                "jobComplete": true
            }"#,
        )
        .unwrap(),
    );
    let store = StateStore::memory();
    let sync = ReservationSync::new(remote.clone(), store.clone(), "billing", "SELECT 1");

    let summary = sync.sync().await.unwrap();
    assert_eq!(summary.rows, 2);
    assert_eq!(summary.written, 1);
    assert_eq!(summary.skipped, 1);

    let identity = JobIdentity::new("p1", "US", "annotated");
    remote.set_job(query_job(&identity, "RUNNING", vec![]));
    let engine = engine_with(store, remote);
    engine
        .on_insert(identity.clone(), JobStats::default())
        .await
        .unwrap();

    let stored = engine.store().jobs().get(&identity.canonical_key()).await.unwrap();
    assert_eq!(stored.detail.reservation_id.as_deref(), Some("res-prod"));
    assert_eq!(stored.detail.slot_count, 2000);
}
