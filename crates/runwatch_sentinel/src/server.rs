//! HTTP surface: push delivery, sweep triggers, read endpoints and stats.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use runwatch_protocol::{decode_push, defaults, ErrorResponse, JobState, JobsResponse};
use runwatch_store::{JobQuery, StoreError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::dedup::CacheStats;
use crate::error::ReconcileError;
use crate::metrics::MetricsSnapshot;
use crate::reconciler::{NotificationOutcome, Reconciler, SweepReport};
use crate::reservations::{ReservationSync, SyncSummary};
use crate::scheduler::{fan_out, TaskQueue};

pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub queue: Arc<dyn TaskQueue>,
    /// `None` when no billing project is configured.
    pub reservations: Option<ReservationSync>,
    pub sweep_interval: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    let sweep_path = format!("{}/:project_id", defaults::SWEEP_PATH_PREFIX);
    Router::new()
        .route(defaults::PUSH_PATH, post(push))
        .route(&sweep_path, get(sweep_project).post(sweep_project))
        .route(defaults::FANOUT_PATH, get(fan_out_projects).post(fan_out_projects))
        .route(
            defaults::RESERVATION_SYNC_PATH,
            get(sync_reservations).post(sync_reservations),
        )
        .route("/v1/jobs", get(list_jobs))
        .route("/v1/jobid/:job_id", get(jobs_by_id))
        .route("/v1/jobs/:start/:end", get(jobs_in_window))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve `router(state)` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

/// Transport status for an engine failure.
///
/// A non-2xx answer is what makes the push transport redeliver, so the
/// completion race maps to 409 rather than a success code.
pub fn status_for(err: &ReconcileError) -> StatusCode {
    match err {
        ReconcileError::Malformed(_) => StatusCode::BAD_REQUEST,
        ReconcileError::RetryableRace { .. } => StatusCode::CONFLICT,
        ReconcileError::UnrecognizedConfig(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ReconcileError::Remote(_) => StatusCode::BAD_GATEWAY,
        ReconcileError::Store(_) | ReconcileError::TaskQueue(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        let status = status_for(&err);
        match &err {
            ReconcileError::RetryableRace { .. } => debug!(error = %err, "Nacking notification"),
            ReconcileError::Malformed(_) => warn!(error = %err, "Rejecting notification"),
            _ => error!(error = %err, "Request failed"),
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ReconcileError::Store(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Push and task handlers
// ============================================================================

async fn push(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<Json<NotificationOutcome>> {
    let (request, notification) = decode_push(&body).map_err(ReconcileError::from)?;
    debug!(
        message_id = %request.message.id(),
        kind = notification.kind(),
        key = %notification.identity().canonical_key(),
        "Push received"
    );
    let outcome = state.reconciler.handle(notification).await?;
    Ok(Json(outcome))
}

async fn sweep_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<SweepReport>> {
    if project_id.trim().is_empty() {
        return Err(ApiError::bad_request("project id is required"));
    }
    let report = state.reconciler.reconcile_project(&project_id).await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FanOutResponse {
    pub sweeps: usize,
}

async fn fan_out_projects(State(state): State<Arc<AppState>>) -> ApiResult<Json<FanOutResponse>> {
    let sweeps = fan_out(
        state.reconciler.store(),
        state.queue.as_ref(),
        state.sweep_interval,
    )
    .await?;
    Ok(Json(FanOutResponse { sweeps }))
}

async fn sync_reservations(State(state): State<Arc<AppState>>) -> ApiResult<Json<SyncSummary>> {
    let Some(sync) = &state.reservations else {
        return Err(ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "reservation sync is not configured".to_string(),
        });
    };
    Ok(Json(sync.sync().await?))
}

// ============================================================================
// Read endpoints
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    state: Option<String>,
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<JobsResponse>> {
    let mut query = JobQuery::all();
    if let Some(raw) = params.state.filter(|s| !s.is_empty()) {
        let job_state: JobState = raw.parse().map_err(ApiError::bad_request)?;
        query = query.with_state(job_state);
    }
    let jobs = state.reconciler.store().jobs().query(&query).await?;
    Ok(Json(JobsResponse::from_jobs(&jobs)))
}

async fn jobs_by_id(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobsResponse>> {
    let jobs = state
        .reconciler
        .store()
        .jobs()
        .query(&JobQuery::all().with_job_id(job_id))
        .await?;
    Ok(Json(JobsResponse::from_jobs(&jobs)))
}

async fn jobs_in_window(
    State(state): State<Arc<AppState>>,
    Path((start, end)): Path<(String, String)>,
) -> ApiResult<Json<JobsResponse>> {
    let start = parse_time("start", &start)?;
    let end = parse_time("end", &end)?;
    if start > end {
        return Err(ApiError::bad_request("start must not be after end"));
    }
    let jobs = state
        .reconciler
        .store()
        .jobs()
        .query(&JobQuery::all().within(start, end))
        .await?;
    Ok(Json(JobsResponse::from_jobs(&jobs)))
}

fn parse_time(field: &str, raw: &str) -> ApiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| ApiError::bad_request(format!("invalid {} time {:?}: {}", field, raw, err)))
}

// ============================================================================
// Stats and metrics
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub cache: CacheStats,
    pub jobs: Vec<String>,
    pub projects: Vec<String>,
    pub metrics: MetricsSnapshot,
}

async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatsResponse>> {
    let store = state.reconciler.store();
    let jobs = store.jobs().query(&JobQuery::all()).await?;
    let projects = store.jobs().distinct_projects().await?;
    Ok(Json(StatsResponse {
        cache: state.reconciler.gate().stats(),
        jobs: jobs.iter().map(|job| job.key()).collect(),
        projects,
        metrics: state.reconciler.metrics().snapshot(),
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.reconciler.metrics().prometheus_format(),
    )
}
