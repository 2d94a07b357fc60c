//! Core job model.
//!
//! A [`Job`] is identified by its [`JobIdentity`]; the canonical string form of
//! the identity is both the human readable key and the persisted primary key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::idempotency;

// ============================================================================
// Identity
// ============================================================================

/// Canonical identity of a remote job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobIdentity {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub project_id: String,
}

impl JobIdentity {
    pub fn new(
        project_id: impl Into<String>,
        location: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            location: location.into(),
            project_id: project_id.into(),
        }
    }

    /// `"[location] projectId:jobId"`, the persisted-store primary key.
    pub fn canonical_key(&self) -> String {
        canonical_key(&self.location, &self.project_id, &self.job_id)
    }

    /// Dedup fingerprint derived from the canonical key.
    pub fn fingerprint(&self) -> String {
        idempotency::fingerprint(&self.canonical_key())
    }

    /// An identity without a job id cannot be processed.
    pub fn is_empty(&self) -> bool {
        self.job_id.is_empty()
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}:{}", self.location, self.project_id, self.job_id)
    }
}

/// Build a canonical key from its parts.
///
/// Project ids may legitimately contain `:` (domain-scoped projects), so the
/// key is only collision free because location is bracketed and job ids
/// never contain `:`.
pub fn canonical_key(location: &str, project_id: &str, job_id: &str) -> String {
    format!("[{}] {}:{}", location, project_id, job_id)
}

// ============================================================================
// Statistics
// ============================================================================

/// Timestamps reported by the remote service at insert and completion.
///
/// `end_time` is `None` until completion is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Accepts RFC3339 strings, `null`, or the empty string.
fn deserialize_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
    }
}

// ============================================================================
// Detail
// ============================================================================

/// Remote job state as seen by this service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Done,
    #[default]
    Unknown,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Done => "Done",
            JobState::Unknown => "Unknown",
        }
    }

    /// Map the remote service's state enum (`PENDING`, `RUNNING`, `DONE`).
    pub fn from_remote(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => JobState::Pending,
            "RUNNING" => JobState::Running,
            "DONE" => JobState::Done,
            _ => JobState::Unknown,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, JobState::Done)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "done" => Ok(JobState::Done),
            "unknown" => Ok(JobState::Unknown),
            other => Err(format!("invalid job state: {}", other)),
        }
    }
}

/// Configuration type of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    Query,
    Copy,
    Extract,
    Load,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Query => "Query",
            JobType::Copy => "Copy",
            JobType::Extract => "Extract",
            JobType::Load => "Load",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time progress sample. `elapsed_ms` is milliseconds since job start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSample {
    pub active_units: i64,
    pub completed_units: i64,
    pub pending_units: i64,
    pub elapsed_ms: i64,
    pub slot_millis: i64,
}

/// Denormalized, type-specific metadata and progress of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    #[serde(rename = "type", default)]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub owning_account: String,
    /// Comma-joined source names.
    #[serde(default)]
    pub source: String,
    /// Comma-joined destination names or URIs.
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub statement_type: String,
    #[serde(default)]
    pub query: String,
    /// Remote order, never re-sorted.
    #[serde(default)]
    pub timeline: Vec<TimelineSample>,
    #[serde(default)]
    pub total_slot_millis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
    #[serde(default)]
    pub slot_count: i64,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl JobDetail {
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Annotate with the reservation assigned to the job's project.
    pub fn apply_reservation(&mut self, reservation: &Reservation) {
        self.reservation_id = Some(reservation.reservation_id.clone());
        self.slot_count = reservation.slot_count;
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// A tracked job, persisted 1:1 under its canonical key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub identity: JobIdentity,
    #[serde(default)]
    pub stats: JobStats,
    #[serde(default)]
    pub detail: JobDetail,
}

impl Job {
    pub fn new(identity: JobIdentity, stats: JobStats) -> Self {
        Self {
            identity,
            stats,
            detail: JobDetail::default(),
        }
    }

    pub fn key(&self) -> String {
        self.identity.canonical_key()
    }

    pub fn is_done(&self) -> bool {
        self.detail.is_done()
    }

    /// Most recent progress sample, or an empty sample.
    pub fn last_timeline(&self) -> TimelineSample {
        self.detail.timeline.last().copied().unwrap_or_default()
    }
}

/// Capacity assignment for a project. Keyed by `project_id` in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub reservation_id: String,
    pub project_id: String,
    pub slot_count: i64,
}
