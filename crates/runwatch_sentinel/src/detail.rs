//! Detail fetcher: remote job resource -> denormalized [`JobDetail`].

use chrono::{DateTime, Utc};
use runwatch_protocol::remote::{join_tables, RemoteTimelineSample, TableReference};
use runwatch_protocol::{
    ConfigError, JobConfig, JobDetail, JobIdentity, RemoteJob, Reservation, TimelineSample,
};
use runwatch_store::StateStore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::remote::{QueryService, RemoteError};

#[derive(Error, Debug)]
pub enum DetailError {
    /// The configuration variant is not one of query/copy/extract/load.
    #[error("Unrecognized job configuration: {0}")]
    UnrecognizedConfig(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<ConfigError> for DetailError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Unrecognized(kind) => DetailError::UnrecognizedConfig(kind),
            ConfigError::Missing => DetailError::UnrecognizedConfig("<none>".to_string()),
        }
    }
}

fn table_name(table: Option<&TableReference>) -> String {
    table.map(TableReference::fully_qualified_name).unwrap_or_default()
}

fn convert_timeline(samples: &[RemoteTimelineSample]) -> Vec<TimelineSample> {
    samples
        .iter()
        .map(|sample| TimelineSample {
            active_units: sample.active_units.unwrap_or(0),
            completed_units: sample.completed_units.unwrap_or(0),
            pending_units: sample.pending_units.unwrap_or(0),
            elapsed_ms: sample.elapsed_ms.unwrap_or(0),
            slot_millis: sample.total_slot_ms.unwrap_or(0),
        })
        .collect()
}

/// Build a detail record from a remote resource. Pure.
///
/// Timeline order is the order the service returned.
pub fn normalize(
    remote: &RemoteJob,
    reservation: Option<&Reservation>,
    now: DateTime<Utc>,
) -> Result<JobDetail, DetailError> {
    let config = remote
        .configuration
        .as_ref()
        .ok_or(ConfigError::Missing)?
        .classify()?;

    let statistics = &remote.statistics;
    let query_stats = statistics.query.as_ref();

    let mut detail = JobDetail {
        job_type: Some(config.job_type()),
        state: remote.state(),
        error: remote.error_text(),
        owning_account: remote.user_email.clone(),
        total_slot_millis: statistics
            .total_slot_ms
            .or_else(|| query_stats.and_then(|q| q.total_slot_ms))
            .unwrap_or(0),
        last_updated: Some(now),
        ..Default::default()
    };
    if let Some(reservation) = reservation {
        detail.apply_reservation(reservation);
    }

    match config {
        JobConfig::Query {
            destination,
            priority,
            query,
        } => {
            detail.destination = table_name(destination.as_ref());
            detail.priority = priority;
            detail.query = query;
            if let Some(stats) = query_stats {
                detail.statement_type = stats.statement_type.clone();
                detail.timeline = convert_timeline(&stats.timeline);
                detail.source = join_tables(&stats.referenced_tables);
            }
        }
        JobConfig::Copy {
            sources,
            destination,
        } => {
            detail.destination = table_name(destination.as_ref());
            detail.source = join_tables(&sources);
        }
        JobConfig::Extract {
            source,
            destination_uris,
        } => {
            detail.destination = destination_uris.join(",");
            detail.source = table_name(source.as_ref());
        }
        JobConfig::Load { destination } => {
            detail.destination = table_name(destination.as_ref());
        }
    }

    Ok(detail)
}

/// Fetches remote job state and annotates it with the project's reservation.
#[derive(Clone)]
pub struct DetailFetcher {
    remote: Arc<dyn QueryService>,
    store: StateStore,
}

impl DetailFetcher {
    pub fn new(remote: Arc<dyn QueryService>, store: StateStore) -> Self {
        Self { remote, store }
    }

    /// Best-effort reservation lookup. Misses and store errors are logged.
    pub async fn reservation_for(&self, project_id: &str) -> Option<Reservation> {
        match self.store.reservations().get(project_id).await {
            Ok(reservation) => Some(reservation),
            Err(err) if err.is_not_found() => {
                debug!(project_id, "No reservation for project");
                None
            }
            Err(err) => {
                warn!(project_id, error = %err, "Reservation lookup failed");
                None
            }
        }
    }

    pub async fn fetch_detail(&self, identity: &JobIdentity) -> Result<JobDetail, DetailError> {
        let reservation = self.reservation_for(&identity.project_id).await;
        self.fetch_with(identity, reservation.as_ref()).await
    }

    /// Like [`Self::fetch_detail`] with an already resolved reservation.
    pub async fn fetch_with(
        &self,
        identity: &JobIdentity,
        reservation: Option<&Reservation>,
    ) -> Result<JobDetail, DetailError> {
        let remote = self.remote.get_job(identity).await?;
        normalize(&remote, reservation, Utc::now())
    }

    /// Detail of a resource already in hand (e.g. a listing item).
    pub fn describe(
        &self,
        remote: &RemoteJob,
        reservation: Option<&Reservation>,
    ) -> Result<JobDetail, DetailError> {
        normalize(remote, reservation, Utc::now())
    }
}
