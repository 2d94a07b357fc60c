//! Read-model types for the list endpoints.
//!
//! These are pure projections of persisted [`Job`] records into the flat
//! shape the dashboard consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Job;

/// One flattened job row. The timeline is split into parallel arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct JobDisplay {
    pub createtime: Option<DateTime<Utc>>,
    pub starttime: Option<DateTime<Utc>>,
    pub endtime: Option<DateTime<Utc>>,
    pub projectid: String,
    pub jobid: String,
    pub location: String,
    pub activeunits: Vec<i64>,
    pub completedunits: Vec<i64>,
    pub pendingunits: Vec<i64>,
    pub elapsed: Vec<i64>,
    #[serde(rename = "type")]
    pub job_type: String,
    pub state: String,
    pub error: String,
    pub email: String,
    pub src: String,
    pub dst: String,
    pub priority: String,
    pub statementtype: String,
    pub query: String,
    pub slotmillis: i64,
    pub updated: Option<DateTime<Utc>>,
    pub reservationid: String,
    pub slots: i64,
}

impl From<&Job> for JobDisplay {
    fn from(job: &Job) -> Self {
        let detail = &job.detail;
        let timeline = &detail.timeline;
        Self {
            createtime: job.stats.create_time,
            starttime: job.stats.start_time,
            endtime: job.stats.end_time,
            projectid: job.identity.project_id.clone(),
            jobid: job.identity.job_id.clone(),
            location: job.identity.location.clone(),
            activeunits: timeline.iter().map(|s| s.active_units).collect(),
            completedunits: timeline.iter().map(|s| s.completed_units).collect(),
            pendingunits: timeline.iter().map(|s| s.pending_units).collect(),
            elapsed: timeline.iter().map(|s| s.elapsed_ms).collect(),
            job_type: detail
                .job_type
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            state: detail.state.as_str().to_string(),
            error: detail.error.clone().unwrap_or_default(),
            email: detail.owning_account.clone(),
            src: detail.source.clone(),
            dst: detail.destination.clone(),
            priority: detail.priority.clone(),
            statementtype: detail.statement_type.clone(),
            query: detail.query.clone(),
            slotmillis: detail.total_slot_millis,
            updated: detail.last_updated,
            reservationid: detail.reservation_id.clone().unwrap_or_default(),
            slots: detail.slot_count,
        }
    }
}

/// `{"data": [...]}` envelope returned by every list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobsResponse {
    pub data: Vec<JobDisplay>,
}

impl JobsResponse {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        Self {
            data: jobs.into_iter().map(JobDisplay::from).collect(),
        }
    }
}

/// Error body for 4xx/5xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobIdentity, JobState, JobStats, JobType, TimelineSample};

    #[test]
    fn test_display_splits_timeline() {
        let mut job = Job::new(JobIdentity::new("p1", "US", "j1"), JobStats::default());
        job.detail.job_type = Some(JobType::Load);
        job.detail.state = JobState::Running;
        job.detail.timeline = vec![
            TimelineSample {
                active_units: 1,
                completed_units: 2,
                pending_units: 3,
                elapsed_ms: 10,
                slot_millis: 0,
            },
            TimelineSample {
                active_units: 4,
                completed_units: 5,
                pending_units: 6,
                elapsed_ms: 20,
                slot_millis: 0,
            },
        ];

        let display = JobDisplay::from(&job);
        assert_eq!(display.activeunits, vec![1, 4]);
        assert_eq!(display.elapsed, vec![10, 20]);
        assert_eq!(display.job_type, "Load");
        assert_eq!(display.state, "Running");

        let value = serde_json::to_value(JobsResponse::from_jobs([&job])).unwrap();
        assert_eq!(value["data"][0]["jobid"], "j1");
        assert_eq!(value["data"][0]["type"], "Load");
    }
}
