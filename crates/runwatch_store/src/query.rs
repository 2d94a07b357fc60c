//! Filter-query over persisted jobs.

use chrono::{DateTime, Utc};
use runwatch_protocol::{Job, JobState};

/// Filters for [`crate::JobStore::query`]. All set filters must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    pub project_id: Option<String>,
    pub job_id: Option<String>,
    pub state: Option<JobState>,
    pub window: Option<TimeWindow>,
}

/// Jobs overlapping `[start, end]`: started at or before `end`, and either
/// still running (no end time) or ended after `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl JobQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn within(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.window = Some(TimeWindow { start, end });
        self
    }

    /// In-process evaluation; backends without native filtering use this.
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(project_id) = &self.project_id {
            if &job.identity.project_id != project_id {
                return false;
            }
        }
        if let Some(job_id) = &self.job_id {
            if &job.identity.job_id != job_id {
                return false;
            }
        }
        if let Some(state) = self.state {
            if job.detail.state != state {
                return false;
            }
        }
        if let Some(window) = self.window {
            let Some(start_time) = job.stats.start_time else {
                return false;
            };
            if start_time > window.end {
                return false;
            }
            if let Some(end_time) = job.stats.end_time {
                if end_time <= window.start {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use runwatch_protocol::{JobIdentity, JobStats};

    fn job_between(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Job {
        Job::new(
            JobIdentity::new("p1", "US", "j1"),
            JobStats {
                create_time: Some(start),
                start_time: Some(start),
                end_time: end,
            },
        )
    }

    #[test]
    fn test_window_overlap() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let query = JobQuery::all().within(t0, t0 + Duration::hours(1));

        // Ended inside the window
        assert!(query.matches(&job_between(
            t0 - Duration::minutes(10),
            Some(t0 + Duration::minutes(5))
        )));
        // Still running
        assert!(query.matches(&job_between(t0 - Duration::hours(3), None)));
        // Ended before the window
        assert!(!query.matches(&job_between(
            t0 - Duration::hours(2),
            Some(t0 - Duration::hours(1))
        )));
        // Started after the window
        assert!(!query.matches(&job_between(t0 + Duration::hours(2), None)));
    }

    #[test]
    fn test_field_filters() {
        let mut job = job_between(Utc::now(), None);
        job.detail.state = JobState::Running;

        assert!(JobQuery::for_project("p1").matches(&job));
        assert!(!JobQuery::for_project("p2").matches(&job));
        assert!(JobQuery::all().with_job_id("j1").matches(&job));
        assert!(!JobQuery::all().with_state(JobState::Done).matches(&job));
    }
}
