//! Client for the remote query-execution service.
//!
//! The engine only depends on [`QueryService`]; [`HttpQueryService`] speaks
//! the service's REST API and tests substitute in-process fakes.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use runwatch_protocol::{JobIdentity, JobState, QueryResponse, RemoteJob, RemoteJobList};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Page size requested from the listing API.
const LIST_PAGE_SIZE: u32 = 1000;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote job not found: {0}")]
    NotFound(String),

    #[error("Remote service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Query did not complete: {0}")]
    Incomplete(String),

    #[error("Remote service unavailable: {0}")]
    Unavailable(String),
}

/// Opaque job listing/detail provider.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Current resource of one job.
    async fn get_job(&self, identity: &JobIdentity) -> Result<RemoteJob, RemoteError>;

    /// All jobs of `project_id` in `state`, across all users. Every page is
    /// drained before returning.
    async fn list_jobs(&self, project_id: &str, state: JobState)
        -> Result<Vec<RemoteJob>, RemoteError>;

    /// Run a standard-SQL query billed to `project_id` and return its rows.
    async fn run_query(&self, project_id: &str, sql: &str) -> Result<QueryResponse, RemoteError>;
}

/// `stateFilter` value for the listing API.
fn state_filter(state: JobState) -> Option<&'static str> {
    match state {
        JobState::Pending => Some("pending"),
        JobState::Running => Some("running"),
        JobState::Done => Some("done"),
        JobState::Unknown => None,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u64,
}

/// REST client. Cheap to clone.
#[derive(Clone)]
pub struct HttpQueryService {
    client: Client,
    base_url: String,
    access_token: Option<String>,
    timeout: Duration,
}

impl HttpQueryService {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.filter(|token| !token.is_empty()),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, RemoteError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl QueryService for HttpQueryService {
    async fn get_job(&self, identity: &JobIdentity) -> Result<RemoteJob, RemoteError> {
        let url = self.url(&format!(
            "projects/{}/jobs/{}",
            identity.project_id, identity.job_id
        ));
        let mut request = self.client.get(url);
        if !identity.location.is_empty() {
            request = request.query(&[("location", identity.location.as_str())]);
        }
        self.send(request, &identity.canonical_key()).await
    }

    async fn list_jobs(
        &self,
        project_id: &str,
        state: JobState,
    ) -> Result<Vec<RemoteJob>, RemoteError> {
        let Some(filter) = state_filter(state) else {
            return Ok(Vec::new());
        };
        let url = self.url(&format!("projects/{}/jobs", project_id));
        let page_size = LIST_PAGE_SIZE.to_string();

        let mut jobs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.client.get(&url).query(&[
                ("allUsers", "true"),
                ("projection", "full"),
                ("stateFilter", filter),
                ("maxResults", page_size.as_str()),
            ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: RemoteJobList = self.send(request, project_id).await?;
            jobs.extend(page.jobs);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(project_id, state = %state, count = jobs.len(), "Listed remote jobs");
        Ok(jobs)
    }

    async fn run_query(&self, project_id: &str, sql: &str) -> Result<QueryResponse, RemoteError> {
        let url = self.url(&format!("projects/{}/queries", project_id));
        let body = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            timeout_ms: self.timeout.as_millis() as u64,
        };
        let response: QueryResponse = self.send(self.client.post(url).json(&body), project_id).await?;
        if !response.job_complete {
            return Err(RemoteError::Incomplete(project_id.to_string()));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_filter() {
        assert_eq!(state_filter(JobState::Running), Some("running"));
        assert_eq!(state_filter(JobState::Pending), Some("pending"));
        assert_eq!(state_filter(JobState::Unknown), None);
    }

    #[test]
    fn test_url_joining() {
        let service = HttpQueryService::new(
            "https://example.test/v2/",
            Some(String::new()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            service.url("/projects/p1/jobs"),
            "https://example.test/v2/projects/p1/jobs"
        );
        assert!(service.access_token.is_none());
    }

    #[test]
    fn test_query_request_shape() {
        let body = serde_json::to_value(QueryRequest {
            query: "SELECT 1",
            use_legacy_sql: false,
            timeout_ms: 1000,
        })
        .unwrap();
        assert_eq!(body["useLegacySql"], false);
        assert_eq!(body["timeoutMs"], 1000);
    }
}
