//! Push notification decoding.
//!
//! The push transport delivers `{message: {data: <base64 JSON>, messageId, ...}, subscription}`.
//! Message id and publish time arrive under both camelCase and snake_case keys.
//! The decoded data is an audit-log entry whose service data carries either a
//! job-insert response or a job-completed event, never both in valid input.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{DecodeError, Result};
use crate::types::{JobDetail, JobIdentity, JobState, JobStats};

/// Envelope posted by the push subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushRequest {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Base64 encoded job event JSON.
    #[serde(default)]
    pub data: String,
    #[serde(default, rename = "messageId")]
    pub message_id: String,
    #[serde(default, rename = "message_id", skip_serializing_if = "String::is_empty")]
    pub message_id_snake: String,
    #[serde(default, rename = "publishTime", skip_serializing_if = "String::is_empty")]
    pub publish_time: String,
    #[serde(default, rename = "publish_time", skip_serializing_if = "String::is_empty")]
    pub publish_time_snake: String,
}

impl PushMessage {
    /// Message id from whichever key the transport populated.
    pub fn id(&self) -> &str {
        first_non_empty(&self.message_id, &self.message_id_snake)
    }

    pub fn publish_time(&self) -> &str {
        first_non_empty(&self.publish_time, &self.publish_time_snake)
    }
}

fn first_non_empty<'a>(camel: &'a str, snake: &'a str) -> &'a str {
    if camel.is_empty() {
        snake
    } else {
        camel
    }
}

impl PushRequest {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(DecodeError::Envelope)
    }

    /// Decode the base64 payload into a [`JobEvent`].
    pub fn decode_event(&self) -> Result<JobEvent> {
        let raw = STANDARD.decode(self.message.data.trim())?;
        serde_json::from_slice(&raw).map_err(DecodeError::JobEvent)
    }

    /// Build an envelope around a job event (test fixtures, replay tooling).
    pub fn wrap(event: &JobEvent, id: impl Into<String>, subscription: impl Into<String>) -> Self {
        let json = serde_json::to_vec(event).unwrap_or_default();
        Self {
            message: PushMessage {
                data: STANDARD.encode(json),
                message_id: id.into(),
                ..Default::default()
            },
            subscription: subscription.into(),
        }
    }
}

// ============================================================================
// Audit log payload
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    #[serde(default)]
    pub proto_payload: ProtoPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtoPayload {
    #[serde(default)]
    pub service_data: ServiceData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceData {
    #[serde(default)]
    pub job_insert_response: JobInsertResponse,
    #[serde(default)]
    pub job_completed_event: JobCompletedEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInsertResponse {
    #[serde(default)]
    pub resource: EventJob,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCompletedEvent {
    #[serde(default)]
    pub job: EventJob,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventJob {
    #[serde(default)]
    pub job_name: JobIdentity,
    #[serde(default)]
    pub job_statistics: JobStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status: Option<EventJobStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventJobStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EventStatusError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStatusError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl JobEvent {
    pub fn insert(identity: JobIdentity, stats: JobStats) -> Self {
        let mut event = Self::default();
        event.proto_payload.service_data.job_insert_response.resource = EventJob {
            job_name: identity,
            job_statistics: stats,
            job_status: None,
        };
        event
    }

    pub fn completed(identity: JobIdentity, stats: JobStats, error: Option<String>) -> Self {
        let mut event = Self::default();
        event.proto_payload.service_data.job_completed_event.job = EventJob {
            job_name: identity,
            job_statistics: stats,
            job_status: Some(EventJobStatus {
                state: "DONE".to_string(),
                error: error.map(|message| EventStatusError { code: 0, message }),
            }),
        };
        event
    }

    fn insert_branch(&self) -> &EventJob {
        &self.proto_payload.service_data.job_insert_response.resource
    }

    fn completed_branch(&self) -> &EventJob {
        &self.proto_payload.service_data.job_completed_event.job
    }

    /// True iff the insert-response identity has a non-empty job id.
    pub fn is_insert(&self) -> bool {
        !self.insert_branch().job_name.job_id.is_empty()
    }

    /// True iff the completed-event identity has a non-empty job id.
    pub fn is_complete(&self) -> bool {
        !self.completed_branch().job_name.job_id.is_empty()
    }

    fn populated(&self) -> Option<&EventJob> {
        if self.is_insert() {
            Some(self.insert_branch())
        } else if self.is_complete() {
            Some(self.completed_branch())
        } else {
            None
        }
    }

    /// Identity of the populated branch; empty if neither is populated.
    pub fn identity(&self) -> JobIdentity {
        self.populated()
            .map(|job| job.job_name.clone())
            .unwrap_or_default()
    }

    /// Statistics of the populated branch; empty if neither is populated.
    pub fn stats(&self) -> JobStats {
        self.populated()
            .map(|job| job.job_statistics.clone())
            .unwrap_or_default()
    }

    /// Classify into an insert or completion notification.
    pub fn into_notification(self) -> Result<JobNotification> {
        if self.is_insert() {
            let job = self.proto_payload.service_data.job_insert_response.resource;
            return Ok(JobNotification::Insert {
                identity: job.job_name,
                stats: job.job_statistics,
            });
        }
        if self.is_complete() {
            let job = self.proto_payload.service_data.job_completed_event.job;
            let mut detail = JobDetail {
                state: JobState::Done,
                ..Default::default()
            };
            if let Some(status) = job.job_status {
                detail.error = status
                    .error
                    .map(|err| err.message)
                    .filter(|message| !message.is_empty());
            }
            return Ok(JobNotification::Complete {
                identity: job.job_name,
                stats: job.job_statistics,
                detail,
            });
        }
        Err(DecodeError::MissingJobId)
    }
}

/// A classified push notification.
#[derive(Debug, Clone, PartialEq)]
pub enum JobNotification {
    Insert {
        identity: JobIdentity,
        stats: JobStats,
    },
    /// Completion carries identity, end time and any failure text.
    Complete {
        identity: JobIdentity,
        stats: JobStats,
        detail: JobDetail,
    },
}

impl JobNotification {
    pub fn identity(&self) -> &JobIdentity {
        match self {
            JobNotification::Insert { identity, .. } => identity,
            JobNotification::Complete { identity, .. } => identity,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobNotification::Insert { .. } => "insert",
            JobNotification::Complete { .. } => "complete",
        }
    }
}

/// Decode a raw push body into its envelope and classified notification.
pub fn decode_push(body: &[u8]) -> Result<(PushRequest, JobNotification)> {
    let request = PushRequest::from_slice(body)?;
    let event = request.decode_event()?;
    let notification = event.into_notification()?;
    Ok((request, notification))
}
