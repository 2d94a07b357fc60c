//! Resource shapes returned by the remote query service.
//!
//! The service encodes 64-bit integers and epoch-millisecond timestamps as JSON
//! strings; every numeric field here accepts either form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::types::{JobIdentity, JobState, JobStats, JobType};

/// A job resource as returned by `jobs.get` or as an item of `jobs.list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJob {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub job_reference: JobReference,
    /// Present on list items only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub status: RemoteStatus,
    #[serde(default, alias = "user_email")]
    pub user_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<RemoteConfiguration>,
    #[serde(default)]
    pub statistics: RemoteStatistics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_result: Option<ErrorProto>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorProto {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub message: String,
}

impl RemoteJob {
    /// Identity of this job. `default_project` fills a missing project id,
    /// which list responses sometimes omit.
    pub fn identity(&self, default_project: &str) -> JobIdentity {
        let reference = &self.job_reference;
        let project_id = if reference.project_id.is_empty() {
            default_project
        } else {
            reference.project_id.as_str()
        };
        JobIdentity::new(project_id, reference.location.as_str(), reference.job_id.as_str())
    }

    pub fn state(&self) -> JobState {
        let raw = if self.status.state.is_empty() {
            self.state.as_deref().unwrap_or_default()
        } else {
            self.status.state.as_str()
        };
        JobState::from_remote(raw)
    }

    /// Failure text, if the status carries one.
    pub fn error_text(&self) -> Option<String> {
        let err = self.status.error_result.as_ref()?;
        if err.message.is_empty() {
            Some(err.reason.clone()).filter(|reason| !reason.is_empty())
        } else {
            Some(err.message.clone())
        }
    }

    pub fn stats(&self) -> JobStats {
        JobStats {
            create_time: self.statistics.creation_time.and_then(millis_to_datetime),
            start_time: self.statistics.start_time.and_then(millis_to_datetime),
            end_time: self.statistics.end_time.and_then(millis_to_datetime),
        }
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    if ms <= 0 {
        return None;
    }
    DateTime::from_timestamp_millis(ms)
}

// ============================================================================
// Configuration
// ============================================================================

/// Raw configuration object. Exactly one sub-object is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy: Option<CopyOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_table: Option<TableReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_table: Option<TableReference>,
    #[serde(default)]
    pub source_tables: Vec<TableReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_table: Option<TableReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_table: Option<TableReference>,
    #[serde(default)]
    pub destination_uris: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_table: Option<TableReference>,
    #[serde(default)]
    pub source_uris: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub table_id: String,
}

impl TableReference {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    /// `project:dataset.table`
    pub fn fully_qualified_name(&self) -> String {
        format!("{}:{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Comma-join fully qualified names, preserving order.
pub fn join_tables<'a>(tables: impl IntoIterator<Item = &'a TableReference>) -> String {
    tables
        .into_iter()
        .map(TableReference::fully_qualified_name)
        .collect::<Vec<_>>()
        .join(",")
}

/// Classified job configuration, one variant per job type, each carrying
/// only its relevant fields.
#[derive(Debug, Clone, PartialEq)]
pub enum JobConfig {
    Query {
        destination: Option<TableReference>,
        priority: String,
        query: String,
    },
    Copy {
        sources: Vec<TableReference>,
        destination: Option<TableReference>,
    },
    Extract {
        source: Option<TableReference>,
        destination_uris: Vec<String>,
    },
    Load {
        destination: Option<TableReference>,
    },
}

impl JobConfig {
    pub fn job_type(&self) -> JobType {
        match self {
            JobConfig::Query { .. } => JobType::Query,
            JobConfig::Copy { .. } => JobType::Copy,
            JobConfig::Extract { .. } => JobType::Extract,
            JobConfig::Load { .. } => JobType::Load,
        }
    }
}

impl RemoteConfiguration {
    /// Name of the configuration variant: explicit `jobType`, else the first
    /// populated sub-object.
    fn discriminator(&self) -> Option<String> {
        if let Some(job_type) = self.job_type.as_deref().filter(|t| !t.is_empty()) {
            return Some(job_type.to_ascii_uppercase());
        }
        if self.query.is_some() {
            Some("QUERY".to_string())
        } else if self.copy.is_some() {
            Some("COPY".to_string())
        } else if self.extract.is_some() {
            Some("EXTRACT".to_string())
        } else if self.load.is_some() {
            Some("LOAD".to_string())
        } else {
            None
        }
    }

    pub fn classify(&self) -> Result<JobConfig, ConfigError> {
        let discriminator = self.discriminator().ok_or(ConfigError::Missing)?;
        let config = match discriminator.as_str() {
            "QUERY" => {
                let query = self.query.clone().unwrap_or_default();
                JobConfig::Query {
                    destination: query.destination_table,
                    priority: query.priority.unwrap_or_else(|| "INTERACTIVE".to_string()),
                    query: query.query,
                }
            }
            "COPY" => {
                let copy = self.copy.clone().unwrap_or_default();
                let mut sources = copy.source_tables;
                if let Some(single) = copy.source_table {
                    if !sources.contains(&single) {
                        sources.insert(0, single);
                    }
                }
                JobConfig::Copy {
                    sources,
                    destination: copy.destination_table,
                }
            }
            "EXTRACT" => {
                let extract = self.extract.clone().unwrap_or_default();
                JobConfig::Extract {
                    source: extract.source_table,
                    destination_uris: extract.destination_uris,
                }
            }
            "LOAD" => {
                let load = self.load.clone().unwrap_or_default();
                JobConfig::Load {
                    destination: load.destination_table,
                }
            }
            other => return Err(ConfigError::Unrecognized(other.to_string())),
        };
        Ok(config)
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatistics {
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub creation_time: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub start_time: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub end_time: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub total_slot_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryStatistics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatistics {
    #[serde(default)]
    pub timeline: Vec<RemoteTimelineSample>,
    #[serde(default)]
    pub statement_type: String,
    #[serde(default)]
    pub referenced_tables: Vec<TableReference>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub total_slot_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTimelineSample {
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub elapsed_ms: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub total_slot_ms: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub pending_units: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub completed_units: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    pub active_units: Option<i64>,
}

/// One page of `jobs.list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJobList {
    #[serde(default)]
    pub jobs: Vec<RemoteJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

// ============================================================================
// Query results
// ============================================================================

/// Response of a synchronous `jobs.query` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub schema: TableSchema,
    #[serde(default)]
    pub rows: Vec<TableRow>,
    #[serde(default)]
    pub job_complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
}

/// Positional cells, aligned with [`TableSchema::fields`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub f: Vec<TableCell>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub v: serde_json::Value,
}

impl QueryResponse {
    /// Cell of `row` in the column named `field`, as text. `None` for
    /// unknown columns, missing cells and SQL NULL.
    pub fn cell(&self, row: &TableRow, field: &str) -> Option<String> {
        let index = self.schema.fields.iter().position(|f| f.name == field)?;
        match &row.f.get(index)?.v {
            serde_json::Value::String(text) => Some(text.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientI64 {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Accepts a JSON number, a numeric string, an empty string or `null`.
pub fn deserialize_lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<LenientI64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(LenientI64::Int(value)) => Ok(Some(value)),
        Some(LenientI64::Float(value)) => Ok(Some(value as i64)),
        Some(LenientI64::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            text.parse::<i64>()
                .map(Some)
                .map_err(|e| serde::de::Error::custom(format!("invalid int64 {:?}: {}", text, e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_job_resource() {
        let json = r#"{
            "id": "acme:US.job_1",
            "jobReference": {"projectId": "acme", "jobId": "job_1", "location": "US"},
            "status": {"state": "RUNNING"},
            "user_email": "ana@example.com",
            "configuration": {
                "jobType": "QUERY",
                "query": {
                    "query": "SELECT 1",
                    "destinationTable": {"projectId": "acme", "datasetId": "_tmp", "tableId": "anon"},
                    "priority": "BATCH"
                }
            },
            "statistics": {
                "creationTime": "1709287200000",
                "startTime": "1709287201000",
                "totalSlotMs": "5400",
                "query": {
                    "statementType": "SELECT",
                    "timeline": [
                        {"elapsedMs": "100", "totalSlotMs": "20", "pendingUnits": "5", "completedUnits": "1", "activeUnits": "2"},
                        {"elapsedMs": "200", "totalSlotMs": "90", "pendingUnits": "1", "completedUnits": "5", "activeUnits": "1"}
                    ],
                    "referencedTables": [{"projectId": "acme", "datasetId": "sales", "tableId": "orders"}]
                }
            }
        }"#;
        let job: RemoteJob = serde_json::from_str(json).unwrap();

        assert_eq!(job.state(), JobState::Running);
        assert_eq!(job.user_email, "ana@example.com");
        assert_eq!(job.identity("ignored").canonical_key(), "[US] acme:job_1");
        assert!(job.stats().create_time.is_some());
        assert!(job.stats().end_time.is_none());

        let query = job.statistics.query.as_ref().unwrap();
        assert_eq!(query.timeline.len(), 2);
        assert_eq!(query.timeline[1].elapsed_ms, Some(200));

        match job.configuration.unwrap().classify().unwrap() {
            JobConfig::Query { priority, query, destination } => {
                assert_eq!(priority, "BATCH");
                assert_eq!(query, "SELECT 1");
                assert_eq!(destination.unwrap().fully_qualified_name(), "acme:_tmp.anon");
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_classify_infers_variant_without_job_type() {
        let config = RemoteConfiguration {
            extract: Some(ExtractOptions {
                source_table: Some(TableReference::new("p", "d", "t")),
                destination_uris: vec!["gs://b/a-*.csv".to_string()],
            }),
            ..Default::default()
        };
        assert_eq!(config.classify().unwrap().job_type(), JobType::Extract);
    }

    #[test]
    fn test_classify_rejects_unknown_variant() {
        let config = RemoteConfiguration {
            job_type: Some("UNKNOWN".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.classify(),
            Err(ConfigError::Unrecognized("UNKNOWN".to_string()))
        );
        assert_eq!(
            RemoteConfiguration::default().classify(),
            Err(ConfigError::Missing)
        );
    }

    #[test]
    fn test_copy_sources_keep_single_source_first() {
        let config = RemoteConfiguration {
            copy: Some(CopyOptions {
                source_table: Some(TableReference::new("p", "d", "a")),
                source_tables: vec![TableReference::new("p", "d", "b")],
                destination_table: Some(TableReference::new("p", "d", "c")),
            }),
            ..Default::default()
        };
        match config.classify().unwrap() {
            JobConfig::Copy { sources, .. } => assert_eq!(join_tables(&sources), "p:d.a,p:d.b"),
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_list_item_state_and_error() {
        let json = r#"{
            "jobReference": {"jobId": "j9", "location": "EU"},
            "state": "PENDING",
            "status": {"errorResult": {"reason": "quotaExceeded", "message": ""}}
        }"#;
        let job: RemoteJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.state(), JobState::Pending);
        assert_eq!(job.error_text().as_deref(), Some("quotaExceeded"));
        assert_eq!(job.identity("fallback").project_id, "fallback");
    }

    #[test]
    fn test_query_response_cells_by_name() {
        let json = r#"{
            "schema": {"fields": [{"name": "reservation_id"}, {"name": "project_id"}, {"name": "slot_count"}]},
            "rows": [
                {"f": [{"v": "res-a"}, {"v": "acme"}, {"v": "500"}]},
                {"f": [{"v": "res-b"}, {"v": null}]}
            ],
            "jobComplete": true
        }"#;
        let response: QueryResponse = serde_json::from_str(json).unwrap();
        assert!(response.job_complete);
        assert_eq!(response.cell(&response.rows[0], "slot_count").as_deref(), Some("500"));
        assert_eq!(response.cell(&response.rows[1], "project_id"), None);
        assert_eq!(response.cell(&response.rows[1], "slot_count"), None);
        assert_eq!(response.cell(&response.rows[0], "missing"), None);
    }
}
