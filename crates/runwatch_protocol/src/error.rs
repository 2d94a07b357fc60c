//! Protocol error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Malformed push input. Never retried: the transport gets a 4xx.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Couldn't decode message body: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Couldn't decode message data as base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Couldn't decode job event: {0}")]
    JobEvent(#[source] serde_json::Error),

    #[error("No JobID for job")]
    MissingJobId,
}

/// Failure to classify a remote job configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unable to identify job configuration of type {0}")]
    Unrecognized(String),

    #[error("Job configuration is missing")]
    Missing,
}
