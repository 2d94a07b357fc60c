//! Error taxonomy surfaced by the reconciliation engine.
//!
//! Every variant is scoped to a single notification or a single project
//! sweep; none of them is fatal to the process.

use runwatch_protocol::DecodeError;
use runwatch_store::StoreError;
use thiserror::Error;

use crate::detail::DetailError;
use crate::remote::RemoteError;

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Bad envelope, bad JSON, or no job id. Rejected without retry.
    #[error("Malformed notification: {0}")]
    Malformed(#[from] DecodeError),

    /// Completion observed before its insert. The transport must redeliver.
    #[error("Completion for un-inserted job {key} (nack #{attempts})")]
    RetryableRace { key: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Unrecognized job configuration: {0}")]
    UnrecognizedConfig(String),

    #[error("Task queue error: {0}")]
    TaskQueue(String),
}

impl From<DetailError> for ReconcileError {
    fn from(err: DetailError) -> Self {
        match err {
            DetailError::UnrecognizedConfig(kind) => ReconcileError::UnrecognizedConfig(kind),
            DetailError::Remote(err) => ReconcileError::Remote(err),
        }
    }
}

impl ReconcileError {
    /// True when the transport should redeliver the notification.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconcileError::RetryableRace { .. }
                | ReconcileError::Store(_)
                | ReconcileError::Remote(_)
                | ReconcileError::TaskQueue(_)
        )
    }
}
