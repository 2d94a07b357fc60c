//! Error types for the persisted job store.

use thiserror::Error;

/// Store operation result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No record under the requested key
    #[error("Not found: {0}")]
    NotFound(String),

    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Record (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A multi-record write applied only a subset of its records
    #[error("Bulk write partially applied: {applied} written, {failed} failed: {first_error}")]
    PartialWrite {
        applied: usize,
        failed: usize,
        first_error: String,
    },

    /// Backend-specific failure (poisoned lock, unavailable backend)
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Unparseable or unsupported store URL
    #[error("Unsupported store URL: {0}")]
    InvalidUrl(String),
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
