//! Runwatch protocol types.
//!
//! Shared vocabulary between the push endpoint, the reconciliation engine and
//! the persisted job store:
//!
//! - [`JobIdentity`] and its canonical key / dedup fingerprint
//! - [`JobStats`], [`JobDetail`], [`TimelineSample`], [`Job`], [`Reservation`]
//! - Push envelope decoding ([`envelope`])
//! - Resource shapes returned by the remote query service ([`remote`])
//! - Flat read model for list endpoints ([`http_types`])
//!
//! Nothing in this crate performs I/O.

pub mod defaults;
pub mod envelope;
pub mod error;
pub mod http_types;
pub mod idempotency;
pub mod metrics;
pub mod remote;
pub mod types;

pub use envelope::{decode_push, JobEvent, JobNotification, PushMessage, PushRequest};
pub use error::{ConfigError, DecodeError};
pub use http_types::{ErrorResponse, JobDisplay, JobsResponse};
pub use idempotency::fingerprint;
pub use remote::{JobConfig, QueryResponse, RemoteJob, RemoteJobList};
pub use types::{
    Job, JobDetail, JobIdentity, JobState, JobStats, JobType, Reservation, TimelineSample,
};
