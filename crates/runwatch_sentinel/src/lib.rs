//! Runwatch sentinel library
//!
//! Keeps a persisted record of every active query job reconciled with the
//! remote query service. Push notifications (insert, complete) drive the
//! fast path; periodic per-project sweeps repair whatever the pushes missed.

pub mod config;
pub mod dedup;
pub mod detail;
pub mod error;
pub mod metrics;
pub mod nack;
pub mod reconciler;
pub mod remote;
pub mod reservations;
pub mod scheduler;
pub mod server;

pub use config::{ConfigError, FileConfig, SentinelArgs, SentinelConfig};
pub use dedup::{CacheStats, DedupGate, ExpiringCache, MemoryCache};
pub use detail::{DetailError, DetailFetcher};
pub use error::{ReconcileError, Result};
pub use metrics::{Counter, Metrics, MetricsSnapshot};
pub use nack::{NackCounter, NackDecision};
pub use reconciler::{
    CompleteOutcome, InsertOutcome, NotificationOutcome, Reconciler, ReconcilerConfig, SweepReport,
};
pub use remote::{HttpQueryService, QueryService, RemoteError};
pub use reservations::{ReservationSync, SyncSummary};
pub use scheduler::{fan_out, LocalTaskQueue, ScheduledTask, Task, TaskQueue, TaskRunner};
pub use server::{router, serve, AppState};
