//! Canonical default values shared by the service, the store and the CLI.

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_STORE_URL: &str = "sqlite:runwatch.sqlite";
pub const DEFAULT_QUERY_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Persisted collection holding [`crate::Job`] records.
pub const JOB_COLLECTION: &str = "Job";
/// Persisted collection holding [`crate::Reservation`] records, keyed by project id.
pub const RESERVATION_COLLECTION: &str = "Reservation";

/// Dedup-gate lifetime of an observed insert (10 minutes).
pub const DEDUP_TTL_SECS: u64 = 10 * 60;
/// Completion notifications older than this are acknowledged without retry (30 minutes).
pub const RACE_WINDOW_SECS: u64 = 30 * 60;
/// Completion-before-insert is nacked at most this many times.
pub const MAX_COMPLETION_NACKS: u32 = 2;
/// Idle nack counters expire after this long (1 hour).
pub const NACK_TTL_SECS: u64 = 60 * 60;
/// Delay before the fan-out scheduler re-enqueues itself.
pub const SWEEP_INTERVAL_SECS: u64 = 5;
/// Unlisted records not refreshed for this long are evicted by a sweep (6 hours).
pub const MAX_STALENESS_SECS: u64 = 6 * 60 * 60;
/// Per-call timeout for remote query-service requests.
pub const REMOTE_TIMEOUT_SECS: u64 = 30;

/// Push endpoint path registered with the push subscription.
pub const PUSH_PATH: &str = "/_ah/push-handlers/bqo-pusher";
/// Sweep trigger path prefix; the project id is the last segment.
pub const SWEEP_PATH_PREFIX: &str = "/_ah/push-handlers/update-projects";
/// Fan-out scheduler path.
pub const FANOUT_PATH: &str = "/_ah/push-handlers/update-projects-all";
/// Reservation sync trigger path.
pub const RESERVATION_SYNC_PATH: &str = "/update-reservation-table";

/// Reservation rows: one `(reservation_id, project_id, slot_count)` per project.
pub const DEFAULT_RESERVATION_QUERY: &str =
    "SELECT rp.reservation_id, rp.project_id, rs.reservation_slot AS slot_count \
     FROM `slot_reservation.reservation_project` AS rp \
     JOIN `slot_reservation.reservation_slot` AS rs USING (reservation_id)";
