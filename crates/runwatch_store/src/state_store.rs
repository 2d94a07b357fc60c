use async_trait::async_trait;
use runwatch_protocol::{Job, Reservation};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::memory::MemoryBackend;
use crate::query::JobQuery;
use crate::sqlite::SqliteBackend;

/// Parsed state store URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateStoreUrl {
    Memory,
    Sqlite(PathBuf),
}

impl StateStoreUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == "memory:" || raw == "memory" {
            return Ok(Self::Memory);
        }
        if let Some(rest) = raw.strip_prefix("sqlite:") {
            let path = rest.trim_start_matches("//").trim();
            if path.is_empty() {
                return Err(StoreError::InvalidUrl(format!(
                    "sqlite URL missing path: {raw}"
                )));
            }
            return Ok(Self::Sqlite(PathBuf::from(path)));
        }
        Err(StoreError::InvalidUrl(raw.to_string()))
    }
}

/// Semantic state store wrapper. Cheap to clone.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<dyn StateStoreBackend>,
}

impl StateStore {
    pub async fn open(raw: &str) -> Result<Self> {
        let url = StateStoreUrl::parse(raw)?;
        Self::from_url(url).await
    }

    pub async fn from_url(url: StateStoreUrl) -> Result<Self> {
        let store = match url {
            StateStoreUrl::Memory => Self::from_backend(MemoryBackend::new()),
            StateStoreUrl::Sqlite(path) => Self::from_backend(SqliteBackend::open(&path).await?),
        };
        store.init().await?;
        Ok(store)
    }

    pub fn memory() -> Self {
        Self::from_backend(MemoryBackend::new())
    }

    pub fn from_backend(backend: impl StateStoreBackend + 'static) -> Self {
        Self {
            inner: Arc::new(backend),
        }
    }

    pub async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    pub fn jobs(&self) -> &dyn JobStore {
        self.inner.jobs()
    }

    pub fn reservations(&self) -> &dyn ReservationStore {
        self.inner.reservations()
    }
}

#[async_trait]
pub trait StateStoreBackend: Send + Sync {
    async fn init(&self) -> Result<()>;

    fn jobs(&self) -> &dyn JobStore;
    fn reservations(&self) -> &dyn ReservationStore;
}

// ============================================================================
// Job Store
// ============================================================================

/// The `Job` collection, keyed by canonical identity string.
///
/// Single-record writes are atomic. Multi-record writes are best effort and
/// report [`StoreError::PartialWrite`] when only a subset applied.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load one record; [`StoreError::NotFound`] if absent.
    async fn get(&self, key: &str) -> Result<Job>;

    /// Insert or overwrite the record under `job.key()`.
    async fn put(&self, job: &Job) -> Result<()>;

    async fn put_multi(&self, jobs: &[Job]) -> Result<()>;

    /// Remove one record. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn delete_multi(&self, keys: &[String]) -> Result<()>;

    /// Filter-query, ordered by key.
    async fn query(&self, query: &JobQuery) -> Result<Vec<Job>>;

    /// Distinct project ids across all records, sorted.
    async fn distinct_projects(&self) -> Result<Vec<String>>;
}

// ============================================================================
// Reservation Store
// ============================================================================

/// The `Reservation` collection, keyed by project id.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get(&self, project_id: &str) -> Result<Reservation>;

    async fn put(&self, reservation: &Reservation) -> Result<()>;

    async fn list(&self) -> Result<Vec<Reservation>>;
}
