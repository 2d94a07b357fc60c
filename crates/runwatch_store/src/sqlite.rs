//! SQLite backend via sqlx.
//!
//! Each job is stored as a JSON body plus a handful of indexed columns used
//! for filtering. The body is authoritative; columns are rewritten on every put.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runwatch_protocol::{Job, Reservation};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::query::JobQuery;
use crate::state_store::{JobStore, ReservationStore, StateStoreBackend};

const MAX_CONNECTIONS: u32 = 5;

pub struct SqliteBackend {
    jobs: SqliteJobStore,
    reservations: SqliteReservationStore,
}

impl SqliteBackend {
    /// Open or create a database file. Parent directories are created.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    StoreError::backend(format!(
                        "failed to create {}: {}",
                        parent.display(),
                        err
                    ))
                })?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(&url)
            .await?;

        info!(path = %path.display(), "Job store opened");
        Ok(Self::from_pool(pool))
    }

    /// Private in-memory database. A single connection keeps one shared db.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            jobs: SqliteJobStore { pool: pool.clone() },
            reservations: SqliteReservationStore { pool },
        }
    }
}

#[async_trait]
impl StateStoreBackend for SqliteBackend {
    async fn init(&self) -> Result<()> {
        let pool = &self.jobs.pool;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rw_jobs (
                key TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                location TEXT NOT NULL,
                state TEXT NOT NULL,
                start_ms INTEGER,
                end_ms INTEGER,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rw_jobs_project ON rw_jobs(project_id, state)")
            .execute(pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rw_jobs_job_id ON rw_jobs(job_id)")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rw_reservations (
                project_id TEXT PRIMARY KEY,
                reservation_id TEXT NOT NULL,
                slot_count INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    fn jobs(&self) -> &dyn JobStore {
        &self.jobs
    }

    fn reservations(&self) -> &dyn ReservationStore {
        &self.reservations
    }
}

// ============================================================================
// Jobs
// ============================================================================

pub struct SqliteJobStore {
    pool: SqlitePool,
}

fn millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

impl SqliteJobStore {
    async fn upsert(&self, job: &Job) -> Result<()> {
        let body = serde_json::to_string(job)?;
        sqlx::query(
            r#"
            INSERT INTO rw_jobs (key, project_id, job_id, location, state, start_ms, end_ms, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                project_id = excluded.project_id,
                job_id = excluded.job_id,
                location = excluded.location,
                state = excluded.state,
                start_ms = excluded.start_ms,
                end_ms = excluded.end_ms,
                body = excluded.body
            "#,
        )
        .bind(job.key())
        .bind(&job.identity.project_id)
        .bind(&job.identity.job_id)
        .bind(&job.identity.location)
        .bind(job.detail.state.as_str())
        .bind(millis(job.stats.start_time))
        .bind(millis(job.stats.end_time))
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get(&self, key: &str) -> Result<Job> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM rw_jobs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match body {
            Some(body) => Ok(serde_json::from_str(&body)?),
            None => Err(StoreError::not_found(key)),
        }
    }

    async fn put(&self, job: &Job) -> Result<()> {
        self.upsert(job).await
    }

    async fn put_multi(&self, jobs: &[Job]) -> Result<()> {
        let mut applied = 0usize;
        let mut failed = 0usize;
        let mut first_error: Option<String> = None;

        for job in jobs {
            match self.upsert(job).await {
                Ok(()) => applied += 1,
                Err(err) => {
                    warn!(key = %job.key(), error = %err, "Bulk write: record failed");
                    failed += 1;
                    first_error.get_or_insert_with(|| err.to_string());
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(first_error) => Err(StoreError::PartialWrite {
                applied,
                failed,
                first_error,
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM rw_jobs WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("DELETE FROM rw_jobs WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, query: &JobQuery) -> Result<Vec<Job>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT body FROM rw_jobs WHERE 1 = 1");

        if let Some(project_id) = &query.project_id {
            builder.push(" AND project_id = ").push_bind(project_id.clone());
        }
        if let Some(job_id) = &query.job_id {
            builder.push(" AND job_id = ").push_bind(job_id.clone());
        }
        if let Some(state) = query.state {
            builder.push(" AND state = ").push_bind(state.as_str());
        }
        if let Some(window) = query.window {
            builder
                .push(" AND start_ms IS NOT NULL AND start_ms <= ")
                .push_bind(window.end.timestamp_millis())
                .push(" AND (end_ms IS NULL OR end_ms > ")
                .push_bind(window.start.timestamp_millis())
                .push(")");
        }
        builder.push(" ORDER BY key");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<Job> {
                let body: String = row.try_get("body")?;
                Ok(serde_json::from_str(&body)?)
            })
            .collect()
    }

    async fn distinct_projects(&self) -> Result<Vec<String>> {
        let projects: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT project_id FROM rw_jobs ORDER BY project_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(projects)
    }
}

// ============================================================================
// Reservations
// ============================================================================

pub struct SqliteReservationStore {
    pool: SqlitePool,
}

fn reservation_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Reservation> {
    Ok(Reservation {
        reservation_id: row.try_get("reservation_id")?,
        project_id: row.try_get("project_id")?,
        slot_count: row.try_get("slot_count")?,
    })
}

#[async_trait]
impl ReservationStore for SqliteReservationStore {
    async fn get(&self, project_id: &str) -> Result<Reservation> {
        let row = sqlx::query(
            "SELECT project_id, reservation_id, slot_count FROM rw_reservations WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => reservation_from_row(&row),
            None => Err(StoreError::not_found(project_id)),
        }
    }

    async fn put(&self, reservation: &Reservation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rw_reservations (project_id, reservation_id, slot_count)
            VALUES (?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                reservation_id = excluded.reservation_id,
                slot_count = excluded.slot_count
            "#,
        )
        .bind(&reservation.project_id)
        .bind(&reservation.reservation_id)
        .bind(reservation.slot_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            "SELECT project_id, reservation_id, slot_count FROM rw_reservations ORDER BY project_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(reservation_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runwatch_protocol::{JobIdentity, JobState, JobStats};

    async fn backend() -> SqliteBackend {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        backend.init().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn test_job_body_roundtrip_and_state_column() {
        let backend = backend().await;
        let mut job = Job::new(JobIdentity::new("p1", "EU", "j1"), JobStats::default());
        job.detail.state = JobState::Running;
        job.detail.query = "SELECT 1".to_string();
        backend.jobs().put(&job).await.unwrap();

        job.detail.state = JobState::Done;
        backend.jobs().put(&job).await.unwrap();

        let loaded = backend.jobs().get("[EU] p1:j1").await.unwrap();
        assert_eq!(loaded, job);

        let running = backend
            .jobs()
            .query(&JobQuery::all().with_state(JobState::Running))
            .await
            .unwrap();
        assert!(running.is_empty());
    }

    #[tokio::test]
    async fn test_reservation_upsert() {
        let backend = backend().await;
        let mut reservation = Reservation {
            reservation_id: "res-a".to_string(),
            project_id: "p1".to_string(),
            slot_count: 100,
        };
        backend.reservations().put(&reservation).await.unwrap();
        reservation.slot_count = 500;
        backend.reservations().put(&reservation).await.unwrap();

        assert_eq!(backend.reservations().get("p1").await.unwrap().slot_count, 500);
        assert_eq!(backend.reservations().list().await.unwrap().len(), 1);
        assert!(backend
            .reservations()
            .get("p2")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
