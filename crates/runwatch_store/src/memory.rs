//! In-process backend. State is lost on restart; used by tests and `memory:`.

use async_trait::async_trait;
use runwatch_protocol::{Job, Reservation};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, StoreError};
use crate::query::JobQuery;
use crate::state_store::{JobStore, ReservationStore, StateStoreBackend};

#[derive(Default)]
pub struct MemoryBackend {
    jobs: MemoryJobStore,
    reservations: MemoryReservationStore,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStoreBackend for MemoryBackend {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    fn jobs(&self) -> &dyn JobStore {
        &self.jobs
    }

    fn reservations(&self) -> &dyn ReservationStore {
        &self.reservations
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| StoreError::backend("memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| StoreError::backend("memory store lock poisoned"))
}

#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<BTreeMap<String, Job>>,
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, key: &str) -> Result<Job> {
        read(&self.records)?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn put(&self, job: &Job) -> Result<()> {
        write(&self.records)?.insert(job.key(), job.clone());
        Ok(())
    }

    async fn put_multi(&self, jobs: &[Job]) -> Result<()> {
        let mut records = write(&self.records)?;
        for job in jobs {
            records.insert(job.key(), job.clone());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        write(&self.records)?.remove(key);
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<()> {
        let mut records = write(&self.records)?;
        for key in keys {
            records.remove(key);
        }
        Ok(())
    }

    async fn query(&self, query: &JobQuery) -> Result<Vec<Job>> {
        Ok(read(&self.records)?
            .values()
            .filter(|job| query.matches(job))
            .cloned()
            .collect())
    }

    async fn distinct_projects(&self) -> Result<Vec<String>> {
        let projects: BTreeSet<String> = read(&self.records)?
            .values()
            .map(|job| job.identity.project_id.clone())
            .collect();
        Ok(projects.into_iter().collect())
    }
}

#[derive(Default)]
pub struct MemoryReservationStore {
    records: RwLock<BTreeMap<String, Reservation>>,
}

#[async_trait]
impl ReservationStore for MemoryReservationStore {
    async fn get(&self, project_id: &str) -> Result<Reservation> {
        read(&self.records)?
            .get(project_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(project_id))
    }

    async fn put(&self, reservation: &Reservation) -> Result<()> {
        write(&self.records)?.insert(reservation.project_id.clone(), reservation.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Reservation>> {
        Ok(read(&self.records)?.values().cloned().collect())
    }
}
