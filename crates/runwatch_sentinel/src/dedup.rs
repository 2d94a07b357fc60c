//! Dedup gate for insert notifications.
//!
//! Backed by an [`ExpiringCache`] keyed by identity fingerprint. The cache
//! must provide an atomic insert-if-absent; get-then-set would let two
//! concurrent redeliveries both pass.

use runwatch_protocol::JobIdentity;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Purge expired entries every this many insertions.
const PURGE_EVERY: u64 = 256;

/// Short-lived membership cache.
///
/// Implementations backed by a remote cache map transport failures to
/// "absent", so a flaky cache degrades to reprocessing rather than loss.
pub trait ExpiringCache: Send + Sync {
    /// Insert `key` for `ttl` unless a live entry exists. Returns `true` if
    /// this call inserted it.
    fn add_if_absent(&self, key: &str, ttl: Duration) -> bool;

    fn contains(&self, key: &str) -> bool;

    fn remove(&self, key: &str);

    fn stats(&self) -> CacheStats;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Default)]
struct CacheState {
    expires: HashMap<String, Instant>,
    hits: u64,
    misses: u64,
    inserts: u64,
}

/// Process-local [`ExpiringCache`].
#[derive(Default)]
pub struct MemoryCache {
    state: Mutex<CacheState>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add_if_absent_at(&self, key: &str, ttl: Duration, now: Instant) -> bool {
        let mut state = self.lock();
        state.inserts += 1;
        if state.inserts % PURGE_EVERY == 0 {
            state.expires.retain(|_, expiry| *expiry > now);
        }

        let live = state
            .expires
            .get(key)
            .is_some_and(|expiry| *expiry > now);
        if live {
            state.hits += 1;
            return false;
        }
        state.misses += 1;
        state.expires.insert(key.to_string(), now + ttl);
        true
    }

    fn contains_at(&self, key: &str, now: Instant) -> bool {
        let mut state = self.lock();
        let live = state
            .expires
            .get(key)
            .is_some_and(|expiry| *expiry > now);
        if live {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        live
    }
}

impl ExpiringCache for MemoryCache {
    fn add_if_absent(&self, key: &str, ttl: Duration) -> bool {
        self.add_if_absent_at(key, ttl, Instant::now())
    }

    fn contains(&self, key: &str) -> bool {
        self.contains_at(key, Instant::now())
    }

    fn remove(&self, key: &str) {
        self.lock().expires.remove(key);
    }

    fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let state = self.lock();
        CacheStats {
            entries: state.expires.values().filter(|expiry| **expiry > now).count(),
            hits: state.hits,
            misses: state.misses,
        }
    }
}

/// "Have we already seen this insert?" check over an [`ExpiringCache`].
#[derive(Clone)]
pub struct DedupGate {
    cache: Arc<dyn ExpiringCache>,
    ttl: Duration,
}

impl DedupGate {
    pub fn new(cache: Arc<dyn ExpiringCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Atomic check-and-set. Returns `true` if the identity was already
    /// observed (the caller is handling a redelivery).
    pub fn observe(&self, identity: &JobIdentity) -> bool {
        !self.cache.add_if_absent(&identity.fingerprint(), self.ttl)
    }

    /// Read-only membership check.
    pub fn seen(&self, identity: &JobIdentity) -> bool {
        self.cache.contains(&identity.fingerprint())
    }

    /// Drop the observation so a redelivery is processed again.
    pub fn forget(&self, identity: &JobIdentity) {
        self.cache.remove(&identity.fingerprint());
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_if_absent_once() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(600);
        assert!(cache.add_if_absent("k", ttl));
        assert!(!cache.add_if_absent("k", ttl));
        assert!(cache.contains("k"));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_entries_expire() {
        let cache = MemoryCache::new();
        let start = Instant::now();
        let ttl = Duration::from_secs(600);

        assert!(cache.add_if_absent_at("k", ttl, start));
        assert!(cache.contains_at("k", start + Duration::from_secs(599)));
        assert!(!cache.contains_at("k", start + Duration::from_secs(601)));
        assert!(cache.add_if_absent_at("k", ttl, start + Duration::from_secs(601)));
    }

    #[test]
    fn test_gate_observe_and_forget() {
        let gate = DedupGate::new(Arc::new(MemoryCache::new()), Duration::from_secs(600));
        let id = JobIdentity::new("p1", "US", "j1");

        assert!(!gate.seen(&id));
        assert!(!gate.observe(&id));
        assert!(gate.observe(&id));
        assert!(gate.seen(&id));

        gate.forget(&id);
        assert!(!gate.seen(&id));
        assert!(!gate.observe(&id));
    }

    #[test]
    fn test_concurrent_observe_admits_one() {
        let gate = DedupGate::new(Arc::new(MemoryCache::new()), Duration::from_secs(600));
        let id = JobIdentity::new("p1", "US", "race");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let id = id.clone();
                std::thread::spawn(move || gate.observe(&id))
            })
            .collect();
        let first_seen = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|already| !already)
            .count();
        assert_eq!(first_seen, 1);
    }
}
