//! Per-job retry accounting for completions that arrive before their insert.
//!
//! Entries expire after a TTL of inactivity, so identities that never
//! resolve do not accumulate.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackDecision {
    /// Redeliver. Carries the attempt number, starting at 1.
    Nack(u32),
    /// Budget exhausted; the counter was dropped. Carries the nacks already sent.
    GiveUp(u32),
}

#[derive(Debug, Clone, Copy)]
struct NackEntry {
    count: u32,
    touched: Instant,
}

/// Concurrency-safe counter map. Each decision is one read-modify-write
/// under a single lock.
pub struct NackCounter {
    entries: Mutex<HashMap<String, NackEntry>>,
    ttl: Duration,
}

impl NackCounter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, NackEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Nack while fewer than `max_nacks` were sent, otherwise give up.
    pub fn decide(&self, key: &str, max_nacks: u32) -> NackDecision {
        self.decide_at(key, max_nacks, Instant::now())
    }

    fn decide_at(&self, key: &str, max_nacks: u32, now: Instant) -> NackDecision {
        let ttl = self.ttl;
        let mut entries = self.lock();
        entries.retain(|_, entry| now.duration_since(entry.touched) < ttl);

        let count = entries.get(key).map(|entry| entry.count).unwrap_or(0);
        if count >= max_nacks {
            entries.remove(key);
            return NackDecision::GiveUp(count);
        }
        let count = count + 1;
        entries.insert(key.to_string(), NackEntry { count, touched: now });
        NackDecision::Nack(count)
    }

    pub fn count(&self, key: &str) -> u32 {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|entry| now.duration_since(entry.touched) < self.ttl)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    pub fn clear(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
