//! In-memory TTL cache for upstream lookups.
//!
//! RULE: no ambient global caches. The cache is an explicit component
//! that callers construct and inject, and `now` is always passed in —
//! derivation passes stay deterministic and independently testable.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, (DateTime<Utc>, V)>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// A live value for the key, or None when absent or older than the
    /// TTL. Expiry is exclusive: an entry aged exactly `ttl` is dead.
    pub fn get(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        self.entries.get(key).and_then(|(stored_at, value)| {
            if now.signed_duration_since(*stored_at) < self.ttl {
                Some(value.clone())
            } else {
                None
            }
        })
    }

    pub fn insert(&mut self, key: K, value: V, now: DateTime<Utc>) {
        self.entries.insert(key, (now, value));
    }

    /// Age-based eviction. Callers run this opportunistically; `get`
    /// already refuses stale entries, so eviction only reclaims memory.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, (stored_at, _)| now.signed_duration_since(*stored_at) < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
