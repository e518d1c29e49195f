use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Per-process response cache with time-based expiry only. Entries live
/// until their deadline passes; there is no size bound. Read paths may
/// consult it, write paths never do.
pub struct TtlCache<V> {
    entries: DashMap<String, (Instant, V)>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns the cached value if its deadline has not passed. Expired
    /// entries are removed on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        let hit = self.entries.get(key).and_then(|entry| {
            let (deadline, value) = entry.value();
            if Instant::now() < *deadline {
                Some(value.clone())
            } else {
                None
            }
        });
        if hit.is_none() {
            self.entries.remove_if(key, |_, (deadline, _)| Instant::now() >= *deadline);
        }
        hit
    }

    pub fn insert(&self, key: String, value: V, ttl: Duration) {
        self.entries.insert(key, (Instant::now() + ttl, value));
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
