use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A process-local TTL cache backed by `DashMap`. Every entry carries its
/// own expiry; reads never block on writes ("Reads never block
/// on writes" — `DashMap`'s shard-striped locking gives us that for free).
pub struct TtlCache<K, V> {
    entries: DashMap<K, (Instant, V)>,
    default_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let hit = self.entries.get(key)?;
        let (expires_at, value) = hit.value().clone();
        if Instant::now() >= expires_at {
            drop(hit);
            self.entries.remove(key);
            return None;
        }
        Some(value)
    }

    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(key, (Instant::now() + ttl, value));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
