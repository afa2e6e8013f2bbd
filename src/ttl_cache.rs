// =============================================================================
// Generic TTL cache
// =============================================================================
//
// Backs every process-wide "cached ≤ N seconds" map in §5: the indicator
// cache, the per-cycle signal cache, and per-group prefetch caches.
// Generalizes the timestamp-based staleness check in `SignalDecayManager`
// from exponential decay to hard expiry: an entry older than `ttl` is
// treated as absent rather than weighted down.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct Entry<V> {
    value: V,
    recorded_at: Instant,
}

pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached value if present and not yet expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.recorded_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.write();
        entries.insert(
            key,
            Entry {
                value,
                recorded_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drop every entry older than the configured TTL.
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.entries
            .write()
            .retain(|_, entry| entry.recorded_at.elapsed() <= ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn returns_none_for_missing_key() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(5));
        assert!(cache.get(&"missing".to_string()).is_none());
    }

    #[test]
    fn returns_value_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(5));
        cache.insert("k".to_string(), 42);
        assert_eq!(cache.get(&"k".to_string()), Some(42));
    }

    #[test]
    fn expires_after_ttl() {
        let cache = TtlCache::new(Duration::from_millis(10));
        cache.insert("k".to_string(), 42);
        sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[test]
    fn clear_drops_all_entries() {
        let cache = TtlCache::new(Duration::from_secs(5));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.clear();
        assert!(cache.get(&"a".to_string()).is_none());
        assert!(cache.get(&"b".to_string()).is_none());
    }
}
