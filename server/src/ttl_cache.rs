//! Generic thread-safe TTL cache with capacity-bounded, earliest-expiry eviction.
//!
//! Used by the peer-policy engine's authorization fast path, but kept generic over
//! the value type since nothing here is policy-specific.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    expiry: Instant,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    capacity: usize,
    ttl: Duration,
}

/// A capacity-bounded key/value cache where every entry carries the same default TTL.
///
/// `Get` lazily evicts an expired entry on read. `Set` evicts the entry with the
/// earliest expiry when inserting a new key at capacity; updating an existing key
/// never evicts. All operations are serialized behind a single mutex — acceptable at
/// the modest sizes (hundreds to low thousands of entries) this cache is sized for.
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity.min(1024)),
                capacity,
                ttl,
            }),
        }
    }

    /// Returns `Some(value)` if a non-expired entry exists for `key`. An expired
    /// entry is removed as part of this call.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.entries.get(key) {
            Some(entry) if entry.expiry > now => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Inserts or updates `key` with `value`, refreshing its expiry to `now + ttl`.
    /// If `key` is new and the cache is at capacity, the entry with the earliest
    /// expiry is evicted first.
    pub fn set(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let expiry = Instant::now() + inner.ttl;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= inner.capacity {
            if let Some(oldest_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.expiry)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest_key);
            }
        }

        inner.entries.insert(key, Entry { value, expiry });
    }

    /// Removes a single entry, if present.
    pub fn invalidate(&self, key: &K) {
        self.inner.lock().entries.remove(key);
    }

    /// Removes every entry.
    pub fn invalidate_all(&self) {
        self.inner.lock().entries.clear();
    }

    /// Raw entry count, which may include expired-but-not-yet-read rows.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn set_then_get_returns_value_before_expiry() {
        let cache: TtlCache<&str, i32> = TtlCache::new(4, Duration::from_secs(60));
        cache.set("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
    }

    #[test]
    fn get_returns_none_and_decrements_len_after_expiry() {
        let cache: TtlCache<&str, i32> = TtlCache::new(4, Duration::from_millis(10));
        cache.set("a", 1);
        assert_eq!(cache.len(), 1);
        sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn updating_existing_key_does_not_evict() {
        let cache: TtlCache<&str, i32> = TtlCache::new(2, Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn eviction_removes_earliest_expiry_entry() {
        let cache: TtlCache<i32, i32> = TtlCache::new(3, Duration::from_secs(60));
        for i in 0..3 {
            cache.set(i, i);
            // Force distinct insertion times so expiry ordering is unambiguous.
            sleep(Duration::from_millis(5));
        }
        assert_eq!(cache.len(), 3);

        // A fourth distinct key should evict key 0 (earliest expiry, inserted first).
        cache.set(3, 3);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&0), None);
        assert_eq!(cache.get(&3), Some(3));
    }

    #[test]
    fn invalidate_removes_single_entry() {
        let cache: TtlCache<&str, i32> = TtlCache::new(4, Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn invalidate_all_clears_everything() {
        let cache: TtlCache<&str, i32> = TtlCache::new(4, Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.invalidate_all();
        assert_eq!(cache.len(), 0);
    }
}
