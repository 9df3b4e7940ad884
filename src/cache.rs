//! Bounded, concurrency-safe LRU caches keyed by exact input text.
//!
//! Ingestion and retrieval share these caches from concurrent tasks, so the
//! map is guarded rather than thread-local. Capacity defaults to 1000 entries
//! and eviction is strictly least-recently-used.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// Default number of entries retained by each process-wide cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// A guarded LRU map from input text to a cloneable value.
pub struct TextCache<V> {
    inner: Mutex<LruCache<String, V>>,
}

impl<V: Clone> TextCache<V> {
    /// Creates a cache bounded at `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns a clone of the cached value and marks the entry recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    /// Inserts or refreshes an entry, evicting the least recently used one if
    /// the cache is full.
    pub fn insert(&self, key: String, value: V) {
        self.inner.lock().put(key, value);
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` when no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_enforced_with_lru_eviction() {
        let cache: TextCache<u32> = TextCache::new(2);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);

        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c".into(), 3);

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache: TextCache<u32> = TextCache::new(0);
        cache.insert("a".into(), 1);
        assert_eq!(cache.get("a"), Some(1));
    }
}
