//! LRU+TTL result cache for retrieval responses.
//!
//! A hit is only returned while the entry's timestamp falls within the TTL,
//! and every get or set refreshes that timestamp. Insertion past
//! `max_entries` evicts the entry with the oldest timestamp; the scan is
//! O(n), which is fine because `max_entries` is configuration-bounded.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    touched_at: Instant,
}

/// Generic LRU+TTL cache keyed by a hash the caller computes.
pub struct LruTtlCache<V> {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<u32, Entry<V>>>,
}

impl<V: Clone> LruTtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value and refreshes its timestamp.
    pub fn get(&self, key: u32) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(&key) {
            Some(entry) if entry.touched_at.elapsed() <= self.ttl => {
                entry.touched_at = Instant::now();
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: u32, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            Entry {
                value,
                touched_at: Instant::now(),
            },
        );
        if entries.len() > self.max_entries {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.touched_at)
                .map(|(k, _)| *k)
            {
                entries.remove(&oldest);
            }
        }
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: entries expire after the TTL and disappear on read.
    #[test]
    fn ttl_expiry() {
        let cache: LruTtlCache<String> = LruTtlCache::new(Duration::from_millis(0), 4);
        cache.set(1, "v".into());
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }

    /// **Scenario**: a get refreshes the timestamp, protecting the entry
    /// from the next eviction.
    #[test]
    fn get_refreshes_lru_order() {
        let cache: LruTtlCache<u32> = LruTtlCache::new(Duration::from_secs(60), 2);
        cache.set(1, 10);
        std::thread::sleep(Duration::from_millis(2));
        cache.set(2, 20);
        std::thread::sleep(Duration::from_millis(2));
        // Touch 1 so 2 becomes the oldest.
        assert_eq!(cache.get(1), Some(10));
        cache.set(3, 30);
        assert_eq!(cache.get(2), None);
        assert_eq!(cache.get(1), Some(10));
        assert_eq!(cache.get(3), Some(30));
    }

    /// **Scenario**: insertion past the bound evicts exactly one entry.
    #[test]
    fn bounded_size() {
        let cache: LruTtlCache<u32> = LruTtlCache::new(Duration::from_secs(60), 3);
        for key in 0..10 {
            cache.set(key, key);
        }
        assert_eq!(cache.len(), 3);
    }
}
