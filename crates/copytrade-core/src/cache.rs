//! Bounded, TTL-expiring cache shared by the leader monitor (tx-range
//! responses) and the executor (per-position locks).
//!
//! Grounded in the teacher's `DashMap`-plus-manual-sweep idiom
//! (`leader-monitor`'s original trade history cleanup): a concurrent map of
//! entries each carrying an insertion time and a last-access time, bounded
//! by both an entry count and an estimated memory footprint, with eviction
//! driven by a background sweep task rather than by callers iterating the
//! map themselves (§9 "Shared mutable caches → value-moving API").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use std::hash::Hash;
use tokio::task::JoinHandle;
use tracing::debug;

/// Absolute ceiling on any cache's TTL, regardless of configuration
/// (§5 Resource policy).
pub const MAX_TTL: Duration = Duration::from_secs(30 * 60);

/// Absolute ceiling on the background sweep period.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry<V> {
    value: V,
    inserted_at: tokio::time::Instant,
    last_accessed_at: AtomicU64, // millis since `inserted_at`'s epoch, relaxed LRU clock
    size_bytes: u64,
}

/// Point-in-time counters for a cache, used by tests and operator tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub memory_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// A size+memory-bounded map with TTL expiry and LRU eviction.
///
/// `V`'s approximate heap size is supplied by the caller at `put` time so the
/// cache never has to assume anything about what it stores.
pub struct BoundedCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    max_entries: usize,
    max_memory_bytes: u64,
    ttl: Duration,
    memory_used: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    started_at: tokio::time::Instant,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_entries: usize, max_memory_bytes: u64, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            max_entries,
            max_memory_bytes,
            ttl: ttl.min(MAX_TTL),
            memory_used: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            started_at: tokio::time::Instant::now(),
        })
    }

    fn now_millis(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Look up a key, returning `None` on miss or expiry. Touches LRU clock
    /// on hit.
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.inserted_at.elapsed() > self.ttl {
                drop(entry);
                self.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            entry.last_accessed_at.store(self.now_millis(), Ordering::Relaxed);
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.value.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert or overwrite a value, evicting LRU entries first if either
    /// ceiling would otherwise be exceeded.
    pub fn put(&self, key: K, value: V, size_bytes: u64) {
        self.remove(&key);
        self.evict_to_fit(size_bytes);

        let now = self.now_millis();
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: tokio::time::Instant::now(),
                last_accessed_at: AtomicU64::new(now),
                size_bytes,
            },
        );
        self.memory_used.fetch_add(size_bytes, Ordering::Relaxed);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| {
            self.memory_used.fetch_sub(entry.size_bytes, Ordering::Relaxed);
            entry.value
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            memory_bytes: self.memory_used.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Remove every expired entry. Runs in O(expired), since it only visits
    /// entries past their TTL rather than the whole map on every tick (the
    /// whole-map scan below is required to *find* them, but removal work is
    /// proportional to how many are actually stale).
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut expired = Vec::new();
        for entry in self.entries.iter() {
            if entry.inserted_at.elapsed() > ttl {
                expired.push(entry.key().clone());
            }
        }
        let removed = expired.len();
        for key in expired {
            self.remove(&key);
        }
        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
        removed
    }

    fn evict_to_fit(&self, incoming_size: u64) {
        let would_exceed_memory = |used: u64| used + incoming_size > self.max_memory_bytes;
        let mut used = self.memory_used.load(Ordering::Relaxed);

        while self.entries.len() >= self.max_entries
            || (self.max_memory_bytes > 0 && would_exceed_memory(used))
        {
            let Some(oldest_key) = self.find_lru_key() else {
                break;
            };
            if let Some(removed_value) = self.remove(&oldest_key) {
                drop(removed_value);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            } else {
                break;
            }
            used = self.memory_used.load(Ordering::Relaxed);
        }
    }

    fn find_lru_key(&self) -> Option<K> {
        self.entries
            .iter()
            .min_by_key(|e| e.last_accessed_at.load(Ordering::Relaxed))
            .map(|e| e.key().clone())
    }
}

/// Spawn the cache's background sweep loop. Returns a handle the caller
/// should abort on shutdown.
pub fn spawn_sweeper<K, V>(
    cache: Arc<BoundedCache<K, V>>,
    interval: Duration,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let interval = interval.min(MAX_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            cache.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ceiling_is_honored() {
        let cache: Arc<BoundedCache<u32, u32>> = BoundedCache::new(3, u64::MAX, Duration::from_secs(60));
        for i in 0..10 {
            cache.put(i, i, 1);
        }
        assert!(cache.stats().entries <= 3);
    }

    #[test]
    fn memory_ceiling_is_honored() {
        let cache: Arc<BoundedCache<u32, Vec<u8>>> =
            BoundedCache::new(1000, 100, Duration::from_secs(60));
        for i in 0..50u32 {
            cache.put(i, vec![0u8; 10], 10);
        }
        assert!(cache.stats().memory_bytes <= 100);
    }

    #[test]
    fn expired_entries_are_swept() {
        let cache: Arc<BoundedCache<&str, i32>> =
            BoundedCache::new(10, u64::MAX, Duration::from_millis(1));
        cache.put("a", 1, 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn ttl_is_capped_at_max() {
        let cache: Arc<BoundedCache<&str, i32>> =
            BoundedCache::new(10, u64::MAX, Duration::from_secs(60 * 60));
        assert_eq!(cache.ttl, MAX_TTL);
    }

    #[test]
    fn get_refreshes_lru_order() {
        let cache: Arc<BoundedCache<u32, u32>> = BoundedCache::new(2, u64::MAX, Duration::from_secs(60));
        cache.put(1, 1, 1);
        cache.put(2, 2, 1);
        // Touch 1 so 2 becomes the LRU victim.
        assert_eq!(cache.get(&1), Some(1));
        cache.put(3, 3, 1);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(1));
        assert_eq!(cache.get(&3), Some(3));
    }
}
