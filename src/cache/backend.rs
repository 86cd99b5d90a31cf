//! Cache backend implementations.

use super::entry::{now_millis, CacheEntry};
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Key/value contract shared by the in-process and network-backed stores.
///
/// Implementations may fail (a network store can be unreachable); the
/// [`FallbackStore`](super::FallbackStore) is what turns those failures into
/// silent local fallbacks.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the entry as observed and records the access (`hit_count`,
    /// `last_accessed_at`). Expired entries are removed and reported as a miss.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    async fn set(&self, entry: &CacheEntry) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Remove every entry whose query text contains `pattern`.
    async fn delete_matching(&self, pattern: &str) -> Result<usize>;
    async fn clear(&self) -> Result<usize>;
    /// Live entries, without recording access.
    async fn list(&self) -> Result<Vec<CacheEntry>>;
    async fn len(&self) -> Result<usize>;
    fn name(&self) -> &'static str;
}

/// How many of the least recently used entries a full store inspects for
/// expiry before evicting.
const EXPIRY_SCAN_LIMIT: usize = 32;

/// Bounded in-process store with lazy expiry and LRU eviction.
///
/// Recency is the exact access order kept by [`LruCache`] (every `get` hit and
/// every `set` promotes), so two entries can never tie for eviction.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    evictions: AtomicU64,
}

impl MemoryCache {
    /// A capacity of zero is raised to one.
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            evictions: AtomicU64::new(0),
        }
    }

    // No critical section leaves the map half-updated, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Number of entries evicted for capacity since construction.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let now = now_millis();
        let mut entries = self.lock();
        match entries.get_mut(key) {
            None => return None,
            Some(entry) if !entry.is_expired_at(now) => {
                let observed = entry.clone();
                entry.record_hit();
                return Some(observed);
            }
            Some(_) => {}
        }
        entries.pop(key);
        debug!(cache_key = key, "memory cache entry expired");
        None
    }

    pub fn insert(&self, entry: CacheEntry) {
        let key = entry.key.clone();
        let mut entries = self.lock();

        if !entries.contains(&key) && entries.len() >= entries.cap().get() {
            let now = now_millis();
            let expired: Vec<String> = entries
                .iter()
                .rev()
                .take(EXPIRY_SCAN_LIMIT)
                .filter(|(_, e)| e.is_expired_at(now))
                .map(|(k, _)| k.clone())
                .collect();
            for k in &expired {
                entries.pop(k);
            }
        }

        if let Some((evicted_key, evicted)) = entries.push(key.clone(), entry) {
            if evicted_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    cache_key = evicted_key.as_str(),
                    hit_count = evicted.hit_count,
                    "memory cache evicted least recently used entry"
                );
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().pop(key).is_some()
    }

    pub fn remove_matching(&self, pattern: &str) -> usize {
        let mut entries = self.lock();
        let matched: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.query.contains(pattern))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &matched {
            entries.pop(k);
        }
        matched.len()
    }

    pub fn purge(&self) -> usize {
        let mut entries = self.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    /// Live entries ordered for eviction: oldest `last_accessed_at` first,
    /// then oldest `created_at`.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let now = now_millis();
        let mut live: Vec<CacheEntry> = self
            .lock()
            .iter()
            .filter(|(_, e)| !e.is_expired_at(now))
            .map(|(_, e)| e.clone())
            .collect();
        live.sort_by_key(|e| (e.last_accessed_at, e.created_at));
        live
    }

    pub fn live_len(&self) -> usize {
        let now = now_millis();
        self.lock()
            .iter()
            .filter(|(_, e)| !e.is_expired_at(now))
            .count()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.lookup(key))
    }
    async fn set(&self, entry: &CacheEntry) -> Result<()> {
        self.insert(entry.clone());
        Ok(())
    }
    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.remove(key))
    }
    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        Ok(self.remove_matching(pattern))
    }
    async fn clear(&self) -> Result<usize> {
        Ok(self.purge())
    }
    async fn list(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.snapshot())
    }
    async fn len(&self) -> Result<usize> {
        Ok(self.live_len())
    }
    fn name(&self) -> &'static str {
        "memory"
    }
}
