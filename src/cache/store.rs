//! The store the façade talks to: remote-first with silent local fallback.

use super::backend::{CacheBackend, MemoryCache};
use super::entry::CacheEntry;
use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
};
use crate::Result;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

struct Remote {
    backend: Arc<dyn CacheBackend>,
    timeout: Duration,
    breaker: CircuitBreaker,
}

/// Infallible composition of an optional network store and a [`MemoryCache`].
///
/// Every remote call runs under `backend_timeout`. An error, a missed deadline
/// or an open breaker degrades that single operation to the local store and
/// bumps [`fallbacks`](Self::fallbacks). Writes go to both stores so the
/// local copy can answer during an outage.
pub struct FallbackStore {
    local: MemoryCache,
    remote: Option<Remote>,
    fallbacks: AtomicU64,
}

impl FallbackStore {
    /// In-process only (mock mode).
    pub fn new_local(local: MemoryCache) -> Self {
        Self {
            local,
            remote: None,
            fallbacks: AtomicU64::new(0),
        }
    }

    pub fn with_remote(
        remote: Arc<dyn CacheBackend>,
        local: MemoryCache,
        timeout: Duration,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        Self {
            local,
            remote: Some(Remote {
                backend: remote,
                timeout,
                breaker: CircuitBreaker::new(breaker),
            }),
            fallbacks: AtomicU64::new(0),
        }
    }

    pub fn local(&self) -> &MemoryCache {
        &self.local
    }

    /// Name of the authoritative backend.
    pub fn backend_name(&self) -> &'static str {
        self.remote
            .as_ref()
            .map(|r| r.backend.name())
            .unwrap_or_else(|| self.local.name())
    }

    pub fn fallbacks(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn breaker_snapshot(&self) -> Option<CircuitBreakerSnapshot> {
        self.remote.as_ref().map(|r| r.breaker.snapshot())
    }

    fn degrade(&self, remote: &Remote, op: &'static str, reason: &str) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        warn!(
            backend = remote.backend.name(),
            operation = op,
            error = reason,
            "cache backend unavailable, serving from memory"
        );
        if remote.breaker.on_failure() {
            warn!(
                backend = remote.backend.name(),
                cooldown_ms = remote.breaker.snapshot().cooldown_ms,
                "circuit breaker opened for cache backend"
            );
        }
    }

    /// `None` when there is no remote or the call degraded.
    async fn call_remote<R, F, Fut>(&self, op: &'static str, f: F) -> Option<R>
    where
        F: FnOnce(Arc<dyn CacheBackend>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let remote = self.remote.as_ref()?;
        if !remote.breaker.allow() {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
            debug!(backend = remote.backend.name(), operation = op, "circuit open, skipping backend");
            return None;
        }
        match tokio::time::timeout(remote.timeout, f(remote.backend.clone())).await {
            Ok(Ok(v)) => {
                remote.breaker.on_success();
                Some(v)
            }
            Ok(Err(e)) => {
                self.degrade(remote, op, &e.to_string());
                None
            }
            Err(_) => {
                let reason = format!("deadline of {} ms exceeded", remote.timeout.as_millis());
                self.degrade(remote, op, &reason);
                None
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.call_remote("get", |r| async move { r.get(key).await }).await {
            Some(Some(entry)) => {
                let mut mirrored = entry.clone();
                mirrored.record_hit();
                self.local.insert(mirrored);
                Some(entry)
            }
            Some(None) => {
                self.local.remove(key);
                None
            }
            None => self.local.lookup(key),
        }
    }

    pub async fn set(&self, entry: &CacheEntry) {
        self.local.insert(entry.clone());
        self.call_remote("set", |r| async move { r.set(entry).await })
            .await;
    }

    pub async fn delete(&self, key: &str) -> bool {
        let local = self.local.remove(key);
        let remote = self
            .call_remote("delete", |r| async move { r.delete(key).await })
            .await
            .unwrap_or(false);
        local || remote
    }

    pub async fn delete_matching(&self, pattern: &str) -> usize {
        let local = self.local.remove_matching(pattern);
        self.call_remote("delete_matching", |r| async move {
            r.delete_matching(pattern).await
        })
        .await
        .unwrap_or(local)
    }

    pub async fn clear(&self) -> usize {
        let local = self.local.purge();
        self.call_remote("clear", |r| async move { r.clear().await })
            .await
            .unwrap_or(local)
    }

    pub async fn list(&self) -> Vec<CacheEntry> {
        match self.call_remote("list", |r| async move { r.list().await }).await {
            Some(entries) => entries,
            None => self.local.snapshot(),
        }
    }

    pub async fn len(&self) -> usize {
        match self.call_remote("len", |r| async move { r.len().await }).await {
            Some(n) => n,
            None => self.local.live_len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn entry(key: &str, query: &str) -> CacheEntry {
        CacheEntry::new(key, query, "openai", json!("answer"), 0.9, 300)
    }

    #[derive(Default)]
    struct Unreachable {
        calls: AtomicUsize,
    }

    impl Unreachable {
        fn fail<T>(&self) -> Result<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::backend("unreachable", "connection refused"))
        }
    }

    #[async_trait]
    impl CacheBackend for Unreachable {
        async fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
            self.fail()
        }
        async fn set(&self, _entry: &CacheEntry) -> Result<()> {
            self.fail()
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            self.fail()
        }
        async fn delete_matching(&self, _pattern: &str) -> Result<usize> {
            self.fail()
        }
        async fn clear(&self) -> Result<usize> {
            self.fail()
        }
        async fn list(&self) -> Result<Vec<CacheEntry>> {
            self.fail()
        }
        async fn len(&self) -> Result<usize> {
            self.fail()
        }
        fn name(&self) -> &'static str {
            "unreachable"
        }
    }

    struct Hanging;

    #[async_trait]
    impl CacheBackend for Hanging {
        async fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
        async fn set(&self, _entry: &CacheEntry) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
        async fn delete_matching(&self, _pattern: &str) -> Result<usize> {
            Ok(0)
        }
        async fn clear(&self) -> Result<usize> {
            Ok(0)
        }
        async fn list(&self) -> Result<Vec<CacheEntry>> {
            Ok(Vec::new())
        }
        async fn len(&self) -> Result<usize> {
            Ok(0)
        }
        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    fn breaker(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(threshold)
            .with_cooldown(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_local_only() {
        let store = FallbackStore::new_local(MemoryCache::new(10));
        store.set(&entry("k", "what is rust")).await;
        assert_eq!(store.get("k").await.unwrap().hit_count, 1);
        assert_eq!(store.get("k").await.unwrap().hit_count, 2);
        assert_eq!(store.backend_name(), "memory");
        assert_eq!(store.fallbacks(), 0);
        assert!(store.breaker_snapshot().is_none());
    }

    #[tokio::test]
    async fn test_remote_write_through_and_read() {
        let remote = Arc::new(MemoryCache::new(10));
        let store = FallbackStore::with_remote(
            remote.clone(),
            MemoryCache::new(10),
            Duration::from_millis(250),
            breaker(5),
        );
        store.set(&entry("k", "q")).await;
        assert_eq!(remote.live_len(), 1);
        assert_eq!(store.local().live_len(), 1);

        let hit = store.get("k").await.unwrap();
        assert_eq!(hit.hit_count, 1);
        assert_eq!(store.fallbacks(), 0);

        // Removed elsewhere: the remote is authoritative.
        remote.remove("k");
        assert!(store.get("k").await.is_none());
        assert_eq!(store.local().live_len(), 0);
    }

    #[tokio::test]
    async fn test_failing_remote_falls_back_silently() {
        let remote = Arc::new(Unreachable::default());
        let store = FallbackStore::with_remote(
            remote.clone(),
            MemoryCache::new(10),
            Duration::from_millis(250),
            breaker(0),
        );
        store.set(&entry("k", "server status")).await;
        let hit = store.get("k").await.unwrap();
        assert_eq!(hit.query, "server status");
        assert_eq!(store.len().await, 1);
        assert_eq!(store.list().await.len(), 1);
        assert_eq!(store.delete_matching("server").await, 1);
        assert_eq!(store.fallbacks(), 5);
        assert_eq!(store.backend_name(), "unreachable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_remote_is_bounded_by_deadline() {
        let store = FallbackStore::with_remote(
            Arc::new(Hanging),
            MemoryCache::new(10),
            Duration::from_millis(250),
            breaker(0),
        );
        let started = tokio::time::Instant::now();
        store.set(&entry("k", "q")).await;
        assert!(store.get("k").await.is_some());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(store.fallbacks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_skips_remote() {
        let remote = Arc::new(Unreachable::default());
        let store = FallbackStore::with_remote(
            remote.clone(),
            MemoryCache::new(10),
            Duration::from_millis(250),
            breaker(2),
        );
        for _ in 0..5 {
            store.get("missing").await;
        }
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.fallbacks(), 5);
        assert_eq!(store.breaker_snapshot().unwrap().trips, 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        store.get("missing").await;
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);
    }
}
