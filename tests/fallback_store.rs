//! Tests for graceful degradation when the network store misbehaves.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ai_lib_cache::cache::{CacheBackend, MemoryCache};
use ai_lib_cache::resilience::circuit_breaker::CircuitBreakerConfig;
use ai_lib_cache::{
    CacheEntry, CacheManager, CacheSettings, Error, ProviderResponse, ResolveSource, Result,
};
use async_trait::async_trait;
use serde_json::json;

/// Wraps a [`MemoryCache`] and can be switched into an outage.
struct FlakyStore {
    inner: MemoryCache,
    down: AtomicBool,
    hang: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCache::new(100),
            down: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    async fn gate(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::backend("flaky", "connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.gate().await?;
        Ok(self.inner.lookup(key))
    }
    async fn set(&self, entry: &CacheEntry) -> Result<()> {
        self.gate().await?;
        self.inner.insert(entry.clone());
        Ok(())
    }
    async fn delete(&self, key: &str) -> Result<bool> {
        self.gate().await?;
        Ok(self.inner.remove(key))
    }
    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        self.gate().await?;
        Ok(self.inner.remove_matching(pattern))
    }
    async fn clear(&self) -> Result<usize> {
        self.gate().await?;
        Ok(self.inner.purge())
    }
    async fn list(&self) -> Result<Vec<CacheEntry>> {
        self.gate().await?;
        Ok(self.inner.snapshot())
    }
    async fn len(&self) -> Result<usize> {
        self.gate().await?;
        Ok(self.inner.live_len())
    }
    fn name(&self) -> &'static str {
        "flaky"
    }
}

fn settings() -> CacheSettings {
    CacheSettings::new()
        .with_mock_mode(false)
        .with_backend_timeout(Duration::from_millis(250))
        .with_breaker(CircuitBreakerConfig::new().with_failure_threshold(0))
}

#[tokio::test]
async fn outage_never_surfaces_an_error() {
    let remote = FlakyStore::new();
    let m = CacheManager::with_remote(settings(), remote.clone()).unwrap();
    assert_eq!(m.backend_name(), "flaky");

    m.set_cached_response("before outage", json!("cached"), 1.0, "openai")
        .await
        .unwrap();
    remote.down.store(true, Ordering::SeqCst);

    // Served from the local copy written through earlier.
    let hit = m.get_cached_response("before outage", "openai").await.unwrap();
    assert_eq!(hit.response, json!("cached"));

    let computed = m
        .get_or_compute("during outage", "openai", || async {
            Ok::<_, String>(ProviderResponse::new(json!("fresh"), 0.8))
        })
        .await
        .unwrap();
    assert_eq!(computed.source, ResolveSource::Computed);
    assert!(m.get_cached_response("during outage", "openai").await.is_some());

    assert_eq!(m.clear_cache(Some("outage")).await, 2);
    let stats = m.get_cache_stats().await;
    assert!(stats.backend_fallbacks >= 5, "{}", stats.backend_fallbacks);
    assert_eq!(stats.total_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_store_is_bounded_by_backend_timeout() {
    let remote = FlakyStore::new();
    remote.hang.store(true, Ordering::SeqCst);
    let m = CacheManager::with_remote(settings(), remote.clone()).unwrap();

    let started = tokio::time::Instant::now();
    m.set_cached_response("q", json!(1), 1.0, "p").await.unwrap();
    assert!(m.get_cached_response("q", "p").await.is_some());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(m.get_cache_stats().await.backend_fallbacks, 3);
}

#[tokio::test(start_paused = true)]
async fn open_breaker_stops_calling_the_store() {
    let remote = FlakyStore::new();
    remote.down.store(true, Ordering::SeqCst);
    let m = CacheManager::with_remote(
        settings().with_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(3)
                .with_cooldown(Duration::from_secs(30)),
        ),
        remote.clone(),
    )
    .unwrap();

    for i in 0..10 {
        m.get_cached_response(&format!("q{i}"), "p").await;
    }
    assert_eq!(remote.calls.load(Ordering::SeqCst), 3);

    // Recovered store is probed again after the cooldown.
    remote.down.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(31)).await;
    m.set_cached_response("back", json!(1), 1.0, "p").await.unwrap();
    assert_eq!(remote.calls.load(Ordering::SeqCst), 4);
    assert_eq!(remote.inner.live_len(), 1);
}

#[tokio::test]
async fn managers_share_entries_through_the_remote_store() {
    let remote = FlakyStore::new();
    let a = CacheManager::with_remote(settings(), remote.clone()).unwrap();
    let b = CacheManager::with_remote(settings(), remote.clone()).unwrap();

    a.set_cached_response("shared question", json!("shared answer"), 1.0, "openai")
        .await
        .unwrap();
    let hit = b
        .get_cached_response("shared question", "openai")
        .await
        .unwrap();
    assert_eq!(hit.response, json!("shared answer"));
    assert_eq!(hit.hit_count, 1);

    // The remote recorded b's hit; a sees the updated count.
    let again = a
        .get_cached_response("shared question", "openai")
        .await
        .unwrap();
    assert_eq!(again.hit_count, 2);
}

#[tokio::test]
async fn mock_mode_ignores_configured_url() {
    let m = CacheManager::new(
        CacheSettings::new()
            .with_mock_mode(true)
            .with_redis_url("redis://127.0.0.1:1"),
    )
    .unwrap();
    assert_eq!(m.backend_name(), "memory");
    m.set_cached_response("q", json!(1), 1.0, "p").await.unwrap();
    assert_eq!(m.get_cache_stats().await.backend_fallbacks, 0);
}
