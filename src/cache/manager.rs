//! Cache manager.

use super::backend::{CacheBackend, MemoryCache};
use super::coalesce::{Acquire, Coalescer, FlightFailure, FlightGuard};
use super::entry::{CacheEntry, ProviderResponse, WarmEntry};
use super::key::{CacheKey, CacheKeyGenerator};
use super::store::FallbackStore;
use super::ttl::TtlPolicy;
use crate::config::CacheSettings;
use crate::resilience::rate_limiter::{RateDecision, RateLimiter, RateLimiterSnapshot};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Concurrent writes while warming.
const WARM_CONCURRENCY: usize = 16;

/// An inference backend the manager can call on a miss.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Provider identifier; part of the cache key and the rate-limit bucket.
    fn id(&self) -> &str;
    async fn infer(&self, query: &str, context: &serde_json::Value) -> Result<ProviderResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveSource {
    /// Served from the store.
    Cache,
    /// This caller led the computation.
    Computed,
    /// Another caller's computation was shared.
    Coalesced,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub entry: CacheEntry,
    pub source: ResolveSource,
}

impl Resolved {
    pub fn response(&self) -> &serde_json::Value {
        &self.entry.response
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub total_entries: usize,
    /// Most-hit live entries; ties go to the most recently accessed.
    pub top_entries: Vec<CacheEntry>,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub computations: u64,
    pub coalesced: u64,
    pub rate_limited: u64,
    pub compute_failures: u64,
    pub backend_fallbacks: u64,
    pub evictions: u64,
    pub in_flight: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    computations: AtomicU64,
    coalesced: AtomicU64,
    rate_limited: AtomicU64,
    compute_failures: AtomicU64,
}

impl AtomicStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn fill(&self, stats: &mut CacheStats) {
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        stats.sets = self.sets.load(Ordering::Relaxed);
        stats.computations = self.computations.load(Ordering::Relaxed);
        stats.coalesced = self.coalesced.load(Ordering::Relaxed);
        stats.rate_limited = self.rate_limited.load(Ordering::Relaxed);
        stats.compute_failures = self.compute_failures.load(Ordering::Relaxed);
    }
}

/// Façade over key derivation, the fallback store, TTL policy, the rate
/// limiter and single-flight coalescing.
///
/// Construct one per process and share it (`Arc<CacheManager>`); there is no
/// global instance.
pub struct CacheManager {
    settings: CacheSettings,
    keys: CacheKeyGenerator,
    store: FallbackStore,
    ttl: TtlPolicy,
    limiter: RateLimiter,
    flights: Coalescer<CacheEntry>,
    stats: AtomicStats,
}

#[cfg(feature = "redis")]
fn network_backend(settings: &CacheSettings) -> Result<Option<Arc<dyn CacheBackend>>> {
    use super::redis::{RedisCache, RedisCacheConfig};

    let Some(url) = settings.redis_url.as_deref() else {
        return Ok(None);
    };
    let mut config = RedisCacheConfig::default();
    if let Some(ref prefix) = settings.key_prefix {
        config.prefix = format!("{}{prefix}:", config.prefix);
    }
    Ok(Some(Arc::new(RedisCache::from_url_with_config(url, config)?)))
}

#[cfg(not(feature = "redis"))]
fn network_backend(settings: &CacheSettings) -> Result<Option<Arc<dyn CacheBackend>>> {
    if settings.redis_url.is_some() {
        warn!("redisUrl is set but the `redis` feature is disabled; using the in-process store only");
    }
    Ok(None)
}

impl CacheManager {
    /// Wires the stores from settings: mock mode (or no usable network
    /// backend) means the in-process store only.
    pub fn new(settings: CacheSettings) -> Result<Self> {
        settings.validate()?;
        let local = MemoryCache::new(settings.max_cache_size);
        let store = if settings.enable_mock_mode {
            FallbackStore::new_local(local)
        } else {
            match network_backend(&settings)? {
                Some(remote) => FallbackStore::with_remote(
                    remote,
                    local,
                    settings.backend_timeout,
                    settings.breaker.clone(),
                ),
                None => FallbackStore::new_local(local),
            }
        };
        Ok(Self::assemble(settings, store))
    }

    /// Use `remote` as the network store regardless of `enable_mock_mode`.
    pub fn with_remote(settings: CacheSettings, remote: Arc<dyn CacheBackend>) -> Result<Self> {
        settings.validate()?;
        let store = FallbackStore::with_remote(
            remote,
            MemoryCache::new(settings.max_cache_size),
            settings.backend_timeout,
            settings.breaker.clone(),
        );
        Ok(Self::assemble(settings, store))
    }

    fn assemble(settings: CacheSettings, store: FallbackStore) -> Self {
        let keys = match settings.key_prefix {
            Some(ref prefix) => CacheKeyGenerator::new().with_salt(prefix.clone()),
            None => CacheKeyGenerator::new(),
        };
        info!(
            backend = store.backend_name(),
            max_cache_size = settings.max_cache_size,
            rate_limiting = settings.prevent_excessive_api_calls,
            "cache manager ready"
        );
        Self {
            keys,
            ttl: settings.ttl_policy(),
            limiter: RateLimiter::new(settings.rate_limiter_config()),
            flights: Coalescer::new(settings.lock_timeout),
            store,
            stats: AtomicStats::default(),
            settings,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn rate_limit_snapshot(&self, provider: &str) -> Option<RateLimiterSnapshot> {
        self.limiter.snapshot(provider.trim())
    }

    fn key(&self, query: &str, provider: &str) -> Option<CacheKey> {
        let key = self.keys.generate(provider, query);
        if key.is_none() {
            debug!(provider, "rejected empty query or provider");
        }
        key
    }

    async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let hit = self.store.get(key.as_str()).await;
        match hit {
            Some(ref entry) => {
                AtomicStats::bump(&self.stats.hits);
                debug!(
                    cache_key = %key,
                    provider = key.provider.as_str(),
                    hit_count = entry.hit_count,
                    "cache hit"
                );
            }
            None => {
                AtomicStats::bump(&self.stats.misses);
                debug!(cache_key = %key, provider = key.provider.as_str(), "cache miss");
            }
        }
        hit
    }

    fn build_entry(&self, key: &CacheKey, query: &str, response: ProviderResponse) -> CacheEntry {
        let ttl = self.ttl.compute(&key.provider, response.confidence);
        CacheEntry::new(
            key.as_str(),
            query.trim(),
            key.provider.as_str(),
            response.content,
            response.confidence,
            ttl,
        )
        .with_metadata(response.metadata)
    }

    async fn write(&self, entry: &CacheEntry) {
        self.store.set(entry).await;
        AtomicStats::bump(&self.stats.sets);
    }

    /// Look up a cached response. Never fails: invalid input and store outages
    /// both read as a miss.
    pub async fn get_cached_response(&self, query: &str, provider: &str) -> Option<CacheEntry> {
        let key = self.key(query, provider)?;
        self.lookup(&key).await
    }

    /// Store a response with a TTL derived from `provider` and `confidence`.
    /// Returns `None` when the query or provider is empty.
    pub async fn set_cached_response(
        &self,
        query: &str,
        response: serde_json::Value,
        confidence: f64,
        provider: &str,
    ) -> Option<CacheEntry> {
        let key = self.key(query, provider)?;
        let entry = self.build_entry(&key, query, ProviderResponse::new(response, confidence));
        self.write(&entry).await;
        debug!(
            cache_key = %key,
            provider = key.provider.as_str(),
            ttl_seconds = entry.ttl_seconds,
            "cache entry stored"
        );
        Some(entry)
    }

    /// Return the cached response or run `compute` at most once across all
    /// concurrent callers for the same key, bounded by `computeTimeout`.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        query: &str,
        provider: &str,
        compute: F,
    ) -> Result<Resolved>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<ProviderResponse, E>>,
        E: Display,
    {
        self.get_or_compute_with_deadline(query, provider, self.settings.compute_timeout, compute)
            .await
    }

    /// [`get_or_compute`](Self::get_or_compute) with a caller-supplied deadline
    /// for the computation.
    pub async fn get_or_compute_with_deadline<F, Fut, E>(
        &self,
        query: &str,
        provider: &str,
        deadline: Duration,
        compute: F,
    ) -> Result<Resolved>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<ProviderResponse, E>>,
        E: Display,
    {
        let key = self
            .keys
            .generate(provider, query)
            .ok_or_else(|| Error::invalid_key("query and provider must be non-empty"))?;

        if let Some(entry) = self.lookup(&key).await {
            return Ok(Resolved {
                entry,
                source: ResolveSource::Cache,
            });
        }

        let guard = loop {
            match self.flights.acquire(key.as_str()) {
                Acquire::Leader(guard) => break guard,
                Acquire::Follower(handle) => match handle.wait().await {
                    Some(Ok(entry)) => {
                        AtomicStats::bump(&self.stats.coalesced);
                        return Ok(Resolved {
                            entry,
                            source: ResolveSource::Coalesced,
                        });
                    }
                    Some(Err(failure)) => {
                        AtomicStats::bump(&self.stats.coalesced);
                        return Err(failure.into());
                    }
                    None => {
                        debug!(cache_key = %key, "leader released without outcome, re-acquiring");
                    }
                },
            }
        };

        self.lead(guard, &key, query, deadline, compute).await
    }

    async fn lead<F, Fut, E>(
        &self,
        guard: FlightGuard<CacheEntry>,
        key: &CacheKey,
        query: &str,
        deadline: Duration,
        compute: F,
    ) -> Result<Resolved>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<ProviderResponse, E>>,
        E: Display,
    {
        // A previous leader may have stored the entry after our miss.
        if let Some(entry) = self.store.get(key.as_str()).await {
            AtomicStats::bump(&self.stats.hits);
            guard.complete(Ok(entry.clone()));
            return Ok(Resolved {
                entry,
                source: ResolveSource::Cache,
            });
        }

        let decision = self.limiter.check(&key.provider);
        if !decision.allowed {
            AtomicStats::bump(&self.stats.rate_limited);
            let reason = decision.reason.unwrap_or_default();
            warn!(
                cache_key = %key,
                provider = key.provider.as_str(),
                reason = reason.as_str(),
                "inference call denied by rate limiter"
            );
            let failure = FlightFailure::RateLimited {
                provider: key.provider.clone(),
                reason,
            };
            guard.complete(Err(failure.clone()));
            return Err(failure.into());
        }

        AtomicStats::bump(&self.stats.computations);
        let started = Instant::now();
        let outcome = match tokio::time::timeout(deadline, compute()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(FlightFailure::Compute(e.to_string())),
            Err(_) => Err(FlightFailure::Timeout {
                after_ms: deadline.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(response) => {
                let entry = self.build_entry(key, query, response);
                self.write(&entry).await;
                debug!(
                    cache_key = %key,
                    provider = key.provider.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ttl_seconds = entry.ttl_seconds,
                    "computed and cached"
                );
                guard.complete(Ok(entry.clone()));
                Ok(Resolved {
                    entry,
                    source: ResolveSource::Computed,
                })
            }
            Err(failure) => {
                AtomicStats::bump(&self.stats.compute_failures);
                warn!(
                    cache_key = %key,
                    provider = key.provider.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = ?failure,
                    "computation failed, nothing cached"
                );
                guard.complete(Err(failure.clone()));
                Err(failure.into())
            }
        }
    }

    /// [`get_or_compute`](Self::get_or_compute) against an [`InferenceProvider`].
    pub async fn get_or_infer(
        &self,
        provider: &dyn InferenceProvider,
        query: &str,
        context: &serde_json::Value,
    ) -> Result<Resolved> {
        self.get_or_compute(query, provider.id(), || provider.infer(query, context))
            .await
    }

    /// Consume one unit of `provider`'s budget if available.
    pub fn check_api_call_limit(&self, provider: &str) -> RateDecision {
        let decision = self.limiter.check(provider.trim());
        if !decision.allowed {
            AtomicStats::bump(&self.stats.rate_limited);
            warn!(
                provider,
                reason = decision.reason.as_deref().unwrap_or_default(),
                "api call limit reached"
            );
        }
        decision
    }

    pub async fn get_cache_stats(&self) -> CacheStats {
        let mut entries = self.store.list().await;
        let total_entries = entries.len();
        entries.sort_by(|a, b| {
            b.hit_count
                .cmp(&a.hit_count)
                .then(b.last_accessed_at.cmp(&a.last_accessed_at))
        });
        entries.truncate(self.settings.stats_top_n);

        let mut stats = CacheStats {
            backend: self.store.backend_name(),
            total_entries,
            top_entries: entries,
            backend_fallbacks: self.store.fallbacks(),
            evictions: self.store.local().evictions(),
            in_flight: self.flights.in_flight(),
            ..Default::default()
        };
        self.stats.fill(&mut stats);
        stats
    }

    /// Remove every entry, or only those whose query contains `pattern`.
    pub async fn clear_cache(&self, pattern: Option<&str>) -> usize {
        let removed = match pattern {
            Some(p) => self.store.delete_matching(p).await,
            None => self.store.clear().await,
        };
        info!(pattern = pattern.unwrap_or("*"), removed, "cache cleared");
        removed
    }

    /// Pre-seed entries for `provider`, bypassing the rate limiter and
    /// coalescing. Entries with an empty query are skipped.
    pub async fn warm_cache(&self, entries: Vec<WarmEntry>, provider: &str) -> usize {
        let offered = entries.len();
        let prepared: Vec<CacheEntry> = entries
            .into_iter()
            .filter_map(|w| {
                let key = self.key(&w.query, provider)?;
                Some(self.build_entry(&key, &w.query, ProviderResponse::new(w.response, w.confidence)))
            })
            .collect();
        let warmed = prepared.len();

        stream::iter(prepared)
            .for_each_concurrent(WARM_CONCURRENCY, |entry| async move {
                self.write(&entry).await;
            })
            .await;

        info!(provider, warmed, skipped = offered - warmed, "cache warmed");
        warmed
    }

    /// Look up many queries at once; the result has the same length and
    /// order as `queries`.
    pub async fn get_batch_cached<Q: AsRef<str>>(
        &self,
        queries: &[Q],
        provider: &str,
    ) -> Vec<Option<CacheEntry>> {
        futures::future::join_all(
            queries
                .iter()
                .map(|q| self.get_cached_response(q.as_ref(), provider)),
        )
        .await
    }

    /// Invalidate one entry.
    pub async fn remove(&self, query: &str, provider: &str) -> bool {
        match self.key(query, provider) {
            Some(key) => self.store.delete(key.as_str()).await,
            None => false,
        }
    }

    /// Live entries in the active store.
    pub async fn len(&self) -> usize {
        self.store.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
