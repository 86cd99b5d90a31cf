//! 响应缓存模块：在推理服务前提供缓存、请求合并与降级存储。
//!
//! # Response Caching Module
//!
//! A response cache placed in front of inference providers. Identical
//! questions are answered from the store, concurrent misses for the same key
//! share one computation, and a network store outage degrades silently to the
//! in-process store.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheManager`] | Façade: lookup, store, get-or-compute, warm, clear, stats |
//! | [`CacheKeyGenerator`] | SHA-256 keys from `(provider, query)` |
//! | [`CacheBackend`] | Fallible store contract |
//! | [`MemoryCache`] | Bounded in-process LRU store with lazy expiry |
//! | `RedisCache` | Network store (feature `redis`) |
//! | [`FallbackStore`] | Remote-first store with per-operation local fallback |
//! | [`TtlPolicy`] | Confidence-scaled TTL per provider |
//! | [`Coalescer`] | Single-flight execution per key |
//!
//! ## Example
//!
//! ```rust,no_run
//! use ai_lib_cache::cache::{CacheManager, ProviderResponse};
//! use ai_lib_cache::config::CacheSettings;
//! use serde_json::json;
//!
//! # async fn run() -> ai_lib_cache::Result<()> {
//! let cache = CacheManager::new(CacheSettings::default())?;
//! let resolved = cache
//!     .get_or_compute("capital of France?", "openai", || async {
//!         Ok::<_, std::io::Error>(ProviderResponse::new(json!("Paris"), 0.95))
//!     })
//!     .await?;
//! println!("{} ({:?})", resolved.entry.response, resolved.source);
//! # Ok(())
//! # }
//! ```
//!
//! ## Hit counting
//!
//! A write creates the entry with `hit_count = 1`. A lookup returns the entry
//! as observed and then records the access, so the first read after a write
//! reports 1 and the second reports 2.

mod backend;
pub mod coalesce;
mod entry;
mod key;
mod manager;
#[cfg(feature = "redis")]
mod redis;
mod store;
pub mod ttl;

pub use backend::{CacheBackend, MemoryCache};
pub use coalesce::{Acquire, Coalescer, FlightFailure, FlightGuard, FollowerHandle};
pub use entry::{clamp_confidence, now_millis, CacheEntry, ProviderResponse, WarmEntry};
pub use key::{CacheKey, CacheKeyGenerator};
pub use manager::{CacheManager, CacheStats, InferenceProvider, ResolveSource, Resolved};
#[cfg(feature = "redis")]
pub use self::redis::{RedisCache, RedisCacheConfig};
pub use store::FallbackStore;
pub use ttl::{ProviderTtl, TtlPolicy};
