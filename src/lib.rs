//! # ai-lib-cache
//!
//! 面向 AI 推理服务的响应缓存：请求合并、调用限流与存储降级。
//!
//! Response cache and call-budget guard placed in front of pluggable inference
//! providers.
//!
//! ## Overview
//!
//! Inference calls are slow and billed per call. This crate sits in front of
//! them and:
//!
//! - answers repeated questions from a cache keyed by `(provider, query)`
//! - collapses concurrent misses for the same key into one computation
//! - enforces per-provider minute and hour call budgets
//! - keeps serving from an in-process store when the shared network store is
//!   down
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_lib_cache::{CacheManager, CacheSettings, ProviderResponse};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> ai_lib_cache::Result<()> {
//!     let settings = CacheSettings::from_file("cache.yaml")?.apply_env()?;
//!     let cache = CacheManager::new(settings)?;
//!
//!     let resolved = cache
//!         .get_or_compute("Summarize RFC 9110", "openai", || async {
//!             // call the provider here
//!             Ok::<_, std::io::Error>(ProviderResponse::new(json!("..."), 0.8))
//!         })
//!         .await?;
//!     println!("served via {:?}", resolved.source);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Keys, stores, TTL policy, coalescing and the [`CacheManager`] façade |
//! | [`resilience`] | Rate limiter and the remote-store circuit breaker |
//! | [`config`] | [`CacheSettings`]: defaults, YAML and environment overrides |
//! | [`error`] | Crate-wide [`Error`] type |

pub mod cache;
pub mod config;
pub mod resilience;

pub use cache::{
    CacheEntry, CacheManager, CacheStats, InferenceProvider, ProviderResponse, ResolveSource,
    Resolved, WarmEntry,
};
pub use config::CacheSettings;
pub use resilience::rate_limiter::RateDecision;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
