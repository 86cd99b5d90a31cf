//! 弹性模式模块：为推理调用提供限流与远端存储熔断。
//!
//! # Resilience Primitives Module
//!
//! Guards used by the cache façade to keep inference providers and the
//! remote store from being overwhelmed.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Per-provider minute/hour call budget |
//! | [`circuit_breaker`] | Consecutive-failure breaker for the remote store |
//!
//! ## Rate Limiter
//!
//! Each provider owns a counter with a one-minute and a one-hour window.
//! A check increments both windows or denies without consuming budget:
//!
//! ```rust
//! use ai_lib_cache::resilience::rate_limiter::{RateLimiter, RateLimiterConfig, WindowLimits};
//!
//! let limiter = RateLimiter::new(RateLimiterConfig::new().with_limits(WindowLimits {
//!     per_minute: 2,
//!     per_hour: 100,
//! }));
//! assert!(limiter.check("openai").allowed);
//! assert!(limiter.check("openai").allowed);
//! let denied = limiter.check("openai");
//! assert!(!denied.allowed);
//! assert!(denied.reason.unwrap().contains("minute"));
//! ```
//!
//! ## Circuit Breaker
//!
//! - **Closed**: remote calls pass through
//! - **Open**: after `failure_threshold` consecutive failures the remote is skipped
//! - **Half-Open**: once the cooldown elapses one probe call is allowed
//!
//! ```rust
//! use ai_lib_cache::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_cooldown(Duration::from_secs(30)),
//! );
//! if breaker.allow() {
//!     // call the remote store...
//!     breaker.on_success();
//! }
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;
