//! Cache runtime configuration.
//!
//! Settings are resolved in three layers: [`CacheSettings::default()`], an
//! optional YAML document ([`CacheSettings::from_yaml_str`] /
//! [`CacheSettings::from_file`]), then environment overrides
//! ([`CacheSettings::apply_env`]).
//!
//! ```yaml
//! enableMockMode: false
//! redisUrl: redis://127.0.0.1:6379
//! defaultTTL: 3600
//! maxCacheSize: 1000
//! preventExcessiveAPICalls: true
//! apiCallLimit:
//!   perMinute: 60
//!   perHour: 1000
//! lockTimeout: 10000
//! evictionPolicy: LRU
//! providers:
//!   openai:
//!     baseTTL: 7200
//!     minTTL: 600
//!     maxTTL: 14400
//!   local:
//!     baseTTL: 900
//!     perMinute: 600
//! ```

use crate::cache::ttl::{ProviderTtl, TtlPolicy};
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::rate_limiter::{RateLimiterConfig, WindowLimits};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Serialize a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    #[default]
    #[serde(rename = "LRU", alias = "lru")]
    Lru,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiCallLimit {
    pub per_minute: u32,
    pub per_hour: u32,
}

impl Default for ApiCallLimit {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1000,
        }
    }
}

/// Per-provider TTL and rate-limit overrides. Unset fields inherit the global value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(rename = "baseTTL", skip_serializing_if = "Option::is_none")]
    pub base_ttl: Option<u64>,
    #[serde(rename = "minTTL", skip_serializing_if = "Option::is_none")]
    pub min_ttl: Option<u64>,
    #[serde(rename = "maxTTL", skip_serializing_if = "Option::is_none")]
    pub max_ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_hour: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheSettings {
    /// Use the in-process store only; no network backend is wired in.
    pub enable_mock_mode: bool,
    /// Seconds; TTL base for providers without their own policy.
    #[serde(rename = "defaultTTL", alias = "defaultTtl")]
    pub default_ttl: u64,
    pub max_cache_size: usize,
    #[serde(rename = "preventExcessiveAPICalls", alias = "preventExcessiveApiCalls")]
    pub prevent_excessive_api_calls: bool,
    #[serde(rename = "apiCallLimit")]
    pub api_call_limit: ApiCallLimit,
    #[serde(with = "duration_ms")]
    pub lock_timeout: Duration,
    pub eviction_policy: EvictionPolicy,
    #[serde(with = "duration_ms")]
    pub compute_timeout: Duration,
    /// Deadline for each network-store round trip.
    #[serde(with = "duration_ms")]
    pub backend_timeout: Duration,
    pub stats_top_n: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    pub breaker: CircuitBreakerConfig,
    pub providers: HashMap<String, ProviderSettings>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enable_mock_mode: true,
            default_ttl: 3600,
            max_cache_size: 1000,
            prevent_excessive_api_calls: true,
            api_call_limit: ApiCallLimit::default(),
            lock_timeout: Duration::from_secs(10),
            eviction_policy: EvictionPolicy::Lru,
            compute_timeout: Duration::from_secs(30),
            backend_timeout: Duration::from_millis(250),
            stats_top_n: 10,
            key_prefix: None,
            redis_url: None,
            breaker: CircuitBreakerConfig::default(),
            providers: HashMap::new(),
        }
    }
}

fn settings_error(msg: impl Into<String>, field: &str) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("settings"),
    )
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Result<Option<T>> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| settings_error(format!("cannot parse value {raw:?}"), var)),
        Err(_) => Ok(None),
    }
}

impl CacheSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Overlay environment variables:
    /// - `AI_CACHE_MOCK_MODE` (`true`/`false`)
    /// - `AI_CACHE_REDIS_URL` (also turns mock mode off)
    /// - `AI_CACHE_MAX_SIZE`
    /// - `AI_CACHE_DEFAULT_TTL_SECS`
    /// - `AI_CACHE_LOCK_TIMEOUT_MS`
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var("AI_CACHE_REDIS_URL") {
            if !url.trim().is_empty() {
                self.redis_url = Some(url.trim().to_string());
                self.enable_mock_mode = false;
            }
        }
        if let Some(mock) = parse_env::<bool>("AI_CACHE_MOCK_MODE")? {
            self.enable_mock_mode = mock;
        }
        if let Some(n) = parse_env::<usize>("AI_CACHE_MAX_SIZE")? {
            self.max_cache_size = n;
        }
        if let Some(secs) = parse_env::<u64>("AI_CACHE_DEFAULT_TTL_SECS")? {
            self.default_ttl = secs;
        }
        if let Some(ms) = parse_env::<u64>("AI_CACHE_LOCK_TIMEOUT_MS")? {
            self.lock_timeout = Duration::from_millis(ms);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cache_size == 0 {
            return Err(settings_error("must be greater than 0", "maxCacheSize"));
        }
        if self.default_ttl == 0 {
            return Err(settings_error("must be greater than 0", "defaultTTL"));
        }
        if self.prevent_excessive_api_calls {
            if self.api_call_limit.per_minute == 0 {
                return Err(settings_error(
                    "must be greater than 0 while rate limiting is enabled",
                    "apiCallLimit.perMinute",
                ));
            }
            if self.api_call_limit.per_hour == 0 {
                return Err(settings_error(
                    "must be greater than 0 while rate limiting is enabled",
                    "apiCallLimit.perHour",
                ));
            }
        }
        for (name, value) in [
            ("lockTimeout", self.lock_timeout),
            ("computeTimeout", self.compute_timeout),
            ("backendTimeout", self.backend_timeout),
        ] {
            if value.is_zero() {
                return Err(settings_error("must be greater than 0", name));
            }
        }
        for (provider, p) in &self.providers {
            let ttl = self.provider_ttl(p);
            if ttl.min > ttl.max {
                return Err(Error::configuration_with_context(
                    format!("minTTL {} exceeds maxTTL {}", ttl.min, ttl.max),
                    ErrorContext::new()
                        .with_field_path(format!("providers.{provider}"))
                        .with_source("settings"),
                ));
            }
        }
        Ok(())
    }

    fn provider_ttl(&self, p: &ProviderSettings) -> ProviderTtl {
        let fallback = ProviderTtl::from_default(self.default_ttl);
        let base = p.base_ttl.unwrap_or(fallback.base);
        ProviderTtl {
            base,
            min: p.min_ttl.unwrap_or(base / 2),
            max: p.max_ttl.unwrap_or(base),
        }
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        let mut policy = TtlPolicy::new(self.default_ttl);
        for (provider, p) in &self.providers {
            if p.base_ttl.is_some() || p.min_ttl.is_some() || p.max_ttl.is_some() {
                policy = policy.with_provider(provider.clone(), self.provider_ttl(p));
            }
        }
        policy
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        let mut cfg = RateLimiterConfig::new()
            .with_enabled(self.prevent_excessive_api_calls)
            .with_limits(WindowLimits {
                per_minute: self.api_call_limit.per_minute,
                per_hour: self.api_call_limit.per_hour,
            });
        for (provider, p) in &self.providers {
            if p.per_minute.is_some() || p.per_hour.is_some() {
                cfg = cfg.with_provider_limits(
                    provider.clone(),
                    WindowLimits {
                        per_minute: p.per_minute.unwrap_or(self.api_call_limit.per_minute),
                        per_hour: p.per_hour.unwrap_or(self.api_call_limit.per_hour),
                    },
                );
            }
        }
        cfg
    }

    pub fn with_mock_mode(mut self, enable: bool) -> Self {
        self.enable_mock_mode = enable;
        self
    }

    pub fn with_default_ttl(mut self, secs: u64) -> Self {
        self.default_ttl = secs;
        self
    }

    pub fn with_max_cache_size(mut self, n: usize) -> Self {
        self.max_cache_size = n;
        self
    }

    pub fn with_rate_limiting(mut self, enable: bool) -> Self {
        self.prevent_excessive_api_calls = enable;
        self
    }

    pub fn with_api_call_limit(mut self, per_minute: u32, per_hour: u32) -> Self {
        self.api_call_limit = ApiCallLimit {
            per_minute,
            per_hour,
        };
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_compute_timeout(mut self, timeout: Duration) -> Self {
        self.compute_timeout = timeout;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_stats_top_n(mut self, n: usize) -> Self {
        self.stats_top_n = n;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>, settings: ProviderSettings) -> Self {
        self.providers.insert(provider.into(), settings);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let s = CacheSettings::default();
        assert!(s.validate().is_ok());
        assert!(s.enable_mock_mode);
        assert_eq!(s.eviction_policy, EvictionPolicy::Lru);
        assert_eq!(s.api_call_limit.per_minute, 60);
    }

    #[test]
    fn test_yaml_uses_dashboard_option_names() {
        let yaml = r#"
enableMockMode: false
defaultTTL: 1800
maxCacheSize: 50
preventExcessiveAPICalls: true
apiCallLimit:
  perMinute: 5
  perHour: 100
lockTimeout: 2500
evictionPolicy: LRU
computeTimeout: 15000
redisUrl: redis://cache:6379
providers:
  openai:
    baseTTL: 7200
    minTTL: 600
    maxTTL: 14400
  local:
    perMinute: 500
"#;
        let s = CacheSettings::from_yaml_str(yaml).unwrap();
        assert!(!s.enable_mock_mode);
        assert_eq!(s.default_ttl, 1800);
        assert_eq!(s.max_cache_size, 50);
        assert_eq!(s.api_call_limit.per_hour, 100);
        assert_eq!(s.lock_timeout, Duration::from_millis(2500));
        assert_eq!(s.compute_timeout, Duration::from_secs(15));
        assert_eq!(s.redis_url.as_deref(), Some("redis://cache:6379"));
        // Unset fields keep their defaults.
        assert_eq!(s.backend_timeout, Duration::from_millis(250));

        let policy = s.ttl_policy();
        assert_eq!(policy.compute("openai", 1.0), 7200);
        assert_eq!(policy.compute("local", 1.0), 1800);

        let limits = s.rate_limiter_config();
        assert_eq!(limits.limits_for("local").per_minute, 500);
        assert_eq!(limits.limits_for("local").per_hour, 100);
        assert_eq!(limits.limits_for("openai").per_minute, 5);
    }

    #[test]
    fn test_unknown_eviction_policy_rejected() {
        assert!(CacheSettings::from_yaml_str("evictionPolicy: FIFO").is_err());
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let err = CacheSettings::new()
            .with_max_cache_size(0)
            .validate()
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("maxCacheSize")
        );
    }

    #[test]
    fn test_zero_limits_allowed_when_limiting_disabled() {
        let s = CacheSettings::new()
            .with_rate_limiting(false)
            .with_api_call_limit(0, 0);
        assert!(s.validate().is_ok());
        assert!(CacheSettings::new().with_api_call_limit(0, 10).validate().is_err());
    }

    #[test]
    fn test_inverted_provider_ttl_rejected() {
        let s = CacheSettings::new().with_provider(
            "openai",
            ProviderSettings {
                min_ttl: Some(500),
                max_ttl: Some(100),
                ..Default::default()
            },
        );
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("providers.openai"));
    }

    #[test]
    fn test_provider_ttl_inherits_from_base() {
        let s = CacheSettings::new().with_provider(
            "fast",
            ProviderSettings {
                base_ttl: Some(600),
                ..Default::default()
            },
        );
        let policy = s.ttl_policy();
        assert_eq!(policy.compute("fast", 0.0), 300);
        assert_eq!(policy.compute("fast", 1.0), 600);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("AI_CACHE_MAX_SIZE", "42");
        std::env::set_var("AI_CACHE_LOCK_TIMEOUT_MS", "1500");
        let s = CacheSettings::new().apply_env().unwrap();
        std::env::remove_var("AI_CACHE_MAX_SIZE");
        std::env::remove_var("AI_CACHE_LOCK_TIMEOUT_MS");
        assert_eq!(s.max_cache_size, 42);
        assert_eq!(s.lock_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_settings_yaml_roundtrip() {
        let s = CacheSettings::new()
            .with_key_prefix("staging")
            .with_provider(
                "openai",
                ProviderSettings {
                    base_ttl: Some(7200),
                    ..Default::default()
                },
            );
        let yaml = serde_yaml::to_string(&s).unwrap();
        assert!(yaml.contains("defaultTTL"));
        let back = CacheSettings::from_yaml_str(&yaml).unwrap();
        assert_eq!(back, s);
    }
}
