//! Cached entries and the provider response they are built from.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Entries carry wall-clock timestamps rather than `Instant`s so the same
/// record can live in a network store shared by several processes.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What an inference provider hands back for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: serde_json::Value,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ProviderResponse {
    pub fn new(content: impl Into<serde_json::Value>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            confidence,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A known `(query, response, confidence)` triple used to pre-seed the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmEntry {
    pub query: String,
    pub response: serde_json::Value,
    #[serde(default = "default_warm_confidence")]
    pub confidence: f64,
}

fn default_warm_confidence() -> f64 {
    1.0
}

impl WarmEntry {
    pub fn new(
        query: impl Into<String>,
        response: impl Into<serde_json::Value>,
        confidence: f64,
    ) -> Self {
        Self {
            query: query.into(),
            response: response.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub query: String,
    pub provider: String,
    pub response: serde_json::Value,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub ttl_seconds: u64,
    pub created_at: u64,
    pub expires_at: u64,
    /// Starts at 1: the write that populates an entry counts as its first observation.
    pub hit_count: u64,
    pub last_accessed_at: u64,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        query: impl Into<String>,
        provider: impl Into<String>,
        response: serde_json::Value,
        confidence: f64,
        ttl_seconds: u64,
    ) -> Self {
        let now = now_millis();
        Self {
            key: key.into(),
            query: query.into(),
            provider: provider.into(),
            response,
            confidence: clamp_confidence(confidence),
            metadata: serde_json::Value::Null,
            ttl_seconds,
            created_at: now,
            expires_at: now.saturating_add(ttl_seconds.saturating_mul(1000)),
            hit_count: 1,
            last_accessed_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Remaining lifetime in whole seconds, rounded up; 0 once expired.
    pub fn remaining_ttl_secs(&self) -> u64 {
        let now = now_millis();
        if self.is_expired_at(now) {
            0
        } else {
            (self.expires_at - now).div_ceil(1000)
        }
    }

    /// Record one observation of this entry.
    pub fn record_hit(&mut self) {
        self.hit_count = self.hit_count.saturating_add(1);
        self.last_accessed_at = now_millis();
    }
}

/// Confidence outside `[0, 1]` is clamped; NaN counts as no confidence at all.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}
