//! Confidence-scaled time-to-live.

use super::entry::clamp_confidence;
use std::collections::HashMap;

/// TTL bounds for one provider, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderTtl {
    pub base: u64,
    pub min: u64,
    pub max: u64,
}

impl ProviderTtl {
    pub fn new(base: u64, min: u64, max: u64) -> Self {
        Self { base, min, max }
    }

    /// Bounds used for providers without an explicit policy.
    pub fn from_default(default_ttl: u64) -> Self {
        Self {
            base: default_ttl,
            min: default_ttl / 2,
            max: default_ttl,
        }
    }
}

/// `ttl = clamp(base * (0.5 + 0.5 * confidence), min, max)`.
///
/// For a fixed provider the result is non-decreasing in confidence, so an
/// answer the provider was sure about outlives one it hedged on. Providers
/// whose answers are stable get a longer `base` than fast, cheap ones.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default: ProviderTtl,
    providers: HashMap<String, ProviderTtl>,
}

impl TtlPolicy {
    pub fn new(default_ttl: u64) -> Self {
        Self {
            default: ProviderTtl::from_default(default_ttl),
            providers: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>, ttl: ProviderTtl) -> Self {
        self.providers.insert(provider.into(), ttl);
        self
    }

    pub fn bounds_for(&self, provider: &str) -> ProviderTtl {
        self.providers.get(provider).copied().unwrap_or(self.default)
    }

    pub fn compute(&self, provider: &str, confidence: f64) -> u64 {
        let b = self.bounds_for(provider);
        let scaled = (b.base as f64 * (0.5 + 0.5 * clamp_confidence(confidence))).round() as u64;
        // Inverted bounds resolve to `min` rather than panicking like `clamp`.
        scaled.max(b.min).min(b.max.max(b.min))
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TtlPolicy {
        TtlPolicy::new(3600)
            .with_provider("accurate", ProviderTtl::new(7200, 1800, 7200))
            .with_provider("fast", ProviderTtl::new(600, 120, 900))
    }

    #[test]
    fn test_formula_and_bounds() {
        let p = policy();
        assert_eq!(p.compute("accurate", 1.0), 7200);
        assert_eq!(p.compute("accurate", 0.5), 5400);
        assert_eq!(p.compute("accurate", 0.0), 3600);
        assert_eq!(p.compute("fast", 1.0), 600);
        assert_eq!(p.compute("fast", 0.0), 300);
    }

    #[test]
    fn test_unknown_provider_uses_default() {
        let p = policy();
        assert_eq!(p.bounds_for("other"), ProviderTtl::new(3600, 1800, 3600));
        assert_eq!(p.compute("other", 1.0), 3600);
        assert_eq!(p.compute("other", 0.0), 1800);
    }

    #[test]
    fn test_min_and_max_clamp() {
        let p = TtlPolicy::new(60).with_provider("tight", ProviderTtl::new(1000, 800, 900));
        assert_eq!(p.compute("tight", 0.0), 800);
        assert_eq!(p.compute("tight", 1.0), 900);
    }

    #[test]
    fn test_non_decreasing_in_confidence() {
        let p = policy();
        for provider in ["accurate", "fast", "other"] {
            let mut prev = 0;
            for step in 0..=20 {
                let ttl = p.compute(provider, step as f64 / 20.0);
                assert!(ttl >= prev, "{provider}: {ttl} < {prev} at step {step}");
                prev = ttl;
            }
        }
        assert!(p.compute("accurate", 0.9) >= p.compute("accurate", 0.5));
    }

    #[test]
    fn test_out_of_range_confidence() {
        let p = policy();
        assert_eq!(p.compute("accurate", 7.0), p.compute("accurate", 1.0));
        assert_eq!(p.compute("accurate", f64::NAN), p.compute("accurate", 0.0));
    }

    #[test]
    fn test_inverted_bounds_do_not_panic() {
        let p = TtlPolicy::new(60).with_provider("odd", ProviderTtl::new(100, 500, 10));
        assert_eq!(p.compute("odd", 1.0), 500);
    }
}
