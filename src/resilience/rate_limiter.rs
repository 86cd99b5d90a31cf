use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    pub per_minute: u32,
    pub per_hour: u32,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// When false, every check is allowed and no counters are touched.
    pub enabled: bool,
    pub limits: WindowLimits,
    /// Provider-specific limits replacing `limits`.
    pub overrides: HashMap<String, WindowLimits>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limits: WindowLimits::default(),
            overrides: HashMap::new(),
        }
    }
}

impl RateLimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_limits(mut self, limits: WindowLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_provider_limits(mut self, provider: impl Into<String>, limits: WindowLimits) -> Self {
        self.overrides.insert(provider.into(), limits);
        self
    }

    pub fn limits_for(&self, provider: &str) -> WindowLimits {
        self.overrides.get(provider).copied().unwrap_or(self.limits)
    }
}

/// Outcome of a rate check. `reason` is set only on denial and names the
/// exhausted window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl RateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub provider: String,
    pub per_minute_limit: u32,
    pub minute_count: u32,
    pub minute_resets_in_ms: u64,
    pub per_hour_limit: u32,
    pub hour_count: u32,
    pub hour_resets_in_ms: u64,
}

#[derive(Debug)]
struct Window {
    start: Instant,
    length: Duration,
    count: u32,
}

impl Window {
    fn new(now: Instant, length: Duration) -> Self {
        Self {
            start: now,
            length,
            count: 0,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.start) > self.length {
            self.start = now;
            self.count = 0;
        }
    }

    fn resets_in(&self, now: Instant) -> Duration {
        (self.start + self.length).saturating_duration_since(now)
    }
}

#[derive(Debug)]
struct RateCounter {
    minute: Window,
    hour: Window,
}

/// Per-provider call budget with a one-minute and a one-hour window.
///
/// Each provider gets its own counter behind its own mutex; the provider map is
/// only write-locked the first time a provider is seen. `check` never sleeps or
/// waits on I/O.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    counters: RwLock<HashMap<String, Arc<Mutex<RateCounter>>>>,
}

fn lock_counter(c: &Mutex<RateCounter>) -> MutexGuard<'_, RateCounter> {
    c.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        Self {
            cfg,
            counters: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    fn counter(&self, provider: &str) -> Arc<Mutex<RateCounter>> {
        if let Some(c) = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
        {
            return c.clone();
        }
        let now = Instant::now();
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(RateCounter {
                    minute: Window::new(now, MINUTE),
                    hour: Window::new(now, HOUR),
                }))
            })
            .clone()
    }

    /// Check-and-increment in one critical section. A denied call does not
    /// consume budget.
    pub fn check(&self, provider: &str) -> RateDecision {
        if !self.cfg.enabled {
            return RateDecision::allow();
        }
        let limits = self.cfg.limits_for(provider);
        let counter = self.counter(provider);
        let mut c = lock_counter(&counter);
        let now = Instant::now();
        c.minute.roll(now);
        c.hour.roll(now);

        if c.minute.count >= limits.per_minute {
            return RateDecision::deny(format!(
                "per-minute limit of {} calls reached for provider '{}'; minute window resets in {}s",
                limits.per_minute,
                provider,
                c.minute.resets_in(now).as_secs()
            ));
        }
        if c.hour.count >= limits.per_hour {
            return RateDecision::deny(format!(
                "per-hour limit of {} calls reached for provider '{}'; hour window resets in {}s",
                limits.per_hour,
                provider,
                c.hour.resets_in(now).as_secs()
            ));
        }
        c.minute.count += 1;
        c.hour.count += 1;
        RateDecision::allow()
    }

    /// Current counters for a provider that has been checked at least once.
    pub fn snapshot(&self, provider: &str) -> Option<RateLimiterSnapshot> {
        let counter = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned()?;
        let limits = self.cfg.limits_for(provider);
        let mut c = lock_counter(&counter);
        let now = Instant::now();
        c.minute.roll(now);
        c.hour.roll(now);
        Some(RateLimiterSnapshot {
            provider: provider.to_string(),
            per_minute_limit: limits.per_minute,
            minute_count: c.minute.count,
            minute_resets_in_ms: c.minute.resets_in(now).as_millis() as u64,
            per_hour_limit: limits.per_hour,
            hour_count: c.hour.count,
            hour_resets_in_ms: c.hour.resets_in(now).as_millis() as u64,
        })
    }

    /// Providers seen so far.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn reset(&self) {
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
