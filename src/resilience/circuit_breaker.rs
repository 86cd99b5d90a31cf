use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    /// Times the breaker has opened since construction.
    pub trips: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "crate::config::duration_ms")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug)]
struct State {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    trips: u64,
}

/// Consecutive-failure breaker in front of the network-backed store.
///
/// - Counts consecutive failures (errors and deadline misses alike)
/// - Opens for a cooldown after the threshold; while open the remote is skipped
/// - After the cooldown the next call is let through as a probe
/// - A threshold of 0 disables the breaker
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                consecutive_failures: 0,
                open_until: None,
                trips: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn allow(&self) -> bool {
        let mut st = self.lock();
        if let Some(until) = st.open_until {
            if Instant::now() < until {
                return false;
            }
            // cooldown expired; half-open probe
            st.open_until = None;
            st.consecutive_failures = self.cfg.failure_threshold.saturating_sub(1);
        }
        true
    }

    pub fn on_success(&self) {
        let mut st = self.lock();
        st.consecutive_failures = 0;
        st.open_until = None;
    }

    /// Returns `true` when this failure opened the breaker.
    pub fn on_failure(&self) -> bool {
        if self.cfg.failure_threshold == 0 {
            return false;
        }
        let mut st = self.lock();
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        if st.open_until.is_none() && st.consecutive_failures >= self.cfg.failure_threshold {
            st.open_until = Some(Instant::now() + self.cfg.cooldown);
            st.trips += 1;
            return true;
        }
        false
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let st = self.lock();
        let open_remaining_ms = st.open_until.and_then(|until| {
            if until > now {
                Some((until - now).as_millis() as u64)
            } else {
                None
            }
        });
        CircuitBreakerSnapshot {
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            open_remaining_ms,
            trips: st.trips,
        }
    }
}
