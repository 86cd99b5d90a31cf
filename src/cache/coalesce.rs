//! Single-flight execution per cache key.
//!
//! The first caller for a key becomes the leader and owns the computation;
//! everyone else arriving while it runs follows and receives the same outcome.
//! A flight is bounded by `lock_timeout`: once it is older than that, the next
//! caller replaces it and leads a fresh computation, so a stuck leader can
//! never block a key forever.

use crate::error::{Error, ErrorContext};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Failure shared by a leader and all of its followers.
///
/// [`Error`] is not `Clone`, so flights broadcast this instead and every
/// receiver converts its own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightFailure {
    RateLimited { provider: String, reason: String },
    Compute(String),
    Timeout { after_ms: u64 },
}

impl From<FlightFailure> for Error {
    fn from(f: FlightFailure) -> Self {
        match f {
            FlightFailure::RateLimited { provider, reason } => Error::RateLimited { provider, reason },
            FlightFailure::Compute(message) => Error::compute_with_context(
                message,
                ErrorContext::new().with_source("inference_provider"),
            ),
            FlightFailure::Timeout { after_ms } => Error::ComputeTimeout { after_ms },
        }
    }
}

pub type Outcome<T> = std::result::Result<T, FlightFailure>;

struct Flight<T> {
    id: Uuid,
    acquired_at: Instant,
    rx: watch::Receiver<Option<Outcome<T>>>,
}

struct Inner<T> {
    lock_timeout: Duration,
    flights: Mutex<HashMap<String, Flight<T>>>,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Flight<T>>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `key`'s record only if `id` still owns it.
    fn release(&self, key: &str, id: Uuid) -> bool {
        let mut flights = self.lock();
        if flights.get(key).is_some_and(|f| f.id == id) {
            flights.remove(key);
            true
        } else {
            false
        }
    }
}

pub enum Acquire<T> {
    Leader(FlightGuard<T>),
    Follower(FollowerHandle<T>),
}

pub struct Coalescer<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + Sync + 'static> Coalescer<T> {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                lock_timeout,
                flights: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Atomically join the running flight for `key` or start a new one.
    pub fn acquire(&self, key: &str) -> Acquire<T> {
        let now = Instant::now();
        let mut flights = self.inner.lock();

        if let Some(flight) = flights.get(key) {
            let age = now.saturating_duration_since(flight.acquired_at);
            if age < self.inner.lock_timeout {
                debug!(cache_key = key, leader = %flight.id, "joining in-flight computation");
                return Acquire::Follower(FollowerHandle {
                    rx: flight.rx.clone(),
                    deadline: flight.acquired_at + self.inner.lock_timeout,
                });
            }
            warn!(
                cache_key = key,
                stale_leader = %flight.id,
                age_ms = age.as_millis() as u64,
                "lock timeout elapsed, taking over computation"
            );
        }

        let id = Uuid::new_v4();
        let (tx, rx) = watch::channel(None);
        flights.insert(
            key.to_string(),
            Flight {
                id,
                acquired_at: now,
                rx,
            },
        );
        Acquire::Leader(FlightGuard {
            inner: self.inner.clone(),
            key: key.to_string(),
            id,
            tx,
        })
    }

    /// Number of keys currently being computed.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Leadership of one flight.
///
/// Dropping the guard without calling [`complete`](Self::complete) (the
/// leader panicked or its future was cancelled) removes the record and closes
/// the channel, so followers re-acquire immediately.
pub struct FlightGuard<T> {
    inner: Arc<Inner<T>>,
    key: String,
    id: Uuid,
    tx: watch::Sender<Option<Outcome<T>>>,
}

impl<T> FlightGuard<T> {
    /// Publish the outcome to every follower and end the flight.
    pub fn complete(self, outcome: Outcome<T>) {
        self.tx.send_replace(Some(outcome));
        // record removal happens in Drop
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        if !self.inner.release(&self.key, self.id) {
            debug!(cache_key = self.key.as_str(), leader = %self.id, "flight already replaced");
        }
    }
}

pub struct FollowerHandle<T> {
    rx: watch::Receiver<Option<Outcome<T>>>,
    deadline: Instant,
}

impl<T: Clone> FollowerHandle<T> {
    /// Wait for the leader's outcome until the flight's lock deadline.
    ///
    /// `None` means the leader vanished or the lock expired; the caller should
    /// acquire again.
    pub async fn wait(mut self) -> Option<Outcome<T>> {
        let outcome = match tokio::time::timeout_at(self.deadline, self.rx.wait_for(Option::is_some)).await {
            Ok(Ok(outcome)) => outcome.clone(),
            Ok(Err(_)) | Err(_) => None,
        };
        outcome
    }
}
