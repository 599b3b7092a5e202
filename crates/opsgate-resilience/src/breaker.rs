//! Per-backend circuit breaker
//!
//! Three states:
//! - Closed: calls pass; consecutive retriable failures are counted
//! - Open: calls fail fast until the cool-down elapses
//! - HalfOpen: exactly one probe call is in flight; its outcome decides
//!   whether the circuit closes or reopens
//!
//! Every admitted call holds a [`BreakerPermit`] and reports its outcome
//! through it. A probe permit dropped without an outcome (the caller was
//! cancelled) puts the breaker back to open with the cool-down already
//! elapsed, so the next caller becomes the probe.

use std::sync::Arc;
use std::time::Duration;

use opsgate_core::BackendId;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Observable circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Health view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub backend: BackendId,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Time since the last retriable failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_ago_ms: Option<u64>,
    /// Remaining cool-down while open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    backend: BackendId,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(backend: BackendId, failure_threshold: u32, cooldown: Duration) -> Self {
        debug!(
            backend = %backend,
            failure_threshold,
            cooldown_ms = cooldown.as_millis() as u64,
            "Circuit breaker initialized"
        );
        Self {
            backend,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }

    pub fn state(&self) -> CircuitState {
        match self.inner.lock().state {
            State::Closed => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Ask to make a call. On refusal returns how long the caller should
    /// wait before trying again.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, Duration> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let state = inner.state;
        let probe = match state {
            State::Closed => false,
            State::Open { until } if now >= until => {
                inner.state = State::HalfOpen;
                info!(backend = %self.backend, "Circuit breaker half-open (admitting probe)");
                true
            }
            State::Open { until } => return Err(until.saturating_duration_since(now)),
            // A probe is already in flight; its failure would restart the cool-down
            State::HalfOpen => return Err(self.cooldown),
        };
        Ok(BreakerPermit {
            breaker: Arc::clone(self),
            probe,
            settled: false,
        })
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let inner = self.inner.lock();
        let (state, retry_after) = match inner.state {
            State::Closed => (CircuitState::Closed, None),
            State::Open { until } => (
                CircuitState::Open,
                Some(until.saturating_duration_since(now).as_millis() as u64),
            ),
            State::HalfOpen => (CircuitState::HalfOpen, None),
        };
        BreakerSnapshot {
            backend: self.backend,
            state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_ago_ms: inner
                .last_failure
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            retry_after_ms: retry_after,
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            State::HalfOpen if probe => {
                inner.state = State::Closed;
                inner.consecutive_failures = 0;
                info!(backend = %self.backend, "Circuit breaker closed (recovered)");
            }
            State::Closed => inner.consecutive_failures = 0,
            // Late result of a call admitted before the circuit opened
            _ => {}
        }
    }

    /// Returns whether the circuit is open afterwards
    fn on_failure(&self, probe: bool) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.last_failure = Some(now);
        let state = inner.state;
        match state {
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = State::Open {
                        until: now + self.cooldown,
                    };
                    warn!(
                        backend = %self.backend,
                        consecutive_failures = inner.consecutive_failures,
                        cooldown_ms = self.cooldown.as_millis() as u64,
                        "Circuit breaker opened (failing fast)"
                    );
                }
            }
            State::HalfOpen if probe => {
                inner.consecutive_failures += 1;
                inner.state = State::Open {
                    until: now + self.cooldown,
                };
                warn!(backend = %self.backend, "Probe failed, circuit breaker reopened");
            }
            _ => {}
        }
        matches!(inner.state, State::Open { .. })
    }

    fn on_abandoned(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, State::HalfOpen) {
            inner.state = State::Open {
                until: Instant::now(),
            };
            debug!(backend = %self.backend, "Probe abandoned, circuit breaker open for next probe");
        }
    }
}

/// Admission ticket for one call
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this call is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// The backend was reached and behaved
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    /// The call failed in a way that suggests the backend is unhealthy.
    ///
    /// Returns true when the circuit is open once the failure is recorded.
    pub fn failure(mut self) -> bool {
        self.settled = true;
        self.breaker.on_failure(self.probe)
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.on_abandoned();
        }
    }
}
