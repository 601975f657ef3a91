use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::ProviderId;

/// Runtime circuit state for one upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker threshold and cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
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

/// Outcome of asking the breaker for permission to call upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Granted,
    /// The single half-open probe; its outcome decides the next state.
    Probe,
    Rejected { retry_at: Option<Instant> },
}

impl Permit {
    pub const fn is_allowed(self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    /// Time until an open circuit admits its probe.
    pub next_attempt_in_ms: Option<u64>,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            last_success_at: None,
            next_attempt_at: None,
            probe_in_flight: false,
        }
    }
}

/// Thread-safe per-source circuit breaker.
///
/// `closed -> open` once `failure_count` reaches the threshold, `open -> half-open`
/// once `now >= next_attempt_at`, `half-open -> closed` on probe success and
/// `half-open -> open` on probe failure. While closed, a success decrements a
/// nonzero failure count by one instead of clearing it.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: ProviderId,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(provider: ProviderId, config: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Non-mutating check: would a call be refused right now?
    pub fn is_rejecting(&self, now: Instant) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => inner.next_attempt_at.is_some_and(|at| now < at),
            CircuitState::HalfOpen => inner.probe_in_flight,
        }
    }

    /// Instant an open circuit becomes eligible for its probe.
    pub fn next_attempt_at(&self) -> Option<Instant> {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open => inner.next_attempt_at,
            CircuitState::Closed | CircuitState::HalfOpen => None,
        }
    }

    pub fn try_acquire(&self, now: Instant) -> Permit {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Permit::Granted,
            CircuitState::Open => match inner.next_attempt_at {
                Some(at) if now < at => Permit::Rejected { retry_at: Some(at) },
                _ => {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(source = %self.provider, "circuit half-open; admitting probe");
                    Permit::Probe
                }
            },
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Permit::Rejected { retry_at: None }
                } else {
                    inner.probe_in_flight = true;
                    Permit::Probe
                }
            }
        }
    }

    pub fn record_success(&self, now: Instant) {
        let mut inner = self.lock();
        inner.last_success_at = Some(now);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.next_attempt_at = None;
                inner.probe_in_flight = false;
                info!(source = %self.provider, "circuit closed after successful probe");
            }
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            // A late success from a call admitted before opening does not close the circuit.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, now: Instant) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.next_attempt_at = Some(now + self.config.cooldown);
                info!(
                    source = %self.provider,
                    failures = inner.failure_count,
                    cooldown_ms = self.config.cooldown.as_millis() as u64,
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.next_attempt_at = Some(now + self.config.cooldown);
                inner.probe_in_flight = false;
                info!(source = %self.provider, "probe failed; circuit re-opened");
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    /// Free the half-open probe slot when the probe ended with an outcome that
    /// says nothing about upstream health (quota deferral, client error).
    pub fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn last_failure_at(&self) -> Option<Instant> {
        self.lock().last_failure_at
    }

    pub fn last_success_at(&self) -> Option<Instant> {
        self.lock().last_success_at
    }

    pub fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        let inner = self.lock();
        let next_attempt_in_ms = match inner.state {
            CircuitState::Open => inner.next_attempt_at.map(|at| {
                u64::try_from(at.saturating_duration_since(now).as_millis()).unwrap_or(u64::MAX)
            }),
            CircuitState::Closed | CircuitState::HalfOpen => None,
        };

        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            next_attempt_in_ms,
        }
    }
}
