//! Per-service circuit breaker.
//!
//! Closed → open after 5 consecutive failures; open → half-open after a 30 s
//! cooldown; half-open → closed after 2 probe successes, or straight back to
//! open on any probe failure. Keeps a failing biometric verifier or ledger
//! from dragging the request path down with it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const FAILURE_THRESHOLD: u32 = 5;
const COOLDOWN: Duration = Duration::from_secs(30);
const PROBE_SUCCESSES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
}

/// Cheap-to-clone breaker handle; one per external service.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                opened_at: None,
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// May a call proceed right now? Transitions open → half-open when the
    /// cooldown has elapsed.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|t| t.elapsed() >= COOLDOWN)
                    .unwrap_or(true);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_successes = 0;
                    tracing::info!(service = self.name, "circuit half-open, probing");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.probe_successes += 1;
                if inner.probe_successes >= PROBE_SUCCESSES {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    tracing::info!(service = self.name, "circuit closed");
                }
            }
            _ => {
                inner.consecutive_failures = 0;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!(service = self.name, "probe failed, circuit re-opened");
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= FAILURE_THRESHOLD {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(service = self.name, "circuit opened");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    #[cfg(test)]
    fn force_cooldown_elapsed(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.opened_at = Some(Instant::now() - COOLDOWN);
    }
}
