//! Circuit breaker guarding the registry dependency.
//!
//! Classic three-state machine. One mutex covers the whole tuple
//! (state, failure count, opened-at) so transitions are atomic. While
//! half-open exactly one probe call is admitted; concurrent callers fail
//! fast with circuit-open instead of queueing behind the probe.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    probe_claimed_at: Option<Instant>,
}

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_in_flight: false,
                probe_claimed_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    /// Gate a call. `Ok(())` admits it (and, in half-open, claims the
    /// single probe slot); `Err(())` means fail fast with circuit-open.
    pub fn preflight(&self) -> Result<(), ()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    inner.probe_claimed_at = Some(Instant::now());
                    Ok(())
                } else {
                    Err(())
                }
            }
            CircuitState::HalfOpen => {
                // A probe whose caller went away (request cancelled
                // mid-call) must not wedge the breaker: its slot is
                // reclaimable after the reset timeout.
                let stale = inner
                    .probe_claimed_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if inner.probe_in_flight && !stale {
                    Err(())
                } else {
                    inner.probe_in_flight = true;
                    inner.probe_claimed_at = Some(Instant::now());
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
                inner.probe_claimed_at = None;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                // The probe failed: reopen with a fresh timer.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                inner.probe_claimed_at = None;
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }
}
