//! Circuit breaker guarding the sink
//!
//! The breaker protects application code from a failing sink. After
//! `max_failures` failures it opens and every emission is skipped until the
//! recovery timeout has passed; the next [`CircuitBreaker::allow`] then moves
//! it to half-open and lets a probe through. The probe's outcome closes or
//! re-opens the circuit.

use crate::config::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change made by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
    pub next_retry_at: Option<Instant>,
}

/// Failure-counting breaker shared by every sink call of an instance
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    recovery_timeout: Duration,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            max_failures: config.max_failures.max(1),
            recovery_timeout: config.recovery_timeout(),
            state: Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                next_retry_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        crate::lock(&self.state).state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        crate::lock(&self.state).clone()
    }

    pub fn allow(&self) -> (bool, Option<Transition>) {
        self.allow_at(Instant::now())
    }

    /// Decide whether an emission may be attempted at `now`
    ///
    /// An open circuit whose retry time has passed moves to half-open and
    /// allows exactly one probe. Further calls are rejected until the probe
    /// is resolved, or until another recovery timeout passes without an
    /// outcome being recorded.
    pub fn allow_at(&self, now: Instant) -> (bool, Option<Transition>) {
        let mut guard = crate::lock(&self.state);
        let retry_due = guard.next_retry_at.is_none_or(|retry_at| now >= retry_at);

        match guard.state {
            CircuitState::Closed => (true, None),
            CircuitState::HalfOpen if retry_due => {
                guard.next_retry_at = Some(now + self.recovery_timeout);
                (true, None)
            }
            CircuitState::Open if retry_due => {
                guard.state = CircuitState::HalfOpen;
                guard.next_retry_at = Some(now + self.recovery_timeout);
                info!(circuit = %self.name, "Circuit transitioned to HalfOpen");
                (
                    true,
                    Some(Transition {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    }),
                )
            }
            CircuitState::HalfOpen | CircuitState::Open => (false, None),
        }
    }

    /// Record a successful delivery
    ///
    /// A late success while the circuit is open changes nothing; only the
    /// half-open probe can close it.
    pub fn record_success(&self) -> Option<Transition> {
        let mut guard = crate::lock(&self.state);
        match guard.state {
            CircuitState::Closed => {
                guard.failure_count = 0;
                None
            }
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                guard.failure_count = 0;
                guard.state = CircuitState::Closed;
                guard.next_retry_at = None;
                info!(circuit = %self.name, "Circuit closed");
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Closed,
                })
            }
        }
    }

    pub fn record_failure(&self) -> Option<Transition> {
        self.record_failure_at(Instant::now())
    }

    /// Record a failed emission or delivery at `now`
    ///
    /// Failures reported while the circuit is already open (a call that was
    /// in flight when it tripped) leave the retry time where it is.
    pub fn record_failure_at(&self, now: Instant) -> Option<Transition> {
        let mut guard = crate::lock(&self.state);
        let from = guard.state;
        guard.last_failure_at = Some(now);

        match from {
            CircuitState::Open => return None,
            CircuitState::HalfOpen => {
                // The probe failed: re-open with the count at the trip threshold
                guard.failure_count = self.max_failures;
            }
            CircuitState::Closed => guard.failure_count = guard.failure_count.saturating_add(1),
        }

        if guard.failure_count < self.max_failures {
            return None;
        }

        guard.next_retry_at = Some(now + self.recovery_timeout);
        guard.state = CircuitState::Open;
        warn!(
            circuit = %self.name,
            failure_count = guard.failure_count,
            recovery_timeout_ms = self.recovery_timeout.as_millis() as u64,
            "Circuit opened"
        );
        Some(Transition {
            from,
            to: CircuitState::Open,
        })
    }
}
