//! Circuit breaker guarding the discovery endpoint.
//!
//! Tracks consecutive failures against the ingestion service and fails fast
//! once the threshold is reached, instead of letting every caller wait out a
//! full timeout against a dependency that is already down.
//!
//! ## States
//!
//! - **Closed**: normal operation, requests flow through
//! - **Open**: too many failures, requests rejected immediately
//! - **Half-open**: cooldown elapsed, one trial request allowed through

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Consecutive failures before the circuit opens.
const FAILURE_THRESHOLD: u32 = 3;

/// How long an open circuit rejects calls before allowing a trial request.
const COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    /// Monotonic clock for cooldown math, wall clock for messages.
    last_failure: Option<(Instant, DateTime<Utc>)>,
}

/// Read-only snapshot of breaker state, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Failure-counting circuit breaker for one external dependency.
///
/// State mutations are serialized behind a mutex: the client is `Clone` and
/// tokio runs callers on multiple threads, so lost updates would otherwise
/// be possible.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    cooldown: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_policy(FAILURE_THRESHOLD, COOLDOWN)
    }
}

impl CircuitBreaker {
    /// Create a breaker with a custom threshold and cooldown.
    pub fn with_policy(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
            threshold,
            cooldown,
        }
    }

    /// Whether calls should be rejected right now.
    ///
    /// An open circuit whose cooldown has elapsed transitions to half-open
    /// and lets the caller through as the trial request.
    pub fn is_open(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|(at, _)| at.elapsed())
                    .unwrap_or(self.cooldown);
                if elapsed >= self.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    false
                } else {
                    true
                }
            }
            CircuitState::Closed | CircuitState::HalfOpen => false,
        }
    }

    /// Record a successful call. Closes a half-open circuit.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
            }
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {}
        }
    }

    /// Record a failed call. Opens the circuit at the failure threshold; a
    /// failed half-open trial reopens it immediately.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some((Instant::now(), Utc::now()));
        inner.failures += 1;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.failures = self.threshold;
            }
            CircuitState::Closed if inner.failures >= self.threshold => {
                inner.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            state: inner.state,
            failures: inner.failures,
            last_failure: inner.last_failure.map(|(_, at)| at),
        }
    }

    /// Force the circuit closed and zero the failure count.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.last_failure = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // No critical section panics, so a poisoned lock still holds valid state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = CircuitBreaker::default();
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        assert_eq!(breaker.state().failures, 2);
    }

    #[test]
    fn opens_at_threshold() {
        let breaker = CircuitBreaker::default();
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());
        assert_eq!(breaker.state().state, CircuitState::Open);
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::default();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.state().failures, 0);
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn cooldown_allows_a_trial_call() {
        let breaker = CircuitBreaker::with_policy(3, Duration::from_millis(20));
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());
        thread::sleep(Duration::from_millis(30));
        assert!(!breaker.is_open());
        assert_eq!(breaker.state().state, CircuitState::HalfOpen);
    }

    #[test]
    fn failed_trial_reopens_immediately() {
        let breaker = CircuitBreaker::with_policy(3, Duration::from_millis(20));
        for _ in 0..3 {
            breaker.record_failure();
        }
        thread::sleep(Duration::from_millis(30));
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert_eq!(breaker.state().failures, 3);
    }

    #[test]
    fn successful_trial_closes_the_circuit() {
        let breaker = CircuitBreaker::with_policy(3, Duration::from_millis(20));
        for _ in 0..3 {
            breaker.record_failure();
        }
        thread::sleep(Duration::from_millis(30));
        assert!(!breaker.is_open());
        breaker.record_success();
        let snapshot = breaker.state();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failures, 0);
    }

    #[test]
    fn reset_forces_closed() {
        let breaker = CircuitBreaker::default();
        for _ in 0..5 {
            breaker.record_failure();
        }
        breaker.reset();
        let snapshot = breaker.state();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failures, 0);
        assert!(snapshot.last_failure.is_none());
    }

    #[test]
    fn snapshot_reports_last_failure_time() {
        let breaker = CircuitBreaker::default();
        assert!(breaker.state().last_failure.is_none());
        breaker.record_failure();
        assert!(breaker.state().last_failure.is_some());
    }
}
