//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: probing whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Closed → Closed: success resets the failure counter
//! Open → Half-Open: first query after the cool-down elapsed
//! Half-Open → Closed: success_threshold consecutive successes
//! Half-Open → Open: any failure
//! ```

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, requests are allowed through.
    Closed,
    /// Failures reached the threshold, requests are blocked.
    Open,
    /// Cool-down elapsed, attempts probe the upstream.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
}

/// Per-upstream circuit breaker.
///
/// All mutable fields sit behind one lock so a transition is never observed half done.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerState>,
}

/// Observability view of one breaker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    /// Milliseconds since the last recorded failure.
    pub last_failure_ago_ms: Option<u64>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            cooldown: Duration::from_millis(config.cooldown_ms),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
            }),
        }
    }

    /// Whether an attempt may go out.
    ///
    /// Only an open circuit inside its cool-down refuses. An open circuit whose
    /// cool-down elapsed flips to half-open as a side effect.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.cooldown);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                    tracing::info!(upstream = %self.name, "circuit breaker half-open");
                    metrics::record_circuit_state(&self.name, CircuitState::HalfOpen);
                }
                cooled
            }
        }
    }

    /// Record one completed successful attempt.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    tracing::info!(upstream = %self.name, "circuit breaker closed");
                    metrics::record_circuit_state(&self.name, CircuitState::Closed);
                }
            }
            // late completion of an attempt issued before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// Record one completed failed attempt.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed if inner.failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    upstream = %self.name,
                    failures = inner.failures,
                    "circuit breaker opened after reaching failure threshold"
                );
                metrics::record_circuit_state(&self.name, CircuitState::Open);
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.successes = 0;
                tracing::warn!(upstream = %self.name, "circuit breaker reopened by failed probe");
                metrics::record_circuit_state(&self.name, CircuitState::Open);
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().expect("circuit breaker mutex poisoned").failures
    }

    pub fn success_count(&self) -> u32 {
        self.inner.lock().expect("circuit breaker mutex poisoned").successes
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            last_failure_ago_ms: inner.last_failure.map(|at| at.elapsed().as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, success_threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            &CircuitBreakerConfig {
                failure_threshold,
                success_threshold,
                cooldown_ms,
            },
        )
    }

    #[test]
    fn test_opens_exactly_at_threshold() {
        let cb = breaker(3, 2, 60_000);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let cb = breaker(3, 2, 60_000);
        for _ in 0..10 {
            cb.record_failure();
            cb.record_failure();
            cb.record_success();
            assert_eq!(cb.failure_count(), 0);
            assert_eq!(cb.state(), CircuitState::Closed);
        }
    }

    #[test]
    fn test_open_until_cooldown_then_half_open() {
        let cb = breaker(1, 2, 40);
        cb.record_failure();
        assert!(!cb.can_execute());
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(50));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, 3, 10);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.can_execute());

        cb.record_success();
        assert_eq!(cb.success_count(), 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.success_count(), 0);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let cb = breaker(1, 2, 10);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.can_execute());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.success_count(), 0);
    }

    #[test]
    fn test_snapshot() {
        let cb = breaker(5, 2, 1000);
        assert!(cb.snapshot().last_failure_ago_ms.is_none());
        cb.record_failure();
        let snap = cb.snapshot();
        assert_eq!(snap.name, "test");
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failures, 1);
        assert!(snap.last_failure_ago_ms.is_some());
    }
}
