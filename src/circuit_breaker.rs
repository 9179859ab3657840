// Circuit breaker guarding the Client Facade's verb dispatch. Off by
// default — see SPEC_FULL.md's "Ambient: retry and circuit-breaker
// wrapping" section.

// ACCEPTABLE: Mutex poisoning .expect() is allowed in this module (unrecoverable error)
#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitBreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// A per-endpoint failure-isolation guard: closed (calls pass through),
/// open (calls fail fast) after `failure_threshold` consecutive failures,
/// half-open (one probe call allowed) after `reset_timeout` has elapsed.
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
    failure_threshold: u32,
    reset_timeout: Duration,
    endpoint: String,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                opened_at: None,
            })),
            failure_threshold,
            reset_timeout: Duration::from_millis(reset_timeout_ms),
            endpoint: endpoint.into(),
        }
    }

    pub fn state(&self) -> CircuitBreakerState {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.transition_if_due(&mut inner);
        inner.state
    }

    fn transition_if_due(&self, inner: &mut Inner) {
        if inner.state == CircuitBreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.reset_timeout {
                    inner.state = CircuitBreakerState::HalfOpen;
                }
            }
        }
    }

    pub fn call<F, T>(&self, f: F) -> ClientResult<T>
    where
        F: FnOnce() -> ClientResult<T>,
    {
        {
            let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
            self.transition_if_due(&mut inner);
            if inner.state == CircuitBreakerState::Open {
                return Err(ClientError::generic(format!(
                    "circuit breaker open for endpoint {}",
                    self.endpoint
                )));
            }
        }

        match f() {
            Ok(val) => {
                let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
                inner.state = CircuitBreakerState::Closed;
                inner.failure_count = 0;
                inner.opened_at = None;
                Ok(val)
            }
            Err(e) => {
                let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitBreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_failure_threshold() {
        let cb = CircuitBreaker::new("test", 2, 60_000);
        assert_eq!(cb.state(), CircuitBreakerState::Closed);
        let _ = cb.call(|| Err::<(), _>(ClientError::transport("x")));
        assert_eq!(cb.state(), CircuitBreakerState::Closed);
        let _ = cb.call(|| Err::<(), _>(ClientError::transport("x")));
        assert_eq!(cb.state(), CircuitBreakerState::Open);
    }

    #[test]
    fn half_opens_after_reset_timeout() {
        let cb = CircuitBreaker::new("test", 1, 0);
        let _ = cb.call(|| Err::<(), _>(ClientError::transport("x")));
        assert_eq!(cb.state(), CircuitBreakerState::HalfOpen);
    }

    #[test]
    fn success_closes_circuit() {
        let cb = CircuitBreaker::new("test", 1, 0);
        let _ = cb.call(|| Err::<(), _>(ClientError::transport("x")));
        assert_eq!(cb.state(), CircuitBreakerState::HalfOpen);
        let _ = cb.call(|| Ok::<_, ClientError>(()));
        assert_eq!(cb.state(), CircuitBreakerState::Closed);
    }
}
