// Retry logic with exponential backoff, wrapping the Client Facade's verb
// dispatch. Off by default — see SPEC_FULL.md's "Ambient: retry and
// circuit-breaker wrapping" section.

use std::thread;
use std::time::Duration;

use crate::error::{is_retryable, ClientError, ClientResult};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            multiplier: 2.0,
            enabled: false,
        }
    }
}

impl RetryConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Executes a fallible closure with exponential backoff between attempts.
///
/// Only [`ClientError::Transport`] is treated as retryable; protocol and
/// response errors return on the first attempt. When `config.enabled` is
/// false the closure runs exactly once, matching spec.md's "no implicit
/// retry" default.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn execute<F, T>(&self, mut f: F) -> ClientResult<T>
    where
        F: FnMut() -> ClientResult<T>,
    {
        if !self.config.enabled {
            return f();
        }

        let mut delay_ms = self.config.initial_delay_ms;
        let mut last_error: Option<ClientError> = None;

        for attempt in 0..=self.config.max_retries {
            match f() {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    if attempt >= self.config.max_retries {
                        return Err(ClientError::generic(format!(
                            "retry exhausted after {} attempts: {}",
                            self.config.max_retries + 1,
                            e
                        )));
                    }
                    last_error = Some(e);
                    thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms = ((delay_ms as f64) * self.config.multiplier) as u64;
                    delay_ms = delay_ms.min(self.config.max_delay_ms);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::generic("retry loop exited without result")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn disabled_retry_runs_exactly_once() {
        let calls = RefCell::new(0);
        let executor = RetryExecutor::new(RetryConfig::disabled());
        let result = executor.execute(|| {
            *calls.borrow_mut() += 1;
            Err::<(), _>(ClientError::transport("boom"))
        });
        assert!(result.is_err());
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn enabled_retry_exhausts_after_max_retries() {
        let calls = RefCell::new(0);
        let config = RetryConfig {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
            enabled: true,
        };
        let executor = RetryExecutor::new(config);
        let result = executor.execute(|| {
            *calls.borrow_mut() += 1;
            Err::<(), _>(ClientError::transport("boom"))
        });
        assert!(result.is_err());
        assert_eq!(*calls.borrow(), 3); // initial + 2 retries
    }

    #[test]
    fn non_retryable_error_returns_immediately() {
        let calls = RefCell::new(0);
        let config = RetryConfig {
            enabled: true,
            ..RetryConfig::default()
        };
        let executor = RetryExecutor::new(config);
        let result = executor.execute(|| {
            *calls.borrow_mut() += 1;
            Err::<(), _>(ClientError::protocol("bad json"))
        });
        assert!(result.is_err());
        assert_eq!(*calls.borrow(), 1);
    }
}
