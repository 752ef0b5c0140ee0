//! Bounded retry for transient backend failures.

use std::fmt::Display;
use std::thread::sleep;
use std::time::Duration;

use thiserror::Error;

/// Default number of attempts for a retried operation.
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Default pause between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Fixed-attempt retry policy with a constant backoff.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_BACKOFF)
    }
}

/// Raised when every attempt failed.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {last}")]
pub struct RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Name of the operation being retried.
    pub operation: String,
    /// Number of attempts made.
    pub attempts: u32,
    /// Error returned by the final attempt.
    #[source]
    pub last: E,
}

impl RetryPolicy {
    /// Creates a policy. A zero attempt count is raised to one so the
    /// operation always runs at least once.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Maximum number of attempts.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause between attempts.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Runs `op` until it succeeds or the attempts are exhausted. No pause
    /// follows the final failure.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] carrying the last error when every attempt
    /// fails.
    pub fn run<T, E, F>(&self, operation: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + Display + 'static,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => {
                    return Err(RetryError {
                        operation: operation.to_owned(),
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    sleep(self.backoff);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Error, Eq, PartialEq)]
    #[error("busy ({0})")]
    struct Busy(u32);

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    #[test]
    fn succeeds_on_first_attempt_without_retrying() {
        let calls = Cell::new(0);
        let result: Result<u32, RetryError<Busy>> = quick(3).run("refresh", || {
            calls.set(calls.get() + 1);
            Ok(7)
        });
        assert_eq!(result.expect("success"), 7);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retries_until_success() {
        let calls = Cell::new(0);
        let result = quick(5).run("refresh", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(Busy(calls.get()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhaustion_returns_last_error() {
        let calls = Cell::new(0);
        let err = quick(4)
            .run("refresh", || -> Result<(), Busy> {
                calls.set(calls.get() + 1);
                Err(Busy(calls.get()))
            })
            .expect_err("all attempts fail");
        assert_eq!(calls.get(), 4);
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last, Busy(4));
        assert_eq!(err.to_string(), "refresh failed after 4 attempt(s): busy (4)");
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = quick(0);
        assert_eq!(policy.max_attempts(), 1);
        let calls = Cell::new(0);
        let result = policy.run("refresh", || -> Result<(), Busy> {
            calls.set(calls.get() + 1);
            Err(Busy(0))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
