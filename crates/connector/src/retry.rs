//! Attempt-count retry policy.

use std::fmt;
use std::future::Future;

use tracing::warn;

/// Runs an operation up to `max_attempts` times.
///
/// There is no delay between attempts; per-attempt timeouts belong to the
/// transport. The action is repeated verbatim, so it must be safe to rerun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// Attempts are clamped to at least one.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the first success, or the error of the last attempt.
    ///
    /// The action receives the 1-based attempt number. Errors from earlier
    /// attempts are logged and dropped.
    pub async fn run<F, Fut, T, E>(&self, mut action: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match action(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => return Err(err),
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
