//! Bounded retry for DOM steps that can lose their node to a re-render.

use crate::browser::BrowserError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts, delay, backoff and the retryable-error predicate for one call site.
///
/// Each attempt re-runs the whole operation, so locators inside it resolve
/// fresh. Errors the predicate rejects return immediately; after the last
/// attempt the final error is returned unchanged.
#[derive(Debug)]
pub struct RetryPolicy<E> {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Multiplier applied to the delay after every failed attempt.
    pub backoff: u32,
    pub retryable: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RetryPolicy<E> {}

impl RetryPolicy<BrowserError> {
    /// Three attempts, retrying only stale-element failures.
    pub fn stale(delay: Duration) -> Self {
        Self {
            max_attempts: 3,
            delay,
            backoff: 1,
            retryable: BrowserError::is_stale,
        }
    }
}

impl<E: std::fmt::Display> RetryPolicy<E> {
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut delay = self.delay;
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Recovered after retry");
                    }
                    return Ok(value);
                }
                Err(e) if (self.retryable)(&e) && attempt < max_attempts => {
                    warn!(
                        label,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Retryable DOM failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(self.backoff.max(1));
                    attempt += 1;
                }
                Err(e) => {
                    if (self.retryable)(&e) {
                        warn!(label, max_attempts, error = %e, "Max retry attempts reached");
                    }
                    return Err(e);
                }
            }
        }
    }
}
