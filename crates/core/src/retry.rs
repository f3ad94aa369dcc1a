//! # Retry Policy
//!
//! One policy object applied at every external-call boundary instead of
//! ad hoc retry loops at each call site. Whether an error is worth another
//! attempt is decided by the error type through [`Retryable`].

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Errors that know whether a retry could help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for anyhow::Error {
    /// Model calls carry no structured failure kind; the policy's attempt
    /// budget alone decides.
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Bounded fixed-delay retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay before each retry
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// A single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// One retry after a fixed delay
    pub fn once_after(backoff: Duration) -> Self {
        Self {
            max_attempts: 2,
            backoff_ms: backoff.as_millis() as u64,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    tracing::debug!(attempt, error = %e, "Retrying after backoff");
                    tokio::time::sleep(self.backoff()).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
