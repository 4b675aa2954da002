use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::ServiceError;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Sleep before retry `n` is `backoff_factor * n`
    pub backoff_factor: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_factor: Duration::ZERO,
        }
    }

    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.backoff_factor * retry
    }
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Retries rate-limit and transient network failures; everything else is terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientErrorPolicy;

impl RetryPolicy<ServiceError> for TransientErrorPolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        error.is_retryable()
    }
}

/// Final result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Execute an async function with retries
pub async fn with_retry<F, Fut, T, E, P>(
    config: &RetryConfig,
    policy: &P,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: RetryPolicy<E>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!("Operation succeeded after {} attempts", attempts);
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(error) => {
                let retry = attempts;
                if retry > config.max_retries || !policy.is_retryable(&error) {
                    if attempts > 1 {
                        warn!("Operation failed after {} attempts: {}", attempts, error);
                    }
                    return RetryOutcome {
                        result: Err(error),
                        attempts,
                    };
                }

                let delay = config.backoff_for(retry);
                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempts, error, delay
                );
                sleep(delay).await;
            }
        }
    }
}
