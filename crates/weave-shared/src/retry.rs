//! Retry with exponential backoff, used when establishing database pools

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Boxed future returned by retried operations
pub type RetryFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

/// Decides whether and when a failed attempt is retried
pub trait RetryPolicy: Send + Sync {
    /// `attempt` counts from 0 for the first try.
    fn should_retry(&self, attempt: u32) -> bool;
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff capped at `max_delay_ms`, plus random jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
    max_attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig, max_attempts: u32) -> Self {
        Self {
            config,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.config.initial_delay_ms);
        let grown = base.mul_f64(self.config.multiplier.powi(attempt as i32));
        let capped = grown.as_millis().min(u128::from(self.config.max_delay_ms)) as u64;

        Duration::from_millis(capped + fastrand::u64(0..=self.config.jitter_ms))
    }
}

/// Runs an operation until it succeeds or the policy gives up
pub struct RetryExecutor<P: RetryPolicy> {
    policy: P,
}

impl<P: RetryPolicy> RetryExecutor<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    pub async fn execute<F, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> RetryFuture<T, E>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "operation succeeded after retrying");
                    }
                    return Ok(result);
                }
                Err(error) if self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay(attempt);
                    warn!(attempt = attempt + 1, ?delay, error = %error, "operation failed, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(attempts = attempt + 1, error = %error, "operation failed, giving up");
                    return Err(error);
                }
            }
        }
    }

    /// Like [`execute`](Self::execute), bounding the total time including backoff
    pub async fn execute_with_timeout<F, T, E>(
        &self,
        operation: F,
        timeout: Duration,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> RetryFuture<T, E>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(timeout, self.execute(operation)).await {
            Ok(result) => result.map_err(RetryError::Operation),
            Err(_) => Err(RetryError::Timeout(timeout)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("{0}")]
    Operation(E),

    #[error("gave up after {0:?}")]
    Timeout(Duration),
}

pub fn exponential_backoff(config: RetryConfig, max_attempts: u32) -> RetryExecutor<ExponentialBackoff> {
    RetryExecutor::new(ExponentialBackoff::new(config, max_attempts))
}
