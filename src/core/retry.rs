/*!
 * Retry policy with exponential backoff and jitter
 *
 * One policy object is shared by every idempotent call the engine makes:
 * part uploads, the direct PUT, initiate and the completion retry. A policy is
 * parameterized by attempt budget, base and max delay, jitter and the
 * predicate that decides which errors are worth another attempt.
 *
 * # Example
 *
 * ```
 * use s3stream::core::retry::{BackoffStrategy, RetryPolicy};
 * use std::time::Duration;
 *
 * let policy = RetryPolicy {
 *     max_attempts: 5,
 *     initial_delay: Duration::from_millis(100),
 *     max_delay: Duration::from_secs(30),
 *     backoff: BackoffStrategy::ExponentialWithJitter,
 *     ..Default::default()
 * };
 * assert_eq!(policy.max_attempts, 5);
 * ```
 */

use crate::error::{S3Error, S3Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Decides whether a failed attempt should be retried
pub type RetryPredicate = fn(&S3Error) -> bool;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay before first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff strategy to use
    pub backoff: BackoffStrategy,

    /// Jitter factor (0.0-1.0)
    pub jitter_factor: f64,

    /// Which errors are retried
    pub retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(20),
            backoff: BackoffStrategy::ExponentialWithJitter,
            jitter_factor: 0.3,
            retryable: S3Error::is_retryable,
        }
    }
}

impl RetryPolicy {
    /// Policy for the completion call: one retry on any failure except cancellation
    pub fn completion(base: &RetryPolicy) -> Self {
        Self {
            max_attempts: 2,
            retryable: |e| !e.is_cancelled(),
            ..base.clone()
        }
    }

    /// Calculate delay before retry number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let multiplier = 2_u32.saturating_pow(attempt - 1);
        let base_delay = self.initial_delay.saturating_mul(multiplier);

        // Cap at max_delay
        let capped_delay = base_delay.min(self.max_delay);

        if matches!(self.backoff, BackoffStrategy::ExponentialWithJitter)
            && self.jitter_factor > 0.0
        {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            let jitter_amount = capped_delay.as_secs_f64() * jitter;
            capped_delay + Duration::from_secs_f64(jitter_amount)
        } else {
            capped_delay
        }
    }

    /// Run `operation` until it succeeds, fails permanently or the budget is spent
    ///
    /// Backoff sleeps race against `cancel`. A transient error that survives
    /// every attempt comes back as [`S3Error::RetriesExhausted`]; a permanent
    /// error is returned as-is.
    pub async fn run<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation_name: &str,
        mut operation: F,
    ) -> S3Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = S3Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            if cancel.is_cancelled() {
                return Err(S3Error::Cancelled);
            }

            let error = match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if error.is_cancelled() || !(self.retryable)(&error) {
                return Err(error);
            }

            if attempt >= self.max_attempts {
                if self.max_attempts == 1 {
                    return Err(error);
                }
                return Err(S3Error::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.calculate_delay(attempt);
            warn!(
                operation = operation_name,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after transient failure"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(S3Error::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }
}

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Exponential increase in delay (2^n)
    Exponential,

    /// Exponential with random jitter to prevent thundering herd
    ExponentialWithJitter,
}
