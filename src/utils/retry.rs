use std::time::Duration;
use tokio::time::sleep;

use crate::metrics::Metrics;

// ============================================================================
// Exponential Backoff Retry Strategy
// ============================================================================
//
// Retries an async operation with exponentially growing pauses. Used for
// putting stock back when an order is cancelled (lock contention is worth
// waiting out) and for publishing notifications.
//
// Every retry loop is labelled; attempts and final outcomes are counted in
// `retry_attempts_total` / `retry_{success,failure}_total` when a `Metrics`
// handle is supplied.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Stock restoration after a cancel: losing it means a manual fix, so try harder.
    pub fn stock_restore() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }

    /// Fire-and-forget publishing: give up quickly.
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.multiplier).min(self.max_delay)
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded
    Success(T),
    /// Operation failed after all retries
    Failed(E),
    /// Operation permanently failed (should not retry)
    PermanentFailure(E),
}

impl<T, E> RetryResult<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(value) => Ok(value),
            RetryResult::Failed(err) | RetryResult::PermanentFailure(err) => Err(err),
        }
    }
}

/// Check if an error is transient (should retry) or permanent (should not retry)
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Retry every failure up to `max_attempts`.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    label: &str,
    metrics: Option<&Metrics>,
    operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    run(config, label, metrics, operation, |_: &E| true).await
}

/// Retry only errors that report themselves as transient; anything else
/// stops immediately with `PermanentFailure`.
pub async fn retry_on_transient<F, Fut, T, E>(
    config: &RetryConfig,
    label: &str,
    metrics: Option<&Metrics>,
    operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    run(config, label, metrics, operation, |e: &E| e.is_transient()).await
}

async fn run<F, Fut, T, E, P>(
    config: &RetryConfig,
    label: &str,
    metrics: Option<&Metrics>,
    mut operation: F,
    retryable: P,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        if let Some(m) = metrics {
            m.record_retry_attempt(label, attempt);
        }

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(operation = %label, attempt = attempt, "Operation succeeded after retry");
                }
                if let Some(m) = metrics {
                    m.record_retry_outcome(label, true);
                }
                return RetryResult::Success(result);
            }
            Err(error) => {
                if !retryable(&error) {
                    tracing::error!(operation = %label, error = %error, "Permanent failure detected, not retrying");
                    if let Some(m) = metrics {
                        m.record_retry_outcome(label, false);
                    }
                    return RetryResult::PermanentFailure(error);
                }

                if attempt >= config.max_attempts {
                    tracing::error!(
                        operation = %label,
                        attempt = attempt,
                        error = %error,
                        "Operation failed after all retries"
                    );
                    if let Some(m) = metrics {
                        m.record_retry_outcome(label, false);
                    }
                    return RetryResult::Failed(error);
                }

                tracing::warn!(
                    operation = %label,
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying after delay"
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
