use std::time::Duration;
use rand::Rng;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Exponential Backoff Retry Strategy
// ============================================================================
//
// Retries transient failures with exponential backoff and randomized jitter.
// Used by the event publisher (broker sends), the storage adapters (writes)
// and the consumer pipeline (business handler invocations).
//
// Every delay observes an optional CancellationToken so that a shutdown
// never waits out a backoff.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Fraction of each delay that is randomized (0.0 = none, 1.0 = full jitter)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Create a retry config for quick failures (fewer retries)
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt, before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = (self.initial_delay.as_millis() as f64) * self.multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Longest total time spent sleeping between attempts, jitter included
    pub fn max_total_delay(&self) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        (1..self.max_attempts)
            .map(|attempt| self.base_delay(attempt).mul_f64(1.0 + jitter).min(self.max_delay))
            .sum()
    }

    /// Delay with jitter applied, never above `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }

        let spread = base.as_millis() as f64 * jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let millis = (base.as_millis() as f64 + offset).max(0.0);
        Duration::from_millis(millis as u64).min(self.max_delay)
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
    /// Shutdown was signalled while waiting to retry; carries the last error
    Cancelled(E),
}

/// Check if an error is transient (should retry) or permanent (should not retry)
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Retry with transient error checking
pub async fn retry_on_transient<F, Fut, T, E>(
    config: RetryConfig,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    run(&config, None, &mut operation, |e: &E| e.is_transient()).await
}

/// Retry with transient error checking; backoff delays stop early on shutdown
pub async fn retry_on_transient_until<F, Fut, T, E>(
    config: RetryConfig,
    shutdown: &CancellationToken,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    run(&config, Some(shutdown), &mut operation, |e: &E| e.is_transient()).await
}

async fn run<F, Fut, T, E, P>(
    config: &RetryConfig,
    shutdown: Option<&CancellationToken>,
    operation: &mut F,
    retryable: P,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        tracing::debug!(
            attempt = attempt,
            max_attempts = config.max_attempts,
            "Attempting operation"
        );

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return RetryResult::Success(result);
            }
            Err(error) => {
                if !retryable(&error) {
                    tracing::error!(
                        error = %error,
                        "Permanent failure detected, not retrying"
                    );
                    return RetryResult::PermanentFailure(error);
                }

                if attempt >= config.max_attempts {
                    tracing::error!(
                        attempt = attempt,
                        error = %error,
                        "Operation failed after all retries"
                    );
                    return RetryResult::Failed(error);
                }

                let delay = config.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying after delay"
                );

                match shutdown {
                    Some(token) => {
                        tokio::select! {
                            _ = token.cancelled() => {
                                tracing::info!(attempt = attempt, "Retry abandoned on shutdown");
                                return RetryResult::Cancelled(error);
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
        }
    }
}
