//! Retry logic with exponential backoff
//!
//! Configurable retry for transient failures: exponential backoff with an
//! upper cap and optional ±50% jitter to prevent thundering herd. Used by the
//! upload path (channel-timeout retries) and by the orchestrator's batch loop.

use crate::config::RetryConfig;
use crate::error::{AcquireError, Error};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, a delivery-channel "slow down"
/// signal) should return `true`. Permanent failures (unsupported media,
/// compression rejection, missing binaries) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // The delivery channel's timeout signal is the only retryable
            // acquisition failure
            Error::Acquire(e) => matches!(e, AcquireError::UploadTimedOut),
            // Network errors are retryable when they are timeouts or
            // connection-level failures
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Source errors exclude the source from the batch instead of
            // retrying the call
            Error::Source(_) => false,
            // Initialization and configuration problems are fatal
            Error::ProviderInit(_) | Error::Config { .. } => false,
            // Missing binaries and unsupported formats are permanent
            Error::ExternalTool(_) | Error::NotSupported(_) => false,
            Error::Serialization(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Retries only errors whose [`IsRetryable`] impl returns true, up to
/// `config.max_attempts` retries. Returns the successful result or the last
/// error once attempts are exhausted or a permanent error occurs.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Compute the next backoff delay without sleeping
///
/// Multiplies by `config.backoff_multiplier` and caps at `config.max_delay`.
/// The orchestrator uses this to keep its own sleep point explicit.
pub fn next_delay(config: &RetryConfig, current: Duration) -> Duration {
    Duration::from_secs_f64(current.as_secs_f64() * config.backoff_multiplier)
        .min(config.max_delay)
}

/// Add ±50% random jitter to a delay
///
/// The actual delay is uniformly distributed between `0.5 * delay` and
/// `1.5 * delay`.
pub fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.5..=1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * jitter_factor)
}
