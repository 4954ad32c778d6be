//! Bounded retry with exponential backoff for OTLP exports.
//!
//! Exports are a single attempt unless a [`RetryPolicy`] with `max_retries > 0`
//! is configured on the exporter builder. Backoff sleeps run on the export
//! worker thread through `futures-timer`, so no async runtime is needed.
use crate::error::ExportError;
use crate::pipeline_warn;
use futures_timer::Delay;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// How often and how patiently a failed export is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: usize,
    /// Delay before the first retry; doubled after each retry.
    pub initial_delay: Duration,
    /// Upper bound of a single delay, jitter included.
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::none()
    }
}

impl RetryPolicy {
    /// A single attempt.
    pub const fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_600),
            jitter: Duration::from_millis(100),
        }
    }

    /// Retry up to `max_retries` times with the default delays.
    pub const fn with_max_retries(max_retries: usize) -> Self {
        RetryPolicy {
            max_retries,
            ..RetryPolicy::none()
        }
    }
}

/// Whether another attempt could succeed.
fn is_retryable(err: &ExportError) -> bool {
    matches!(
        err,
        ExportError::Transport(_) | ExportError::Timeout(_) | ExportError::Rejected(_)
    )
}

fn jitter(max: Duration) -> Duration {
    let max = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max))
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_retries` retries are used up. The last error is returned.
pub(crate) async fn retry_with_backoff<F, Fut>(
    policy: RetryPolicy,
    operation_name: &'static str,
    mut operation: F,
) -> Result<(), ExportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ExportError>>,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        match operation().await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < policy.max_retries && is_retryable(&err) => {
                attempt += 1;
                pipeline_warn!(
                    name: "Export.Retrying",
                    operation = operation_name,
                    attempt = attempt,
                    error = format!("{err}")
                );
                let backoff = (delay + jitter(policy.jitter)).min(policy.max_delay);
                Delay::new(backoff).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(err) => return Err(err),
        }
    }
}
