//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{ErrorCategory, ErrorClass, LatheError, Result};

/// A retry that is about to happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub class: ErrorClass,
    /// 1 for the first retry.
    pub attempt: u32,
    pub delay: Duration,
}

/// Retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the backoff.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt + 1`, with random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(0.0..=1.0);
        self.delay_with_sample(attempt, sample)
    }

    /// `min(base * 2^attempt, max) * (1 + jitter * sample)`, capped at `max_delay`.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let exponential = self
            .base_delay
            .as_secs_f64()
            * 2f64.powi(attempt.min(30) as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());
        let jitter = capped * self.jitter_ratio * sample.clamp(0.0, 1.0);
        Duration::from_secs_f64((capped + jitter).min(self.max_delay.as_secs_f64()))
    }

    /// Run `operation` until it succeeds, fails with a non-transient error,
    /// or attempts run out.
    ///
    /// `operation` receives the zero-based attempt number. `on_retry` is
    /// called before each backoff sleep. Cancellation interrupts the sleep.
    pub async fn execute<F, Fut, T, R>(
        &self,
        cancel: &CancellationToken,
        mut on_retry: R,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        R: FnMut(&RetryAttempt, &LatheError),
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(LatheError::Cancelled);
            }
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !error.is_retryable() || attempt + 1 >= self.max_attempts {
                return Err(error);
            }

            let retry = RetryAttempt {
                class: error_class(&error),
                attempt: attempt + 1,
                delay: self.delay_for(attempt),
            };
            tracing::warn!(
                attempt = retry.attempt,
                max_attempts = self.max_attempts,
                delay_ms = retry.delay.as_millis() as u64,
                error = %error,
                "retrying after transient error"
            );
            on_retry(&retry, &error);

            tokio::select! {
                _ = cancel.cancelled() => return Err(LatheError::Cancelled),
                _ = tokio::time::sleep(retry.delay) => {}
            }
            attempt += 1;
        }
    }
}

/// Retry class of a typed error.
pub fn error_class(error: &LatheError) -> ErrorClass {
    match error.category() {
        ErrorCategory::Transient => ErrorClass::Transient,
        ErrorCategory::Permanent | ErrorCategory::Configuration | ErrorCategory::Extraction => {
            ErrorClass::Permanent
        }
        ErrorCategory::LockTimeout | ErrorCategory::Cancellation | ErrorCategory::Unknown => {
            ErrorClass::Unknown
        }
    }
}
