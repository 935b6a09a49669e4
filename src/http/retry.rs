//! Retry logic with exponential backoff.
//!
//! Only errors the transport classifies as transient (a closed or cancelled
//! request) are retried; every other error is returned on the first
//! failure. Each attempt is gated on a [`Generation`] so that a newer
//! operation can supersede a retry loop that is still sleeping.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use super::cancellation::{CancellationCoordinator, Generation};
use crate::error::{FlagKitError, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of tries, the first one included. Default: 4
    pub max_attempts: u32,

    /// Base delay in milliseconds. Default: 1000
    pub base_delay_ms: u64,

    /// Backoff multiplier. Default: 2.0
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Delay before retrying after failed attempt number `attempt` (0-based).
    ///
    /// `base_delay * multiplier ^ attempt`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(delay as u64)
    }
}

/// Builder for RetryConfig.
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
}

impl RetryConfigBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = Some(delay);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn build(self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay_ms: self.base_delay_ms.unwrap_or(defaults.base_delay_ms),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(defaults.backoff_multiplier),
        }
    }
}

/// Result of a generation-gated operation.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// The operation ran to completion, successfully or not.
    Completed(Result<T>),
    /// A newer generation started before an attempt could run.
    Superseded,
}

impl<T> RetryOutcome<T> {
    pub fn is_superseded(&self) -> bool {
        matches!(self, RetryOutcome::Superseded)
    }
}

/// Determine if an error is retryable by the transport retrier.
pub fn is_retryable(error: &FlagKitError) -> bool {
    error.is_transport_retriable()
}

/// Execute an async operation with retry logic.
pub async fn with_retry<T, F, Fut>(
    operation: F,
    config: &RetryConfig,
    coordinator: &CancellationCoordinator,
    generation: Generation,
) -> RetryOutcome<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_predicate(operation, config, coordinator, generation, is_retryable).await
}

/// Execute an async operation with retry logic and a custom retry predicate.
pub async fn with_retry_predicate<T, F, Fut, P>(
    operation: F,
    config: &RetryConfig,
    coordinator: &CancellationCoordinator,
    generation: Generation,
    should_retry: P,
) -> RetryOutcome<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&FlagKitError) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if !coordinator.is_current(generation) {
            tracing::debug!(
                "Operation of generation {} superseded before attempt {}",
                generation.value(),
                attempt + 1
            );
            return RetryOutcome::Superseded;
        }

        match operation().await {
            Ok(result) => return RetryOutcome::Completed(Ok(result)),
            Err(e) => {
                if !should_retry(&e) || attempt + 1 >= max_attempts {
                    return RetryOutcome::Completed(Err(e));
                }

                let delay = config.calculate_delay(attempt);
                tracing::debug!(
                    "Retry attempt {} of {} after {}, waiting {:?}",
                    attempt + 2,
                    max_attempts,
                    e.code,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
