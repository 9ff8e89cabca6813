//! Retry with exponential backoff and jitter, gated by the circuit breaker.

use std::future::Future;
use std::time::Duration;

use crate::circuit_breaker::CircuitRegistry;
use crate::error::{AppError, ErrorClass};

/// Backoff schedule and error classification for [`retry_with_backoff`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
    pub classifier: fn(&AppError) -> ErrorClass,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(30),
            classifier: AppError::classify,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps. Useful in tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn with_classifier(mut self, classifier: fn(&AppError) -> ErrorClass) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sleep before the next attempt: `min(backoff * jitter, max_backoff)`.
    pub fn delay(&self, backoff: Duration, jitter: f64) -> Duration {
        backoff.mul_f64(jitter).min(self.max_backoff)
    }

    /// Overflowing growth saturates at `max_backoff`.
    fn next_backoff(&self, backoff: Duration) -> Duration {
        Duration::try_from_secs_f64(backoff.as_secs_f64() * self.backoff_factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Uniform jitter in `[0.5, 1.0)`.
pub fn jitter() -> f64 {
    0.5 + fastrand::f64() * 0.5
}

/// Runs `operation` until it succeeds, fails fatally, or exhausts the
/// policy's retries.
///
/// The circuit for `resource` is consulted once up front; if open, the call
/// is not attempted and [`AppError::CircuitOpen`] is returned. Fatal errors
/// and exhausted transient errors are recorded against the circuit.
pub async fn retry_with_backoff<T, F, Fut>(
    circuits: &CircuitRegistry,
    resource: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    if circuits.check_circuit(resource) {
        tracing::warn!(%resource, "Circuit open, skipping call");
        return Err(AppError::CircuitOpen {
            resource: resource.to_string(),
        });
    }

    let mut backoff = policy.initial_backoff;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match (policy.classifier)(&err) {
            ErrorClass::Fatal => {
                tracing::debug!(%resource, error = %err, "Non-retryable error");
                circuits.record_error(resource, err.kind());
                return Err(err);
            }
            ErrorClass::Transient if attempt > policy.max_retries => {
                tracing::warn!(
                    %resource,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                circuits.record_error(resource, err.kind());
                return Err(AppError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            ErrorClass::Transient => {
                let wait = policy.delay(backoff, jitter());
                tracing::debug!(
                    %resource,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "Transient error, backing off"
                );
                tokio::time::sleep(wait).await;
                backoff = policy.next_backoff(backoff);
            }
        }
    }
}
