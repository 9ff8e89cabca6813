use std::time::Duration;

use crate::circuit_breaker::CircuitConfig;
use crate::coordinator::EscalationPolicy;
use crate::error::AppError;
use crate::retry::RetryPolicy;
use crate::scorer::DEFAULT_MAX_STAFF;

/// Every tunable of a verification run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Records per batch; one batch is processed sequentially by one worker.
    pub batch_size: usize,
    /// Batches processed concurrently.
    pub max_workers: usize,
    /// Records between checkpoint writes.
    pub save_interval: usize,
    pub policy: EscalationPolicy,
    pub require_staff: bool,
    pub retry: RetryPolicy,
    pub circuit: CircuitConfig,
    pub liveness_timeout: Duration,
    pub grace_period: Duration,
    /// Period of the progress monitor (throughput, ETA, checkpoint).
    pub monitor_interval: Duration,
    /// Pause between batch submissions.
    pub submit_gap: Duration,
    pub max_staff: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_workers: 3,
            save_interval: 25,
            policy: EscalationPolicy::Auto,
            require_staff: false,
            retry: RetryPolicy::default(),
            circuit: CircuitConfig::default(),
            liveness_timeout: Duration::from_secs(15),
            grace_period: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(30),
            submit_gap: Duration::from_millis(500),
            max_staff: DEFAULT_MAX_STAFF,
        }
    }
}

impl PipelineConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_save_interval(mut self, interval: usize) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn with_policy(mut self, policy: EscalationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_require_staff(mut self, require: bool) -> Self {
        self.require_staff = require;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit(mut self, circuit: CircuitConfig) -> Self {
        self.circuit = circuit;
        self
    }

    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_submit_gap(mut self, gap: Duration) -> Self {
        self.submit_gap = gap;
        self
    }

    pub fn with_max_staff(mut self, max: usize) -> Self {
        self.max_staff = max;
        self
    }

    /// Reject settings that would stall or spin the pipeline.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.batch_size == 0 {
            return Err(AppError::ConfigError("batch_size must be at least 1".into()));
        }
        if self.max_workers == 0 {
            return Err(AppError::ConfigError("max_workers must be at least 1".into()));
        }
        if self.save_interval == 0 {
            return Err(AppError::ConfigError("save_interval must be at least 1".into()));
        }
        let factor = self.retry.backoff_factor;
        if !(factor.is_finite() && factor >= 1.0) {
            return Err(AppError::ConfigError(format!(
                "backoff_factor must be a finite number >= 1.0, got {}",
                self.retry.backoff_factor
            )));
        }
        if self.retry.max_backoff < self.retry.initial_backoff {
            return Err(AppError::ConfigError(
                "max_backoff must not be shorter than initial_backoff".into(),
            ));
        }
        if self.circuit.failure_threshold == 0 {
            return Err(AppError::ConfigError(
                "circuit failure_threshold must be at least 1".into(),
            ));
        }
        if self.monitor_interval.is_zero() {
            return Err(AppError::ConfigError("monitor_interval must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.save_interval, 25);
        assert_eq!(config.policy, EscalationPolicy::Auto);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.circuit.failure_threshold, 5);
        assert_eq!(config.max_staff, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        assert!(PipelineConfig::default().with_batch_size(0).validate().is_err());
        assert!(PipelineConfig::default().with_max_workers(0).validate().is_err());
        assert!(PipelineConfig::default().with_save_interval(0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_backoff() {
        let shrinking = PipelineConfig::default()
            .with_retry(RetryPolicy::default().with_backoff_factor(0.5));
        assert!(matches!(shrinking.validate(), Err(AppError::ConfigError(_))));

        for factor in [f64::NAN, f64::INFINITY] {
            let config = PipelineConfig::default()
                .with_retry(RetryPolicy::default().with_backoff_factor(factor));
            assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
        }

        let inverted = PipelineConfig::default().with_retry(
            RetryPolicy::default()
                .with_initial_backoff(Duration::from_secs(10))
                .with_max_backoff(Duration::from_secs(1)),
        );
        assert!(inverted.validate().is_err());
    }
}
