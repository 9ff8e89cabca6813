//! Per-resource circuit breaker.
//!
//! Tracks errors per resource key (normally a domain) and stops calls to a
//! resource once it has failed too often, until a cooldown elapses.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED --[total errors >= threshold]--> OPEN --[reset_interval since last error, on check]--> CLOSED
//! ```
//!
//! There is no half-open probe: the first check after the cooldown clears
//! the counters and the next call gets a real attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Total errors (all types) before a resource's circuit opens.
    pub failure_threshold: u32,

    /// Quiet time after the last error before an open circuit resets.
    pub reset_interval: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_interval: Duration::from_secs(300),
        }
    }
}

/// Error bookkeeping for one resource key.
#[derive(Debug, Default)]
pub struct CircuitState {
    pub error_counts: HashMap<String, u32>,
    pub is_open: bool,
    pub last_error_time: Option<Instant>,
}

impl CircuitState {
    pub fn total_errors(&self) -> u32 {
        self.error_counts.values().sum()
    }

    fn clear(&mut self) {
        self.error_counts.clear();
        self.is_open = false;
        self.last_error_time = None;
    }

    fn quiet_for(&self, interval: Duration) -> bool {
        self.last_error_time
            .is_some_and(|t| t.elapsed() > interval)
    }
}

/// Snapshot of one resource's circuit for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitStats {
    pub resource: String,
    pub is_open: bool,
    pub total_errors: u32,
    pub error_counts: HashMap<String, u32>,
    pub time_until_reset: Option<Duration>,
}

type SharedState = Arc<Mutex<CircuitState>>;

/// Registry of circuits keyed by resource.
///
/// Cloning shares the registry. The outer map lock is only held to look up
/// or insert an entry; each resource has its own lock, so activity on one
/// domain never waits on another.
#[derive(Clone, Default)]
pub struct CircuitRegistry {
    config: CircuitConfig,
    circuits: Arc<Mutex<HashMap<String, SharedState>>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, resource: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(%resource, "Recovered from poisoned mutex");
        poisoned.into_inner()
    })
}

impl CircuitRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            circuits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    fn existing(&self, resource: &str) -> Option<SharedState> {
        lock(&self.circuits, resource).get(resource).cloned()
    }

    fn entry(&self, resource: &str) -> SharedState {
        lock(&self.circuits, resource)
            .entry(resource.to_string())
            .or_default()
            .clone()
    }

    /// Count one error of `error_type` against `resource`, opening the
    /// circuit once the total reaches the threshold.
    ///
    /// Counters of a closed circuit that has been quiet for longer than the
    /// reset interval start over.
    pub fn record_error(&self, resource: &str, error_type: &str) {
        let state = self.entry(resource);
        let mut state = lock(&state, resource);

        if !state.is_open && state.quiet_for(self.config.reset_interval) {
            state.clear();
        }

        *state.error_counts.entry(error_type.to_string()).or_insert(0) += 1;
        state.last_error_time = Some(Instant::now());

        let total = state.total_errors();
        if !state.is_open && total >= self.config.failure_threshold {
            state.is_open = true;
            tracing::warn!(
                %resource,
                %error_type,
                total_errors = total,
                "Circuit opened after {} errors",
                total
            );
        }
    }

    /// Returns true while the circuit for `resource` is open.
    ///
    /// An open circuit whose last error is older than the reset interval is
    /// reset here and reported closed.
    pub fn check_circuit(&self, resource: &str) -> bool {
        let Some(state) = self.existing(resource) else {
            return false;
        };
        let mut state = lock(&state, resource);

        if !state.is_open {
            return false;
        }

        if state.quiet_for(self.config.reset_interval) {
            tracing::info!(%resource, "Circuit reset after cooldown");
            state.clear();
            return false;
        }

        true
    }

    /// Manually close `resource`'s circuit and clear its counters.
    pub fn reset(&self, resource: &str) {
        if let Some(state) = self.existing(resource) {
            lock(&state, resource).clear();
            tracing::info!(%resource, "Circuit manually reset");
        }
    }

    pub fn reset_all(&self) {
        let states: Vec<(String, SharedState)> = lock(&self.circuits, "*")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (resource, state) in states {
            lock(&state, &resource).clear();
        }
    }

    pub fn stats(&self, resource: &str) -> Option<CircuitStats> {
        let state = self.existing(resource)?;
        let state = lock(&state, resource);

        let time_until_reset = match (state.is_open, state.last_error_time) {
            (true, Some(t)) => Some(self.config.reset_interval.saturating_sub(t.elapsed())),
            _ => None,
        };

        Some(CircuitStats {
            resource: resource.to_string(),
            is_open: state.is_open,
            total_errors: state.total_errors(),
            error_counts: state.error_counts.clone(),
            time_until_reset,
        })
    }

    /// Resources whose circuit is currently flagged open.
    pub fn open_circuits(&self) -> Vec<String> {
        let states: Vec<(String, SharedState)> = lock(&self.circuits, "*")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut open: Vec<String> = states
            .into_iter()
            .filter(|(resource, state)| lock(state, resource).is_open)
            .map(|(resource, _)| resource)
            .collect();
        open.sort();
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: u32, reset: Duration) -> CircuitRegistry {
        CircuitRegistry::new(CircuitConfig {
            failure_threshold: threshold,
            reset_interval: reset,
        })
    }

    #[test]
    fn test_unknown_resource_is_closed() {
        let circuits = CircuitRegistry::default();
        assert!(!circuits.check_circuit("acme.com"));
        assert!(circuits.stats("acme.com").is_none());
    }

    #[test]
    fn test_circuit_opens_after_threshold_failures() {
        let circuits = registry(3, Duration::from_secs(300));

        circuits.record_error("acme.com", "timeout");
        circuits.record_error("acme.com", "network");
        assert!(!circuits.check_circuit("acme.com"));

        circuits.record_error("acme.com", "timeout");
        assert!(circuits.check_circuit("acme.com"));

        let stats = circuits.stats("acme.com").unwrap();
        assert_eq!(stats.total_errors, 3);
        assert_eq!(stats.error_counts["timeout"], 2);
        assert!(stats.time_until_reset.unwrap() > Duration::from_secs(290));
    }

    #[test]
    fn test_resources_are_independent() {
        let circuits = registry(2, Duration::from_secs(300));

        circuits.record_error("a.com", "timeout");
        circuits.record_error("a.com", "timeout");
        circuits.record_error("b.com", "timeout");

        assert!(circuits.check_circuit("a.com"));
        assert!(!circuits.check_circuit("b.com"));
        assert_eq!(circuits.open_circuits(), vec!["a.com".to_string()]);
    }

    #[test]
    fn test_circuit_auto_resets_once_then_reaccumulates() {
        let circuits = registry(2, Duration::from_millis(10));

        circuits.record_error("acme.com", "timeout");
        circuits.record_error("acme.com", "timeout");
        assert!(circuits.check_circuit("acme.com"));

        std::thread::sleep(Duration::from_millis(20));

        assert!(!circuits.check_circuit("acme.com"));
        assert_eq!(circuits.stats("acme.com").unwrap().total_errors, 0);
        assert!(!circuits.check_circuit("acme.com"));

        circuits.record_error("acme.com", "timeout");
        assert!(!circuits.check_circuit("acme.com"));
        circuits.record_error("acme.com", "timeout");
        assert!(circuits.check_circuit("acme.com"));
    }

    #[test]
    fn test_stale_errors_on_closed_circuit_start_over() {
        let circuits = registry(2, Duration::from_millis(10));

        circuits.record_error("acme.com", "timeout");
        std::thread::sleep(Duration::from_millis(20));
        circuits.record_error("acme.com", "timeout");

        assert!(!circuits.check_circuit("acme.com"));
        assert_eq!(circuits.stats("acme.com").unwrap().total_errors, 1);
    }

    #[test]
    fn test_manual_reset() {
        let circuits = registry(1, Duration::from_secs(300));

        circuits.record_error("acme.com", "http_status");
        assert!(circuits.check_circuit("acme.com"));

        circuits.reset("acme.com");
        assert!(!circuits.check_circuit("acme.com"));

        circuits.record_error("b.com", "http_status");
        circuits.reset_all();
        assert!(circuits.open_circuits().is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let circuits = registry(1, Duration::from_secs(300));
        let clone = circuits.clone();

        clone.record_error("acme.com", "timeout");
        assert!(circuits.check_circuit("acme.com"));
    }
}
