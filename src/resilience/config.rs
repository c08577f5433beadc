//! # Resilience Configuration
//!
//! Runtime (`Duration`-typed) configuration for circuit breakers and the request
//! deduplicator. File-level settings live in [`crate::config`] and convert into
//! these structs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure percentage over the rolling window that opens the circuit
    pub failure_threshold: f64,

    /// Outcomes the window must hold before the circuit may open
    pub minimum_requests: u32,

    /// Time spent open before a half-open trial is admitted
    pub reset_timeout: Duration,

    /// Age after which outcomes drop out of the rolling window
    pub monitoring_period: Duration,
}

impl CircuitBreakerConfig {
    /// Configuration for upstream image origins
    pub fn for_upstream() -> Self {
        Self {
            failure_threshold: 50.0,
            minimum_requests: 5,
            reset_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
        }
    }

    /// Configuration for the distributed cache backend
    pub fn for_distributed_cache() -> Self {
        Self {
            failure_threshold: 50.0,
            minimum_requests: 10,
            reset_timeout: Duration::from_secs(15),
            monitoring_period: Duration::from_secs(60),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if !(self.failure_threshold >= 0.0 && self.failure_threshold < 100.0) {
            return Err(format!(
                "failure_threshold must be a percentage in [0, 100), got {}",
                self.failure_threshold
            ));
        }

        if self.minimum_requests == 0 {
            return Err("minimum_requests must be greater than 0".to_string());
        }

        if self.reset_timeout.is_zero() {
            return Err("reset_timeout must be greater than 0".to_string());
        }

        if self.monitoring_period.is_zero() {
            return Err("monitoring_period must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::for_upstream()
    }
}

/// Configuration for the single-flight request deduplicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeduplicatorConfig {
    /// How long a settled entry stays joinable
    pub grace_delay: Duration,

    /// Entries older than this are considered leaked and reaped
    pub max_pending_age: Duration,

    /// Interval of the stale-entry sweep
    pub sweep_interval: Duration,
}

impl DeduplicatorConfig {
    /// Longest a leader may run. Kept below `max_pending_age` so an execution
    /// is abandoned before a replacement leader can start for the same key.
    pub fn leader_deadline(&self) -> Duration {
        self.max_pending_age
            .saturating_sub(self.max_pending_age / 10)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_pending_age.is_zero() {
            return Err("max_pending_age must be greater than 0".to_string());
        }

        if self.grace_delay >= self.max_pending_age {
            return Err("grace_delay must be shorter than max_pending_age".to_string());
        }

        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for DeduplicatorConfig {
    fn default() -> Self {
        Self {
            grace_delay: Duration::from_millis(100),
            max_pending_age: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}
