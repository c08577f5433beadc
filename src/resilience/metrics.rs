//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshots of circuit breaker state for monitoring, logging and
//! the HTTP layer's health reporting.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Breaker name (upstream host or component)
    pub name: String,

    /// Current circuit breaker state
    pub state: CircuitState,

    /// Failures inside the rolling window
    pub failure_count: u64,

    /// Successes inside the rolling window
    pub success_count: u64,

    /// Outcomes inside the rolling window
    pub total_requests: u64,

    /// Failure percentage over the rolling window (0.0 to 100.0)
    pub failure_percentage: f64,

    /// Calls short-circuited since creation
    pub rejected_calls: u64,

    /// Calls that reached the wrapped operation since creation
    pub lifetime_calls: u64,

    pub last_state_change: DateTime<Utc>,

    /// When an open circuit admits its next trial
    pub next_attempt: Option<DateTime<Utc>>,
}

impl CircuitBreakerStats {
    /// Check if the snapshot indicates healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing upstream health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "{}: {} | Window: {} calls, {:.1}% failed | Rejected: {}",
            self.name,
            self.state_description(),
            self.total_requests,
            self.failure_percentage,
            self.rejected_calls
        )
    }
}

/// Stats of every breaker owned by a manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerStats {
    pub circuit_breakers: HashMap<String, CircuitBreakerStats>,
    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerStats {
    pub fn open_circuits(&self) -> Vec<&str> {
        let mut open: Vec<&str> = self
            .circuit_breakers
            .values()
            .filter(|stats| stats.state == CircuitState::Open)
            .map(|stats| stats.name.as_str())
            .collect();
        open.sort_unstable();
        open
    }

    pub fn is_healthy(&self) -> bool {
        self.circuit_breakers.values().all(|stats| stats.is_healthy())
    }
}
