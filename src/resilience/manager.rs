//! # Circuit Breaker Manager
//!
//! Owns one circuit breaker per upstream host so a failing origin cannot open
//! the circuit for healthy ones. Breakers are created lazily from a shared
//! default configuration.
//!
//! Hosts come from client-supplied URLs, so the registry is bounded: breakers
//! idle for longer than the idle timeout are dropped, and the least recently
//! used ones are evicted past the capacity. Traffic to an open circuit keeps
//! its breaker alive.

use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, SystemCircuitBreakerStats,
};
use chrono::Utc;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default bound on tracked upstream hosts
pub const DEFAULT_MAX_TRACKED_HOSTS: u64 = 10_000;

/// Default idle time after which a host's breaker is forgotten
pub const DEFAULT_BREAKER_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Manager for per-host circuit breakers
#[derive(Debug)]
pub struct CircuitBreakerManager {
    circuit_breakers: Cache<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_limits(config, DEFAULT_MAX_TRACKED_HOSTS, DEFAULT_BREAKER_IDLE_TIMEOUT)
    }

    /// Manager retaining at most `max_hosts` breakers, each for at most
    /// `idle_timeout` without use
    pub fn with_limits(config: CircuitBreakerConfig, max_hosts: u64, idle_timeout: Duration) -> Self {
        info!(
            failure_threshold = config.failure_threshold,
            minimum_requests = config.minimum_requests,
            max_hosts = max_hosts,
            idle_timeout_ms = idle_timeout.as_millis() as u64,
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: Cache::builder()
                .max_capacity(max_hosts)
                .time_to_idle(idle_timeout)
                .build(),
            config,
        }
    }

    /// Get or create the breaker for `name` (an upstream host)
    pub fn get_circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.circuit_breakers.get_with(name.to_string(), || {
            debug!(component = name, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(name, self.config.clone()))
        })
    }

    /// Breaker for the host of `url`; unparseable URLs share one breaker
    pub fn for_url(&self, url: &str) -> Arc<CircuitBreaker> {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_else(|| "unknown-host".to_string());
        self.get_circuit_breaker(&host)
    }

    pub fn stats(&self, name: &str) -> Option<CircuitBreakerStats> {
        self.circuit_breakers
            .get(name)
            .map(|breaker| breaker.stats())
    }

    /// Stats for every breaker currently tracked
    pub fn system_stats(&self) -> SystemCircuitBreakerStats {
        let circuit_breakers = self
            .circuit_breakers
            .iter()
            .map(|(name, breaker)| (name.as_ref().clone(), breaker.stats()))
            .collect();

        SystemCircuitBreakerStats {
            circuit_breakers,
            collected_at: Utc::now(),
        }
    }

    /// Close every circuit (operator action)
    pub fn reset_all(&self) {
        info!(count = self.breaker_count(), "Resetting all circuit breakers");
        for (_, breaker) in self.circuit_breakers.iter() {
            breaker.reset();
        }
    }

    /// Breakers currently retained, after pending evictions are applied
    pub fn breaker_count(&self) -> usize {
        self.circuit_breakers.run_pending_tasks();
        self.circuit_breakers.entry_count() as usize
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::for_upstream())
    }
}
