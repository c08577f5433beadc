//! # Resilience Module
//!
//! Fault tolerance for the resolution pipeline:
//!
//! - **Circuit Breakers**: isolate failing upstream hosts and remote cache tiers
//! - **Request Deduplication**: coalesce concurrent work for the same identity
//! - **Metrics**: point-in-time breaker snapshots for health reporting
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pixelgate_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 50.0,
//!     minimum_requests: 5,
//!     reset_timeout: Duration::from_secs(30),
//!     monitoring_period: Duration::from_secs(60),
//! };
//!
//! let circuit_breaker = CircuitBreaker::new("images.example.com", config);
//!
//! let body = circuit_breaker
//!     .call_with_fallback(
//!         || async { Ok::<&str, String>("origin bytes") },
//!         |_reason| async { Ok("default asset") },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod deduplicator;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::{CircuitBreakerConfig, DeduplicatorConfig};
pub use deduplicator::{DeduplicationError, DeduplicationStats, RequestDeduplicator};
pub use manager::{CircuitBreakerManager, DEFAULT_BREAKER_IDLE_TIMEOUT, DEFAULT_MAX_TRACKED_HOSTS};
pub use metrics::{CircuitBreakerStats, SystemCircuitBreakerStats};
