//! # Pixelgate Configuration System
//!
//! Layered configuration built with the `config` crate:
//!
//! 1. `config/pixelgate.toml`, the base file
//! 2. `config/environments/{environment}.toml`, optional overrides
//! 3. `PIXELGATE__SECTION__KEY` environment variables
//!
//! All durations are expressed in milliseconds (`*_ms`) in the files and converted
//! to [`Duration`] by the accessor methods.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pixelgate_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let fetch_timeout = manager.config().fetch.timeout();
//! let transform_workers = manager.config().transform.max_concurrent;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{limits, DEFAULT_PRIVATE_TTL, DEFAULT_PUBLIC_TTL};
use crate::resilience::{
    CircuitBreakerConfig, DeduplicatorConfig, DEFAULT_BREAKER_IDLE_TIMEOUT,
    DEFAULT_MAX_TRACKED_HOSTS,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `pixelgate.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PixelgateConfig {
    /// Artifact storage on the local filesystem
    pub storage: StorageConfig,

    /// Cache tiers
    pub cache: CacheConfig,

    /// Upstream HTTP fetching
    pub fetch: FetchConfig,

    /// Circuit breaker guarding upstream fetches (one breaker per host)
    pub circuit_breaker: CircuitBreakerSettings,

    /// Bounds on the per-host breaker registry
    pub breaker_registry: BreakerRegistrySettings,

    /// Single-flight request coalescing
    pub deduplication: DeduplicationSettings,

    /// Image transform worker pool
    pub transform: TransformConfig,

    /// Default TTLs written into resource metadata
    pub metadata: MetadataConfig,

    /// Request limits enforced by the default validator
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `{identity}.rsc|.rsm|.rst` artifacts
    pub root_dir: PathBuf,

    /// Asset served when the upstream is unavailable
    pub default_asset_path: PathBuf,

    /// Age after which orphaned temp files and artifacts are reaped by
    /// `ResourceResolutionOperation::cleanup_stale_artifacts`
    pub stale_after_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("storage/resources"),
            default_asset_path: PathBuf::from("storage/default.png"),
            stale_after_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

impl StorageConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used when the pipeline populates the cache
    pub default_ttl_ms: u64,

    /// TTL for promoted entries when the source tier cannot report one
    pub promotion_ttl_ms: u64,

    pub memory: MemoryLayerConfig,
    pub file: FileLayerConfig,
    pub distributed: DistributedLayerConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 60 * 60 * 1000,
            promotion_ttl_ms: 5 * 60 * 1000,
            memory: MemoryLayerConfig::default(),
            file: FileLayerConfig::default(),
            distributed: DistributedLayerConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn promotion_ttl(&self) -> Duration {
        Duration::from_millis(self.promotion_ttl_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryLayerConfig {
    pub enabled: bool,
    /// Weighted capacity in bytes of cached values
    pub max_capacity_bytes: u64,
}

impl Default for MemoryLayerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileLayerConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    /// Interval of the active expiry sweep, 0 disables it
    pub sweep_interval_ms: u64,
}

impl Default for FileLayerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("storage/cache"),
            sweep_interval_ms: 10 * 60 * 1000,
        }
    }
}

impl FileLayerConfig {
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DistributedLayerConfig {
    pub enabled: bool,
    pub url: String,
    /// Prepended to every key, isolates deployments sharing one backend
    pub key_prefix: String,
    /// Per-operation timeout
    pub timeout_ms: u64,
    /// Extra attempts after a failed operation
    pub retries: u32,
    /// Breaker protecting the backend from repeated timeout penalties
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for DistributedLayerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "pixelgate".to_string(),
            timeout_ms: 250,
            retries: 1,
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 50.0,
                minimum_requests: 10,
                reset_timeout_ms: 15_000,
                monitoring_period_ms: 60_000,
            },
        }
    }
}

impl DistributedLayerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            user_agent: format!("pixelgate/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 5,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// File representation of a circuit breaker's settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Failure percentage (0-100) over the window that trips the breaker
    pub failure_threshold: f64,
    /// Outcomes the window must hold before the breaker may trip
    pub minimum_requests: u32,
    pub reset_timeout_ms: u64,
    pub monitoring_period_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            minimum_requests: defaults.minimum_requests,
            reset_timeout_ms: defaults.reset_timeout.as_millis() as u64,
            monitoring_period_ms: defaults.monitoring_period.as_millis() as u64,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            minimum_requests: self.minimum_requests,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            monitoring_period: Duration::from_millis(self.monitoring_period_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerRegistrySettings {
    /// Upper bound of upstream hosts with a live breaker
    pub max_hosts: u64,
    /// Breakers unused for this long are dropped
    pub idle_timeout_ms: u64,
}

impl Default for BreakerRegistrySettings {
    fn default() -> Self {
        Self {
            max_hosts: DEFAULT_MAX_TRACKED_HOSTS,
            idle_timeout_ms: DEFAULT_BREAKER_IDLE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl BreakerRegistrySettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// File representation of the deduplicator's settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeduplicationSettings {
    pub grace_delay_ms: u64,
    pub max_pending_age_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for DeduplicationSettings {
    fn default() -> Self {
        let defaults = DeduplicatorConfig::default();
        Self {
            grace_delay_ms: defaults.grace_delay.as_millis() as u64,
            max_pending_age_ms: defaults.max_pending_age.as_millis() as u64,
            sweep_interval_ms: defaults.sweep_interval.as_millis() as u64,
        }
    }
}

impl DeduplicationSettings {
    pub fn to_deduplicator_config(&self) -> DeduplicatorConfig {
        DeduplicatorConfig {
            grace_delay: Duration::from_millis(self.grace_delay_ms),
            max_pending_age: Duration::from_millis(self.max_pending_age_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Upper bound of concurrently running transforms
    pub max_concurrent: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_concurrent: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub private_ttl_ms: u64,
    pub public_ttl_ms: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            private_ttl_ms: DEFAULT_PRIVATE_TTL.as_millis() as u64,
            public_ttl_ms: DEFAULT_PUBLIC_TTL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_width: u64,
    pub max_height: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_width: limits::MAX_RESIZE_WIDTH,
            max_height: limits::MAX_RESIZE_HEIGHT,
        }
    }
}

impl LimitsConfig {
    /// Largest accepted `width * height`
    pub fn max_pixels(&self) -> u64 {
        self.max_width.saturating_mul(self.max_height)
    }
}

impl PixelgateConfig {
    /// Validate cross-field constraints the type system cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        self.circuit_breaker
            .to_breaker_config()
            .validate()
            .map_err(|e| ConfigurationError::validation_error(format!("circuit_breaker: {e}")))?;

        if self.cache.distributed.enabled {
            self.cache
                .distributed
                .circuit_breaker
                .to_breaker_config()
                .validate()
                .map_err(|e| {
                    ConfigurationError::validation_error(format!(
                        "cache.distributed.circuit_breaker: {e}"
                    ))
                })?;

            if self.cache.distributed.url.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    "cache.distributed.url",
                    "",
                    "a URL is required when the distributed layer is enabled",
                ));
            }
        }

        self.deduplication
            .to_deduplicator_config()
            .validate()
            .map_err(|e| ConfigurationError::validation_error(format!("deduplication: {e}")))?;

        if self.breaker_registry.max_hosts == 0 || self.breaker_registry.idle_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "breaker_registry",
                format!(
                    "max_hosts={} idle_timeout_ms={}",
                    self.breaker_registry.max_hosts, self.breaker_registry.idle_timeout_ms
                ),
                "breaker registry bounds must be non-zero",
            ));
        }

        if self.transform.max_concurrent == 0 {
            return Err(ConfigurationError::invalid_value(
                "transform.max_concurrent",
                "0",
                "at least one transform worker is required",
            ));
        }

        if self.fetch.timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "fetch.timeout_ms",
                "0",
                "fetch timeout must be greater than 0",
            ));
        }

        if self.cache.default_ttl_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.default_ttl_ms",
                "0",
                "cache TTL must be greater than 0",
            ));
        }

        if self.limits.max_width == 0 || self.limits.max_height == 0 {
            return Err(ConfigurationError::invalid_value(
                "limits",
                format!("{}x{}", self.limits.max_width, self.limits.max_height),
                "resize limits must be non-zero",
            ));
        }

        let enabled_layers = [
            self.cache.memory.enabled,
            self.cache.file.enabled,
            self.cache.distributed.enabled,
        ];
        if !enabled_layers.iter().any(|enabled| *enabled) {
            return Err(ConfigurationError::validation_error(
                "at least one cache layer must be enabled",
            ));
        }

        Ok(())
    }
}
