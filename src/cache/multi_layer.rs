//! Multi-layer cache composition
//!
//! Layers are ordered fastest first. Reads walk the layers in order and stop at
//! the first hit; a hit below the first layer is promoted into every faster
//! layer in the background. Writes go to every layer concurrently.
//!
//! A failing layer never fails a read: the error is logged, counted and
//! treated as a miss for that layer. Writes fail only when every layer
//! rejected them.

use super::codec::CacheCodec;
use super::errors::{CacheError, CacheResult};
use super::traits::{CacheLayer, CachedValue, LayerUsage};
use crate::config::CacheConfig;
use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct LayerCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
    write_errors: AtomicU64,
}

#[derive(Debug, Clone)]
struct LayerSlot {
    layer: Arc<dyn CacheLayer>,
    counters: Arc<LayerCounters>,
}

/// Per-layer counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub writes: u64,
    pub write_errors: u64,
    pub hit_rate: f64,
    pub usage: LayerUsage,
}

/// Aggregate counters over every lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiLayerCacheStats {
    pub layers: Vec<LayerStats>,
    /// Lookups served by any layer
    pub hits: u64,
    /// Lookups no layer could serve
    pub misses: u64,
    pub hit_rate: f64,
    pub errors: u64,
    pub promotions: u64,
    pub promotion_failures: u64,
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[derive(Debug)]
pub struct MultiLayerCache {
    layers: Vec<LayerSlot>,
    promotion_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: Arc<AtomicU64>,
    promotion_failures: Arc<AtomicU64>,
}

impl MultiLayerCache {
    /// Compose `layers`, fastest first
    pub fn new(layers: Vec<Arc<dyn CacheLayer>>, promotion_ttl: Duration) -> Self {
        let layers = layers
            .into_iter()
            .map(|layer| LayerSlot {
                layer,
                counters: Arc::new(LayerCounters::default()),
            })
            .collect();

        Self {
            layers,
            promotion_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            promotions: Arc::new(AtomicU64::new(0)),
            promotion_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build the enabled layers from configuration
    ///
    /// An unreachable distributed backend is skipped with a warning rather
    /// than failing startup; it is wrapped in a circuit breaker otherwise.
    pub async fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        let mut layers: Vec<Arc<dyn CacheLayer>> = Vec::new();

        if config.memory.enabled {
            layers.push(Arc::new(super::layers::MemoryCacheLayer::from_config(
                &config.memory,
            )));
        }

        if config.file.enabled {
            layers.push(Arc::new(
                super::layers::FileCacheLayer::from_config(&config.file).await?,
            ));
        }

        if config.distributed.enabled {
            #[cfg(feature = "cache-redis")]
            match super::layers::RedisCacheLayer::from_config(&config.distributed).await {
                Ok(redis) => {
                    let breaker = Arc::new(crate::resilience::CircuitBreaker::new(
                        "cache.distributed",
                        config.distributed.circuit_breaker.to_breaker_config(),
                    ));
                    layers.push(Arc::new(super::CircuitBreakerLayer::new(
                        Arc::new(redis),
                        breaker,
                    )));
                }
                Err(e) => {
                    warn!(error = %e, "Distributed cache unavailable, continuing without it");
                }
            }

            #[cfg(not(feature = "cache-redis"))]
            warn!("Distributed cache enabled but the `cache-redis` feature is not compiled in");
        }

        let cache = Self::new(layers, config.promotion_ttl());
        info!(layers = ?cache.layer_names(), "Multi-layer cache initialized");
        Ok(cache)
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|slot| slot.layer.name()).collect()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Look `key` up layer by layer; errors count as misses
    pub async fn get(&self, key: &str) -> Option<CachedValue> {
        for (index, slot) in self.layers.iter().enumerate() {
            match slot.layer.get(key).await {
                Ok(Some(value)) => {
                    slot.counters.hits.fetch_add(1, Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = key, layer = slot.layer.name(), "Multi-layer cache HIT");
                    if index > 0 {
                        self.promote(key, &value, index);
                    }
                    return Some(value);
                }
                Ok(None) => {
                    slot.counters.misses.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    slot.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        key = key,
                        layer = slot.layer.name(),
                        error = %e,
                        "Cache layer read failed, treating as miss"
                    );
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, "Multi-layer cache MISS");
        None
    }

    /// Copy a hit from layer `found_at` into every faster layer, in the background
    fn promote(&self, key: &str, value: &CachedValue, found_at: usize) {
        let ttl = value
            .ttl_remaining
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or(self.promotion_ttl);
        let targets: Vec<LayerSlot> = self.layers[..found_at].to_vec();
        let key = key.to_string();
        let data = value.data.clone();
        let promotions = Arc::clone(&self.promotions);
        let promotion_failures = Arc::clone(&self.promotion_failures);

        tokio::spawn(async move {
            for slot in targets {
                match slot.layer.set(&key, data.clone(), ttl).await {
                    Ok(()) => {
                        promotions.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            key = %key,
                            layer = slot.layer.name(),
                            ttl_ms = ttl.as_millis() as u64,
                            "Promoted cache entry"
                        );
                    }
                    Err(e) => {
                        promotion_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(key = %key, layer = slot.layer.name(), error = %e, "Cache promotion failed");
                    }
                }
            }
        });
    }

    /// Write `value` to every layer concurrently
    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        if self.layers.is_empty() {
            return Ok(());
        }

        let writes = self
            .layers
            .iter()
            .map(|slot| slot.layer.set(key, value.clone(), ttl));
        let results = join_all(writes).await;

        let mut failures = Vec::new();
        for (slot, result) in self.layers.iter().zip(results) {
            slot.counters.writes.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = result {
                slot.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                failures.push(format!("{}: {e}", slot.layer.name()));
            }
        }

        if failures.len() == self.layers.len() {
            warn!(key = key, failures = ?failures, "Cache write failed on every layer");
            return Err(CacheError::CacheWriteFailure {
                key: key.to_string(),
                failures,
            });
        }

        if !failures.is_empty() {
            warn!(key = key, failures = ?failures, "Cache write partially failed");
        }
        debug!(key = key, ttl_ms = ttl.as_millis() as u64, "Multi-layer cache SET");
        Ok(())
    }

    /// Delete from every layer; true when any layer held the key
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let results = join_all(self.layers.iter().map(|slot| slot.layer.delete(key))).await;
        let (deleted, failures) = self.collect_fan_out("delete", results);

        if !self.layers.is_empty() && failures.len() == self.layers.len() {
            return Err(CacheError::AllLayersFailed {
                operation: "delete".to_string(),
                failures,
            });
        }
        Ok(deleted.into_iter().any(|removed| removed))
    }

    /// Stops at the first layer reporting presence
    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut failures = Vec::new();
        for slot in &self.layers {
            match slot.layer.exists(key).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    slot.counters.errors.fetch_add(1, Ordering::Relaxed);
                    failures.push(format!("{}: {e}", slot.layer.name()));
                }
            }
        }

        if !self.layers.is_empty() && failures.len() == self.layers.len() {
            return Err(CacheError::AllLayersFailed {
                operation: "exists".to_string(),
                failures,
            });
        }
        Ok(false)
    }

    pub async fn clear(&self) -> CacheResult<()> {
        let results = join_all(self.layers.iter().map(|slot| slot.layer.clear())).await;
        let (_, failures) = self.collect_fan_out("clear", results);

        if !self.layers.is_empty() && failures.len() == self.layers.len() {
            return Err(CacheError::AllLayersFailed {
                operation: "clear".to_string(),
                failures,
            });
        }
        Ok(())
    }

    /// `(layer name, healthy)` for every layer; errors report unhealthy
    pub async fn health_check(&self) -> Vec<(String, bool)> {
        let results = join_all(self.layers.iter().map(|slot| slot.layer.health_check())).await;
        self.layers
            .iter()
            .zip(results)
            .map(|(slot, result)| (slot.layer.name().to_string(), result.unwrap_or(false)))
            .collect()
    }

    /// Stop background work in every layer
    pub async fn shutdown(&self) {
        join_all(self.layers.iter().map(|slot| slot.layer.shutdown())).await;
        debug!(layers = ?self.layer_names(), "Multi-layer cache shut down");
    }

    /// Decode a hit through `V`'s codec; an undecodable entry is dropped and
    /// reported as a miss
    pub async fn get_typed<V: CacheCodec>(&self, key: &str) -> Option<V> {
        let value = self.get(key).await?;
        match V::decode(&value.data) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key = key, error = %e, "Discarding undecodable cache entry");
                if let Err(e) = self.delete(key).await {
                    warn!(key = key, error = %e, "Failed to remove undecodable cache entry");
                }
                None
            }
        }
    }

    pub async fn set_typed<V: CacheCodec>(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.set(key, value.encode()?, ttl).await
    }

    pub fn stats(&self) -> MultiLayerCacheStats {
        let layers: Vec<LayerStats> = self
            .layers
            .iter()
            .map(|slot| {
                let hits = slot.counters.hits.load(Ordering::Relaxed);
                let misses = slot.counters.misses.load(Ordering::Relaxed);
                LayerStats {
                    name: slot.layer.name().to_string(),
                    hits,
                    misses,
                    errors: slot.counters.errors.load(Ordering::Relaxed),
                    writes: slot.counters.writes.load(Ordering::Relaxed),
                    write_errors: slot.counters.write_errors.load(Ordering::Relaxed),
                    hit_rate: hit_rate(hits, misses),
                    usage: slot.layer.usage(),
                }
            })
            .collect();

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        MultiLayerCacheStats {
            errors: layers.iter().map(|layer| layer.errors + layer.write_errors).sum(),
            layers,
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            promotions: self.promotions.load(Ordering::Relaxed),
            promotion_failures: self.promotion_failures.load(Ordering::Relaxed),
        }
    }

    fn collect_fan_out<T>(
        &self,
        operation: &str,
        results: Vec<CacheResult<T>>,
    ) -> (Vec<T>, Vec<String>) {
        let mut values = Vec::new();
        let mut failures = Vec::new();
        for (slot, result) in self.layers.iter().zip(results) {
            match result {
                Ok(value) => values.push(value),
                Err(e) => {
                    slot.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        operation = operation,
                        layer = slot.layer.name(),
                        error = %e,
                        "Cache layer operation failed"
                    );
                    failures.push(format!("{}: {e}", slot.layer.name()));
                }
            }
        }
        (values, failures)
    }
}
