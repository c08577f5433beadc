//! Cache layer trait definition
//!
//! Every tier (memory, file, distributed) stores opaque bytes. Typed values are
//! (de)serialized once, at the [`MultiLayerCache`](super::MultiLayerCache) edge.

use super::errors::CacheResult;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A value read back from a layer
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub data: Bytes,
    /// Remaining time to live, when the layer can tell
    pub ttl_remaining: Option<Duration>,
}

impl CachedValue {
    pub fn new(data: Bytes, ttl_remaining: Option<Duration>) -> Self {
        Self {
            data,
            ttl_remaining,
        }
    }
}

/// Occupancy figures a layer reports about itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerUsage {
    pub entry_count: Option<u64>,
    pub size_bytes: Option<u64>,
}

/// Uniform contract implemented by every cache tier
///
/// Layers must be safe to call concurrently; the composed cache fans writes out
/// to all layers at once.
#[async_trait]
pub trait CacheLayer: Send + Sync + std::fmt::Debug {
    /// Short, stable name used in logs and stats (`memory`, `file`, `redis`)
    fn name(&self) -> &str;

    /// Returns `Ok(Some(value))` on hit, `Ok(None)` on miss or expiry
    async fn get(&self, key: &str) -> CacheResult<Option<CachedValue>>;

    /// Store `value` for `ttl`, replacing any previous value
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()>;

    /// Returns whether an entry was removed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Remove every entry owned by this layer
    async fn clear(&self) -> CacheResult<()>;

    /// Check if the layer backend is reachable
    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn usage(&self) -> LayerUsage {
        LayerUsage::default()
    }

    /// Whether the layer involves network calls
    fn is_distributed(&self) -> bool {
        false
    }

    /// Stop background work owned by the layer (expiry sweeps and the like)
    async fn shutdown(&self) {}
}
