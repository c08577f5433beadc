//! In-process cache layer using Moka
//!
//! Fastest tier, private to the process. Entries carry their own TTL through a
//! Moka [`Expiry`] policy, and capacity is weighted by value size in bytes so a
//! few large images cannot crowd the process out of memory.

use crate::cache::errors::CacheResult;
use crate::cache::traits::{CacheLayer, CachedValue, LayerUsage};
use crate::config::MemoryLayerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A value held by the memory layer plus its access bookkeeping
#[derive(Debug)]
pub struct CacheEntry {
    value: Bytes,
    ttl: Duration,
    created_at: Instant,
    created_at_utc: DateTime<Utc>,
    last_accessed: Mutex<DateTime<Utc>>,
    access_count: AtomicU64,
    size: usize,
}

impl CacheEntry {
    fn new(value: Bytes, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            size: value.len(),
            value,
            ttl,
            created_at: Instant::now(),
            created_at_utc: now,
            last_accessed: Mutex::new(now),
            access_count: AtomicU64::new(0),
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }

    fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.created_at.elapsed())
    }

    fn touch(&self) {
        *self.last_accessed.lock() = Utc::now();
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheEntrySnapshot {
        CacheEntrySnapshot {
            ttl: self.ttl,
            created_at: self.created_at_utc,
            last_accessed: *self.last_accessed.lock(),
            access_count: self.access_count.load(Ordering::Relaxed),
            size: self.size,
        }
    }
}

/// Read-only view of a [`CacheEntry`]'s bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntrySnapshot {
    pub ttl: Duration,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub size: usize,
}

/// Per-entry TTL; an update restarts the clock with the new entry's TTL
struct EntryExpiry;

impl Expiry<String, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory cache layer
#[derive(Clone)]
pub struct MemoryCacheLayer {
    cache: Cache<String, Arc<CacheEntry>>,
    max_capacity_bytes: u64,
}

impl std::fmt::Debug for MemoryCacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheLayer")
            .field("max_capacity_bytes", &self.max_capacity_bytes)
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

impl MemoryCacheLayer {
    pub fn from_config(config: &MemoryLayerConfig) -> Self {
        Self::new(config.max_capacity_bytes)
    }

    /// Create a layer holding at most `max_capacity_bytes` of values
    pub fn new(max_capacity_bytes: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity_bytes)
            .weigher(|_key: &String, entry: &Arc<CacheEntry>| -> u32 {
                u32::try_from(entry.size).unwrap_or(u32::MAX)
            })
            .expire_after(EntryExpiry)
            .build();

        debug!(
            max_capacity_bytes = max_capacity_bytes,
            "Memory cache layer created"
        );

        Self {
            cache,
            max_capacity_bytes,
        }
    }

    /// Bookkeeping for a live entry, without counting as an access
    pub async fn entry(&self, key: &str) -> Option<CacheEntrySnapshot> {
        self.cache
            .get(key)
            .await
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.snapshot())
    }

    /// Apply pending evictions and expirations now
    pub async fn purge_expired(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl CacheLayer for MemoryCacheLayer {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CachedValue>> {
        let Some(entry) = self.cache.get(key).await else {
            debug!(key = key, "Cache MISS (memory)");
            return Ok(None);
        };

        if entry.is_expired() {
            self.cache.invalidate(key).await;
            debug!(key = key, "Cache MISS (memory, expired)");
            return Ok(None);
        }

        entry.touch();
        debug!(key = key, "Cache HIT (memory)");
        Ok(Some(CachedValue::new(
            entry.value.clone(),
            Some(entry.remaining_ttl()),
        )))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        if ttl.is_zero() {
            self.cache.invalidate(key).await;
            return Ok(());
        }

        let size = value.len();
        self.cache
            .insert(key.to_string(), Arc::new(CacheEntry::new(value, ttl)))
            .await;

        debug!(
            key = key,
            size = size,
            ttl_ms = ttl.as_millis() as u64,
            "Cache SET (memory)"
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let removed = self.cache.remove(key).await;
        debug!(key = key, removed = removed.is_some(), "Cache DEL (memory)");
        Ok(removed.is_some_and(|entry| !entry.is_expired()))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self
            .cache
            .get(key)
            .await
            .is_some_and(|entry| !entry.is_expired()))
    }

    async fn clear(&self) -> CacheResult<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        debug!("Cache CLEAR (memory)");
        Ok(())
    }

    fn usage(&self) -> LayerUsage {
        LayerUsage {
            entry_count: Some(self.cache.entry_count()),
            size_bytes: Some(self.cache.weighted_size()),
        }
    }
}
