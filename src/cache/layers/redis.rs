//! Distributed cache layer backed by Redis
//!
//! Uses `redis::aio::ConnectionManager` for async multiplexed connections with
//! automatic reconnection. Every operation runs under its own timeout and is
//! retried a configured number of times, so a slow backend costs a bounded
//! latency penalty. Requires the `cache-redis` feature flag.

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::{CacheLayer, CachedValue};
use crate::config::loader::redact_url;
use crate::config::DistributedLayerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::RedisResult;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Redis-backed cache layer
#[derive(Clone)]
pub struct RedisCacheLayer {
    connection_manager: ConnectionManager,
    key_prefix: String,
    timeout: Duration,
    retries: u32,
}

impl std::fmt::Debug for RedisCacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheLayer")
            .field("connection_manager", &"ConnectionManager")
            .field("key_prefix", &self.key_prefix)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .finish()
    }
}

impl RedisCacheLayer {
    /// Connect using the distributed layer configuration
    pub async fn from_config(config: &DistributedLayerConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            CacheError::ConnectionError(format!("Failed to create Redis client: {e}"))
        })?;

        let connection_manager = tokio::time::timeout(
            config.timeout().max(Duration::from_secs(1)),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| CacheError::Timeout("Redis connect".to_string()))?
        .map_err(|e| CacheError::ConnectionError(format!("Failed to connect to Redis: {e}")))?;

        debug!(url = %redact_url(&config.url), "Redis cache layer connected");

        Ok(Self {
            connection_manager,
            key_prefix: config.key_prefix.clone(),
            timeout: config.timeout(),
            retries: config.retries,
        })
    }

    fn prefixed(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.key_prefix)
        }
    }

    /// Run `command` with the per-operation timeout, retrying on failure
    async fn run<T, F, Fut>(&self, operation: &str, command: F) -> CacheResult<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let mut last_error = CacheError::BackendError(format!("Redis {operation} not attempted"));

        for attempt in 0..=self.retries {
            match tokio::time::timeout(self.timeout, command(self.connection_manager.clone())).await
            {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    last_error = CacheError::BackendError(format!("Redis {operation} failed: {e}"));
                }
                Err(_) => {
                    last_error = CacheError::Timeout(format!(
                        "Redis {operation} exceeded {}ms",
                        self.timeout.as_millis()
                    ));
                }
            }

            if attempt < self.retries {
                debug!(
                    operation = operation,
                    attempt = attempt + 1,
                    error = %last_error,
                    "Retrying Redis operation"
                );
            }
        }

        warn!(operation = operation, error = %last_error, "Redis operation failed");
        Err(last_error)
    }
}

#[async_trait]
impl CacheLayer for RedisCacheLayer {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CachedValue>> {
        let full_key = self.prefixed(key);
        let (value, pttl): (Option<Vec<u8>>, i64) = self
            .run("GET", |mut conn| {
                let full_key = full_key.clone();
                async move {
                    redis::pipe()
                        .cmd("GET")
                        .arg(&full_key)
                        .cmd("PTTL")
                        .arg(&full_key)
                        .query_async(&mut conn)
                        .await
                }
            })
            .await?;

        match value {
            Some(data) => {
                debug!(key = key, "Cache HIT (redis)");
                // PTTL is -1 without expiry and -2 when the key vanished in between
                let ttl_remaining = (pttl > 0).then(|| Duration::from_millis(pttl as u64));
                Ok(Some(CachedValue::new(Bytes::from(data), ttl_remaining)))
            }
            None => {
                debug!(key = key, "Cache MISS (redis)");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        let full_key = self.prefixed(key);
        let ttl_ms = ttl.as_millis().max(1) as u64;

        self.run("SET", |mut conn| {
            let full_key = full_key.clone();
            let value = value.clone();
            async move {
                redis::cmd("SET")
                    .arg(&full_key)
                    .arg(value.as_ref())
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async::<()>(&mut conn)
                    .await
            }
        })
        .await?;

        debug!(key = key, ttl_ms = ttl_ms, "Cache SET (redis)");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.prefixed(key);
        let deleted: u64 = self
            .run("DEL", |mut conn| {
                let full_key = full_key.clone();
                async move { redis::cmd("DEL").arg(&full_key).query_async(&mut conn).await }
            })
            .await?;

        debug!(key = key, deleted = deleted, "Cache DEL (redis)");
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.prefixed(key);
        let count: u64 = self
            .run("EXISTS", |mut conn| {
                let full_key = full_key.clone();
                async move { redis::cmd("EXISTS").arg(&full_key).query_async(&mut conn).await }
            })
            .await?;
        Ok(count > 0)
    }

    async fn clear(&self) -> CacheResult<()> {
        let pattern = self.prefixed("*");
        let mut conn = self.connection_manager.clone();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        // SCAN avoids blocking the server; only keys under our prefix are touched
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::BackendError(format!("Redis SCAN failed: {e}")))?;

            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| {
                        CacheError::BackendError(format!("Redis DEL (batch) failed: {e}"))
                    })?;
                deleted += count;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, deleted = deleted, "Cache CLEAR (redis)");
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let pong: String = self
            .run("PING", |mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        Ok(pong == "PONG")
    }

    fn is_distributed(&self) -> bool {
        true
    }
}
