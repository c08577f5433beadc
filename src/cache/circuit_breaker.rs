//! Circuit breaker protected cache layer
//!
//! Wraps a remote [`CacheLayer`] so an unavailable backend costs one fast
//! rejection instead of a timeout on every request. When the circuit is open:
//!
//! - `get()` returns `Ok(None)` (cache miss)
//! - `set()` returns `Ok(())` (no-op)
//! - `delete()` / `exists()` return `Ok(false)`
//! - `health_check()` returns `Ok(false)`
//!
//! Errors from the inner layer are recorded as failures and still propagated,
//! the [`MultiLayerCache`](super::MultiLayerCache) counts them as misses.

use super::errors::CacheResult;
use super::traits::{CacheLayer, CachedValue, LayerUsage};
use crate::resilience::{CircuitBreaker, CircuitState};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    inner: Arc<dyn CacheLayer>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerLayer {
    pub fn new(inner: Arc<dyn CacheLayer>, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            inner,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Run `operation` on the inner layer, or return `open_value` when the
    /// circuit rejects the call
    async fn guarded<T, F, Fut>(&self, op: &str, open_value: T, operation: F) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = CacheResult<T>>,
    {
        let Some(permit) = self.circuit_breaker.acquire() else {
            debug!(
                layer = self.inner.name(),
                operation = op,
                "Cache circuit open, skipping layer"
            );
            return Ok(open_value);
        };

        let result = operation().await;
        match &result {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }
        result
    }
}

#[async_trait]
impl CacheLayer for CircuitBreakerLayer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CachedValue>> {
        self.guarded("get", None, || self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        self.guarded("set", (), || self.inner.set(key, value, ttl))
            .await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.guarded("delete", false, || self.inner.delete(key))
            .await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.guarded("exists", false, || self.inner.exists(key))
            .await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.guarded("clear", (), || self.inner.clear()).await
    }

    async fn health_check(&self) -> CacheResult<bool> {
        if self.circuit_breaker.state() == CircuitState::Open {
            return Ok(false);
        }
        self.inner.health_check().await
    }

    fn usage(&self) -> LayerUsage {
        self.inner.usage()
    }

    fn is_distributed(&self) -> bool {
        self.inner.is_distributed()
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::errors::CacheError;
    use crate::cache::layers::MemoryCacheLayer;
    use crate::resilience::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FailingLayer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheLayer for FailingLayer {
        fn name(&self) -> &str {
            "failing"
        }

        async fn get(&self, _key: &str) -> CacheResult<Option<CachedValue>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Timeout("get".to_string()))
        }

        async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> CacheResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Timeout("set".to_string()))
        }

        async fn delete(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Timeout("delete".to_string()))
        }

        async fn exists(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Timeout("exists".to_string()))
        }

        async fn clear(&self) -> CacheResult<()> {
            Ok(())
        }
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "cache",
            CircuitBreakerConfig {
                failure_threshold: 50.0,
                minimum_requests: 3,
                reset_timeout: Duration::from_secs(30),
                monitoring_period: Duration::from_secs(60),
            },
        ))
    }

    #[tokio::test]
    async fn test_passes_through_when_closed() {
        let layer = CircuitBreakerLayer::new(Arc::new(MemoryCacheLayer::new(1024)), breaker());
        layer
            .set("resource:a", Bytes::from_static(b"x"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(layer.get("resource:a").await.unwrap().is_some());
        assert_eq!(layer.circuit_state(), CircuitState::Closed);
        assert_eq!(layer.name(), "memory");
    }

    #[tokio::test]
    async fn test_open_circuit_short_circuits_inner_layer() {
        let inner = Arc::new(FailingLayer::default());
        let layer = CircuitBreakerLayer::new(inner.clone(), breaker());

        for _ in 0..3 {
            assert!(layer.get("resource:a").await.is_err());
        }
        assert_eq!(layer.circuit_state(), CircuitState::Open);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);

        // Miss and no-op while open, without touching the backend
        assert_eq!(layer.get("resource:a").await.unwrap(), None);
        layer
            .set("resource:a", Bytes::from_static(b"x"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!layer.exists("resource:a").await.unwrap());
        assert!(!layer.health_check().await.unwrap());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }
}
