//! Pipeline assembly for integration tests

#![allow(dead_code)]

use super::mocks::{CountingTransformer, MockFetcher};
use pixelgate_core::cache::layers::{FileCacheLayer, MemoryCacheLayer};
use pixelgate_core::cache::{CacheLayer, MultiLayerCache};
use pixelgate_core::resilience::{
    CircuitBreakerConfig, CircuitBreakerManager, DeduplicatorConfig, RequestDeduplicator,
};
use pixelgate_core::resource::{
    DefaultRequestValidator, ProcessingRequest, ResolutionComponents, ResolutionSettings,
    ResourceResolutionOperation, ResourceStorage, TransformPool,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const DEFAULT_ASSET: &[u8] = b"\x89PNG\r\n\x1a\ndefault-asset";

/// Breaker tuned so five failed fetches open it
pub fn test_breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 5.0,
        minimum_requests: 5,
        reset_timeout: Duration::from_millis(200),
        monitoring_period: Duration::from_secs(10),
    }
}

pub fn test_dedup_config() -> DeduplicatorConfig {
    DeduplicatorConfig {
        grace_delay: Duration::from_millis(10),
        max_pending_age: Duration::from_secs(5),
        sweep_interval: Duration::from_secs(1),
    }
}

pub fn image_request(name: &str) -> ProcessingRequest {
    ProcessingRequest::new(format!("https://images.example.com/{name}.png"))
}

/// A fully wired operation over mock collaborators and temp directories
pub struct TestPipeline {
    pub operation: ResourceResolutionOperation,
    pub fetcher: Arc<MockFetcher>,
    pub transformer: Arc<CountingTransformer>,
    pub memory: Arc<MemoryCacheLayer>,
    pub file: Arc<FileCacheLayer>,
    pub storage: ResourceStorage,
    pub default_asset: PathBuf,
    _dir: TempDir,
}

impl TestPipeline {
    pub async fn new() -> Self {
        Self::with_extra_layers(Vec::new(), true).await
    }

    pub async fn without_default_asset() -> Self {
        Self::with_extra_layers(Vec::new(), false).await
    }

    /// `extra` layers are appended after memory and file
    pub async fn with_extra_layers(extra: Vec<Arc<dyn CacheLayer>>, default_asset: bool) -> Self {
        Self::build(extra, default_asset, test_dedup_config()).await
    }

    pub async fn with_dedup_config(dedup: DeduplicatorConfig) -> Self {
        Self::build(Vec::new(), true, dedup).await
    }

    async fn build(
        extra: Vec<Arc<dyn CacheLayer>>,
        default_asset: bool,
        dedup: DeduplicatorConfig,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let default_asset_path = dir.path().join("default.png");
        if default_asset {
            tokio::fs::write(&default_asset_path, DEFAULT_ASSET)
                .await
                .unwrap();
        }

        let fetcher = Arc::new(MockFetcher::png());
        let transformer = Arc::new(CountingTransformer::default());
        let memory = Arc::new(MemoryCacheLayer::new(16 * 1024 * 1024));
        let file = Arc::new(
            FileCacheLayer::new(dir.path().join("cache"))
                .await
                .unwrap(),
        );

        let mut layers: Vec<Arc<dyn CacheLayer>> = vec![memory.clone(), file.clone()];
        layers.extend(extra);

        let storage = ResourceStorage::new(dir.path().join("resources"))
            .await
            .unwrap();

        let components = ResolutionComponents {
            validator: Arc::new(DefaultRequestValidator::default()),
            fetcher: fetcher.clone(),
            transform_pool: TransformPool::new(transformer.clone(), 2),
            cache: Arc::new(MultiLayerCache::new(layers, Duration::from_secs(60))),
            circuit_breakers: Arc::new(CircuitBreakerManager::new(test_breaker_config())),
            deduplicator: Arc::new(RequestDeduplicator::new(dedup)),
            storage: storage.clone(),
            settings: ResolutionSettings {
                cache_ttl: Duration::from_secs(60),
                private_ttl: Duration::from_secs(3600),
                public_ttl: Duration::from_secs(86_400),
                default_asset_path: Some(default_asset_path.clone()),
                stale_after: Duration::from_secs(3600),
            },
        };

        Self {
            operation: ResourceResolutionOperation::new(components),
            fetcher,
            transformer,
            memory,
            file,
            storage,
            default_asset: default_asset_path,
            _dir: dir,
        }
    }

    /// Download and transform files left behind in the storage root
    pub fn staged_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.storage.root())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "rst"))
            .collect()
    }

    /// Wait out the deduplicator's grace delay so the next call starts fresh
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
