//! # Resource Resolution Operation
//!
//! The pipeline behind every image request:
//!
//! ```text
//! validate -> identity -> dedup ┬-> cache hit ---------------------------------> resolved
//!                               └-> breaker(fetch + persist .rst | default asset)
//!                                   -> transform -> publish .rsc -> metadata .rsm
//!                                   -> cache populate
//! ```
//!
//! Everything after identity runs inside one deduplicated execution per
//! identity, so concurrent identical requests share a single fetch and a single
//! transform. The leader's work is spawned and survives caller cancellation,
//! but is bounded by the deduplicator's leader deadline so it never overlaps a
//! replacement leader for the same identity.
//!
//! The breaker guards the whole download, body included: an upstream that
//! sends headers and then stalls or breaks off counts as a failure.
//!
//! When the upstream fails or its circuit is open, the configured default asset
//! is served as-is. It is neither transformed nor cached under the request
//! identity, so the real image is fetched again once the upstream recovers.

use crate::cache::{
    decode_framed, encode_framed, CacheCodec, CacheKeyStrategy, CacheResult, MultiLayerCache,
};
use crate::config::PixelgateConfig;
use crate::constants::namespaces;
use crate::identity::RequestIdentity;
use crate::resilience::{CircuitBreakerError, CircuitBreakerManager, RequestDeduplicator};
use crate::resource::{
    load_default_asset, CleanupReport, DefaultRequestValidator, FetchError, FetchedResource,
    HttpResourceFetcher, ImageFormat, ImageTransformer, PersistError, ProcessingRequest,
    RequestValidator, ResolutionContext, ResolutionError, ResourceFetcher, ResourceMetaData,
    ResourceStorage, StagingPaths, TransformPool,
};
use bytes::Bytes;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Content and metadata as stored in the cache tiers:
/// the metadata JSON frames the raw artifact bytes
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResource {
    pub metadata: ResourceMetaData,
    pub content: Bytes,
}

impl CacheCodec for CachedResource {
    fn encode(&self) -> CacheResult<Bytes> {
        encode_framed(&self.metadata, &self.content)
    }

    fn decode(data: &Bytes) -> CacheResult<Self> {
        let (metadata, content) = decode_framed(data)?;
        Ok(Self { metadata, content })
    }
}

/// Where a resolved resource came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    /// Served from a cache tier
    Hit,
    /// Fetched and transformed for this request
    Miss,
    /// Default asset served in place of an unavailable upstream
    Fallback,
}

/// A resolved artifact ready to be written to an HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
    pub identity: RequestIdentity,
    /// Artifact on disk (the default asset for fallbacks)
    pub path: PathBuf,
    pub content: Bytes,
    pub metadata: ResourceMetaData,
    pub etag: String,
    pub source: ResolutionSource,
}

impl ResolvedResource {
    fn new(
        identity: RequestIdentity,
        path: PathBuf,
        content: Bytes,
        metadata: ResourceMetaData,
        source: ResolutionSource,
    ) -> Self {
        let etag = metadata.etag();
        Self {
            identity,
            path,
            content,
            metadata,
            etag,
            source,
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.metadata.content_type()
    }

    pub fn content_length(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn last_modified(&self) -> String {
        self.metadata.last_modified()
    }

    pub fn cache_control(&self) -> String {
        self.metadata.cache_control()
    }

    /// Whether a `304 Not Modified` may be sent instead of the body
    pub fn is_not_modified(&self, if_none_match: Option<&str>) -> bool {
        self.metadata.is_not_modified(if_none_match)
    }
}

pub type ResolutionOutcome = Result<ResolvedResource, ResolutionError>;

/// Pipeline tunables
#[derive(Debug, Clone)]
pub struct ResolutionSettings {
    /// TTL of populated cache entries
    pub cache_ttl: Duration,
    pub private_ttl: Duration,
    pub public_ttl: Duration,
    /// Served when the upstream is unavailable; `None` surfaces the fetch error
    pub default_asset_path: Option<PathBuf>,
    /// Age past which [`ResourceResolutionOperation::cleanup_stale_artifacts`]
    /// reaps files
    pub stale_after: Duration,
}

impl ResolutionSettings {
    pub fn from_config(config: &PixelgateConfig) -> Self {
        Self {
            cache_ttl: config.cache.default_ttl(),
            private_ttl: Duration::from_millis(config.metadata.private_ttl_ms),
            public_ttl: Duration::from_millis(config.metadata.public_ttl_ms),
            default_asset_path: Some(config.storage.default_asset_path.clone()),
            stale_after: config.storage.stale_after(),
        }
    }
}

/// Collaborators the operation is assembled from
#[derive(Debug)]
pub struct ResolutionComponents {
    pub validator: Arc<dyn RequestValidator>,
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub transform_pool: TransformPool,
    pub cache: Arc<MultiLayerCache>,
    pub circuit_breakers: Arc<CircuitBreakerManager>,
    pub deduplicator: Arc<RequestDeduplicator<ResolutionOutcome>>,
    pub storage: ResourceStorage,
    pub settings: ResolutionSettings,
}

impl ResolutionComponents {
    /// Build every collaborator from configuration; the transformer is the
    /// only piece supplied by the host service
    pub async fn from_config(
        config: &PixelgateConfig,
        transformer: Arc<dyn ImageTransformer>,
    ) -> Result<Self, ResolutionError> {
        let fetcher = HttpResourceFetcher::from_config(&config.fetch)?;
        let cache = MultiLayerCache::from_config(&config.cache).await?;
        let storage = ResourceStorage::new(config.storage.root_dir.clone()).await?;

        let deduplicator = RequestDeduplicator::new(config.deduplication.to_deduplicator_config());
        deduplicator.start_sweep();

        info!(
            layers = ?cache.layer_names(),
            storage_root = %storage.root().display(),
            transform_workers = config.transform.max_concurrent,
            "Resolution components initialized"
        );

        Ok(Self {
            validator: Arc::new(DefaultRequestValidator::from_config(&config.limits)),
            fetcher: Arc::new(fetcher),
            transform_pool: TransformPool::new(transformer, config.transform.max_concurrent),
            cache: Arc::new(cache),
            circuit_breakers: Arc::new(CircuitBreakerManager::with_limits(
                config.circuit_breaker.to_breaker_config(),
                config.breaker_registry.max_hosts,
                config.breaker_registry.idle_timeout(),
            )),
            deduplicator: Arc::new(deduplicator),
            storage,
            settings: ResolutionSettings::from_config(config),
        })
    }
}

/// What the guarded fetch produced
enum FetchOutcome {
    /// Upstream body persisted to the execution's download file
    Upstream { received: u64 },
    /// A success response with no readable body
    Empty,
    /// The body arrived but could not be written locally
    StoreFailed(ResolutionError),
    Fallback(PathBuf, FetchedResource),
}

/// Removes an execution's staging files once it ends, including when the
/// execution is dropped at its deadline
struct StagingGuard {
    storage: ResourceStorage,
    paths: StagingPaths,
    armed: bool,
}

impl StagingGuard {
    fn new(storage: &ResourceStorage, identity: &RequestIdentity) -> Self {
        Self {
            paths: storage.staging_paths(identity),
            storage: storage.clone(),
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        self.storage.remove_staging(&self.paths).await;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let storage = self.storage.clone();
        let paths = self.paths.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { storage.remove_staging(&paths).await });
        }
    }
}

#[derive(Debug)]
struct OperationInner {
    components: ResolutionComponents,
    keys: CacheKeyStrategy,
}

/// Resolves processing requests to transformed, cached artifacts
#[derive(Debug, Clone)]
pub struct ResourceResolutionOperation {
    inner: Arc<OperationInner>,
}

impl ResourceResolutionOperation {
    pub fn new(components: ResolutionComponents) -> Self {
        Self {
            inner: Arc::new(OperationInner {
                components,
                keys: CacheKeyStrategy::new(),
            }),
        }
    }

    pub async fn from_config(
        config: &PixelgateConfig,
        transformer: Arc<dyn ImageTransformer>,
    ) -> Result<Self, ResolutionError> {
        Ok(Self::new(
            ResolutionComponents::from_config(config, transformer).await?,
        ))
    }

    pub fn components(&self) -> &ResolutionComponents {
        &self.inner.components
    }

    pub fn cache_key(&self, identity: &RequestIdentity) -> String {
        self.inner
            .keys
            .generate_key(namespaces::RESOURCE, identity.as_str(), None)
    }

    pub async fn resolve(&self, request: ProcessingRequest) -> ResolutionOutcome {
        self.resolve_with_context(request, ResolutionContext::new())
            .await
    }

    pub async fn resolve_with_context(
        &self,
        request: ProcessingRequest,
        context: ResolutionContext,
    ) -> ResolutionOutcome {
        let components = &self.inner.components;
        if let Err(e) = components.validator.validate(&request) {
            debug!(request_id = %context.request_id, error = %e, "Request rejected");
            return Err(e);
        }

        let identity = RequestIdentity::from_request(&request);
        let inner = Arc::clone(&self.inner);
        let leader_identity = identity.clone();
        let leader_context = context.clone();

        let outcome = components
            .deduplicator
            .execute(identity.as_str(), move || async move {
                inner
                    .resolve_uncoalesced(request, leader_identity, leader_context)
                    .await
            })
            .await?;

        match &outcome {
            Ok(resolved) => debug!(
                request_id = %context.request_id,
                identity = %identity.short(),
                source = ?resolved.source,
                duration_ms = context.elapsed().as_millis() as u64,
                "Resource resolved"
            ),
            Err(e) => error!(
                request_id = %context.request_id,
                identity = %identity.short(),
                error = %e,
                "Resource resolution failed"
            ),
        }
        outcome
    }

    /// Remove a resource from every cache tier and from disk.
    ///
    /// Returns whether any tier held an entry.
    pub async fn invalidate(&self, request: &ProcessingRequest) -> Result<bool, ResolutionError> {
        let identity = RequestIdentity::from_request(request);
        let key = self.cache_key(&identity);
        let components = &self.inner.components;

        let removed = components.cache.delete(&key).await?;
        components.storage.remove_artifacts(&identity).await;
        info!(identity = %identity.short(), removed = removed, "Resource invalidated");
        Ok(removed)
    }

    /// Reap orphaned staging files and artifacts older than the configured
    /// `stale_after`; meant to be run periodically by the host service
    pub async fn cleanup_stale_artifacts(&self) -> Result<CleanupReport, ResolutionError> {
        let components = &self.inner.components;
        components
            .storage
            .cleanup_stale(components.settings.stale_after)
            .await
    }

    /// Stop background sweeps (deduplicator and cache layers)
    pub async fn shutdown(&self) {
        let components = &self.inner.components;
        components.deduplicator.shutdown().await;
        components.cache.shutdown().await;
        info!("Resource resolution operation shut down");
    }
}

impl OperationInner {
    /// Leader body, abandoned at the deduplicator's leader deadline
    async fn resolve_uncoalesced(
        &self,
        request: ProcessingRequest,
        identity: RequestIdentity,
        context: ResolutionContext,
    ) -> ResolutionOutcome {
        let deadline = self.components.deduplicator.config().leader_deadline();
        let work = self.resolve_within_deadline(request, identity.clone(), &context);
        match tokio::time::timeout(deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    request_id = %context.request_id,
                    identity = %identity.short(),
                    deadline_ms = deadline.as_millis() as u64,
                    "Resolution abandoned at leader deadline"
                );
                Err(ResolutionError::DeadlineExceeded {
                    deadline_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    async fn resolve_within_deadline(
        &self,
        request: ProcessingRequest,
        identity: RequestIdentity,
        context: &ResolutionContext,
    ) -> ResolutionOutcome {
        let key = self
            .keys
            .generate_key(namespaces::RESOURCE, identity.as_str(), None);

        if let Some(resolved) = self.lookup(&key, &identity).await {
            return Ok(resolved);
        }

        let staging = StagingGuard::new(&self.components.storage, &identity);
        let outcome = match self.guarded_fetch(&request, &staging.paths).await {
            Ok(FetchOutcome::Upstream { received }) => {
                debug!(
                    request_id = %context.request_id,
                    identity = %identity.short(),
                    bytes = received,
                    "Upstream body stored"
                );
                self.process(&request, &key, identity, &staging.paths, context)
                    .await
            }
            Ok(FetchOutcome::Empty) => Err(ResolutionError::ResourceStreaming(format!(
                "upstream response for {} has no readable body",
                request.resource_target
            ))),
            Ok(FetchOutcome::StoreFailed(e)) => Err(e),
            Ok(FetchOutcome::Fallback(path, fetched)) => {
                self.serve_fallback(identity, path, fetched, context).await
            }
            Err(e) => Err(e),
        };
        staging.release().await;
        outcome
    }

    async fn lookup(&self, key: &str, identity: &RequestIdentity) -> Option<ResolvedResource> {
        let cache = &self.components.cache;
        let cached: CachedResource = cache.get_typed(key).await?;
        if !cached.metadata.is_current() {
            warn!(
                key = key,
                version = cached.metadata.version,
                "Discarding cached resource with outdated metadata"
            );
            if let Err(e) = cache.delete(key).await {
                warn!(key = key, error = %e, "Failed to remove outdated cache entry");
            }
            return None;
        }

        // A hit from a shared tier may have been produced on another node
        let storage = &self.components.storage;
        if !storage.has_artifacts(identity).await {
            if let Err(e) = storage
                .write_artifacts(identity, &cached.content, &cached.metadata)
                .await
            {
                warn!(identity = %identity.short(), error = %e, "Failed to restore artifacts from cache");
            }
        }

        debug!(key = key, "Cache hit for resource");
        Some(ResolvedResource::new(
            identity.clone(),
            storage.content_path(identity),
            cached.content,
            cached.metadata,
            ResolutionSource::Hit,
        ))
    }

    /// Download through the upstream's breaker; rejections and failures,
    /// including a body that breaks off mid-stream, fall back to the default
    /// asset when one is configured
    async fn guarded_fetch(
        &self,
        request: &ProcessingRequest,
        staging: &StagingPaths,
    ) -> Result<FetchOutcome, ResolutionError> {
        let url = request.resource_target.trim();
        let breaker = self.components.circuit_breakers.for_url(url);
        let fetcher = &self.components.fetcher;
        let storage = &self.components.storage;
        let default_asset = self.components.settings.default_asset_path.clone();

        let outcome = breaker
            .call_with_fallback(
                || async move {
                    let body = match fetcher.fetch(url).await {
                        Ok(FetchedResource {
                            body: Some(body), ..
                        }) => body,
                        Ok(_) => return Ok(FetchOutcome::Empty),
                        Err(e) => return Err(e),
                    };
                    match storage.persist_stream(&staging.download, body).await {
                        Ok(received) => Ok(FetchOutcome::Upstream { received }),
                        Err(PersistError::Stream(e)) => Err(e),
                        // Local disk trouble says nothing about the upstream
                        Err(PersistError::Store(e)) => Ok(FetchOutcome::StoreFailed(e)),
                    }
                },
                |reason| async move {
                    let error = match reason {
                        CircuitBreakerError::CircuitOpen { component, .. } => {
                            FetchError::CircuitOpen { component }
                        }
                        CircuitBreakerError::OperationFailed(e) => e,
                    };
                    let Some(path) = default_asset else {
                        return Err(error);
                    };
                    match load_default_asset(&path).await {
                        Ok(fetched) => {
                            warn!(url = url, reason = %error, "Serving default asset");
                            Ok(FetchOutcome::Fallback(path, fetched))
                        }
                        Err(asset_error) => {
                            error!(error = %asset_error, "Default asset unavailable");
                            Err(error)
                        }
                    }
                },
            )
            .await?;
        Ok(outcome)
    }

    /// Transform the persisted download and publish the artifact
    async fn process(
        &self,
        request: &ProcessingRequest,
        key: &str,
        identity: RequestIdentity,
        staging: &StagingPaths,
        context: &ResolutionContext,
    ) -> ResolutionOutcome {
        let storage = &self.components.storage;
        let output = self
            .components
            .transform_pool
            .transform(&staging.download, &staging.output, request)
            .await?;

        let settings = &self.components.settings;
        let metadata = ResourceMetaData::new(
            output.size_bytes,
            output.format.as_str(),
            settings.private_ttl,
            settings.public_ttl,
        );
        let content = storage.commit_content(&identity, &staging.output).await?;
        storage.write_metadata(&identity, &metadata).await?;

        let cached = CachedResource {
            metadata,
            content,
        };
        // The artifact is already on disk, a failed populate only costs hit rate
        if let Err(e) = self
            .components
            .cache
            .set_typed(key, &cached, settings.cache_ttl)
            .await
        {
            warn!(key = key, error = %e, "Failed to populate cache");
        }

        info!(
            request_id = %context.request_id,
            identity = %identity.short(),
            format = %output.format,
            size_bytes = output.size_bytes,
            "Resource transformed"
        );

        Ok(ResolvedResource::new(
            identity.clone(),
            storage.content_path(&identity),
            cached.content,
            cached.metadata,
            ResolutionSource::Miss,
        ))
    }

    async fn serve_fallback(
        &self,
        identity: RequestIdentity,
        path: PathBuf,
        fetched: FetchedResource,
        context: &ResolutionContext,
    ) -> ResolutionOutcome {
        let format = fetched
            .content_type
            .as_deref()
            .and_then(|content_type| content_type.strip_prefix("image/"))
            .and_then(ImageFormat::parse);

        let content = match fetched.body {
            Some(body) => {
                let chunks: Vec<Bytes> = body
                    .try_collect()
                    .await
                    .map_err(|e| ResolutionError::ResourceStreaming(e.to_string()))?;
                Bytes::from(chunks.concat())
            }
            None => Bytes::new(),
        };

        // Zero TTLs keep browsers and shared caches from pinning the fallback
        let metadata = ResourceMetaData::new(
            content.len() as u64,
            format.map_or("unknown", |format| format.as_str()),
            Duration::ZERO,
            Duration::ZERO,
        );

        debug!(
            request_id = %context.request_id,
            identity = %identity.short(),
            "Default asset resolved"
        );
        Ok(ResolvedResource::new(
            identity,
            path,
            content,
            metadata,
            ResolutionSource::Fallback,
        ))
    }
}
