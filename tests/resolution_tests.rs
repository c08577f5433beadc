//! End-to-end tests of the resolution pipeline over mock collaborators

mod common;

use common::*;
use bytes::Bytes;
use pixelgate_core::cache::layers::MemoryCacheLayer;
use pixelgate_core::cache::{CacheCodec, CacheLayer};
use pixelgate_core::resilience::{CircuitState, DeduplicatorConfig};
use pixelgate_core::resource::{
    CachedResource, FetchError, ImageFormat, ProcessingRequest, ResolutionError,
    ResolutionSource, ResourceMetaData,
};
use pixelgate_core::RequestIdentity;
use std::sync::Arc;
use std::time::Duration;

const UPSTREAM_HOST: &str = "images.example.com";

#[tokio::test]
async fn test_miss_then_hit_without_refetch_or_retransform() {
    let pipeline = TestPipeline::new().await;
    let request = image_request("cat").with_size(640, 480);

    let first = pipeline.operation.resolve(request.clone()).await.unwrap();
    assert_eq!(first.source, ResolutionSource::Miss);
    assert_eq!(first.content.as_ref(), PNG_BODY);
    assert_eq!(first.metadata.format, "png");
    assert_eq!(first.metadata.version, 1);
    assert_eq!(first.metadata.size_bytes(), Some(PNG_BODY.len() as u64));
    assert_eq!(first.content_type(), "image/png");
    assert_eq!(first.cache_control(), "public, max-age=3600, s-maxage=86400");

    // Artifacts are on disk, the download is gone
    let identity = RequestIdentity::from_request(&request);
    assert!(pipeline.storage.has_artifacts(&identity).await);
    assert!(pipeline.staged_files().is_empty());
    assert_eq!(first.path, pipeline.storage.content_path(&identity));

    pipeline.settle().await;

    let second = pipeline.operation.resolve(request).await.unwrap();
    assert_eq!(second.source, ResolutionSource::Hit);
    assert_eq!(second.content, first.content);
    assert_eq!(second.etag, first.etag);
    assert_eq!(second.metadata, first.metadata);

    assert_eq!(pipeline.fetcher.calls(), 1);
    assert_eq!(pipeline.transformer.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_identical_requests_share_one_fetch() {
    let pipeline = TestPipeline::new().await;
    pipeline.fetcher.set_delay(Duration::from_millis(100));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let operation = pipeline.operation.clone();
            tokio::spawn(async move { operation.resolve(image_request("dog")).await })
        })
        .collect();

    let mut etags = Vec::new();
    for task in tasks {
        let resolved = task.await.unwrap().unwrap();
        etags.push(resolved.etag);
    }

    etags.dedup();
    assert_eq!(etags.len(), 1, "every caller observes the same resource");
    assert_eq!(pipeline.fetcher.calls(), 1);
    assert_eq!(pipeline.transformer.calls(), 1);

    let stats = pipeline.operation.components().deduplicator.stats();
    assert_eq!(stats.executions, 1);
    assert_eq!(stats.joined, 9);
}

#[tokio::test]
async fn test_distinct_requests_are_not_coalesced() {
    let pipeline = TestPipeline::new().await;

    let (a, b) = tokio::join!(
        pipeline.operation.resolve(image_request("cat").with_quality(80)),
        pipeline.operation.resolve(image_request("cat").with_quality(81)),
    );
    assert_ne!(a.unwrap().identity, b.unwrap().identity);
    assert_eq!(pipeline.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_dropped_caller_does_not_cancel_the_leader() {
    let pipeline = TestPipeline::new().await;
    pipeline.fetcher.set_delay(Duration::from_millis(100));

    let operation = pipeline.operation.clone();
    let caller = tokio::spawn(async move { operation.resolve(image_request("owl")).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    caller.abort();

    // The spawned leader finishes and populates the cache regardless
    tokio::time::sleep(Duration::from_millis(200)).await;
    let resolved = pipeline.operation.resolve(image_request("owl")).await.unwrap();
    assert_eq!(resolved.source, ResolutionSource::Hit);
    assert_eq!(pipeline.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_upstream_failures_fall_back_then_open_the_circuit() {
    let pipeline = TestPipeline::new().await;
    pipeline.fetcher.fail_with_status(503);
    let request = image_request("fox");

    for _ in 0..5 {
        let resolved = pipeline.operation.resolve(request.clone()).await.unwrap();
        assert_eq!(resolved.source, ResolutionSource::Fallback);
        assert_eq!(resolved.content.as_ref(), DEFAULT_ASSET);
        assert_eq!(resolved.path, pipeline.default_asset);
        assert_eq!(resolved.metadata.private_ttl, 0);
        pipeline.settle().await;
    }
    assert_eq!(pipeline.fetcher.calls(), 5);

    let breakers = &pipeline.operation.components().circuit_breakers;
    let stats = breakers.stats(UPSTREAM_HOST).unwrap();
    assert_eq!(stats.state, CircuitState::Open);

    // Open circuit: fallback without touching the upstream
    let resolved = pipeline.operation.resolve(request.clone()).await.unwrap();
    assert_eq!(resolved.source, ResolutionSource::Fallback);
    assert_eq!(pipeline.fetcher.calls(), 5);

    // Fallbacks are never cached under the request identity
    let key = pipeline
        .operation
        .cache_key(&RequestIdentity::from_request(&request));
    assert!(!pipeline.memory.exists(&key).await.unwrap());
    assert!(!pipeline.file.exists(&key).await.unwrap());

    // After the reset timeout a single trial goes through and closes the circuit
    pipeline.fetcher.respond_with(MockResponse::Body(Bytes::from_static(PNG_BODY)));
    tokio::time::sleep(Duration::from_millis(250)).await;

    let resolved = pipeline.operation.resolve(request).await.unwrap();
    assert_eq!(resolved.source, ResolutionSource::Miss);
    assert_eq!(pipeline.fetcher.calls(), 6);
    assert_eq!(
        breakers.stats(UPSTREAM_HOST).unwrap().state,
        CircuitState::Closed
    );
}

fn stalled_body() -> MockResponse {
    MockResponse::BrokenBody(
        Bytes::from_static(b"\x89PNG"),
        FetchError::Timeout {
            url: "https://images.example.com/stalled.png".to_string(),
        },
    )
}

#[tokio::test]
async fn test_body_breaking_off_falls_back_and_opens_the_circuit() {
    let pipeline = TestPipeline::new().await;
    pipeline.fetcher.respond_with(stalled_body());

    for i in 0..5 {
        let resolved = pipeline
            .operation
            .resolve(image_request(&format!("img{i}")))
            .await
            .unwrap();
        assert_eq!(resolved.source, ResolutionSource::Fallback);
        assert_eq!(resolved.content.as_ref(), DEFAULT_ASSET);
    }

    let breakers = &pipeline.operation.components().circuit_breakers;
    let stats = breakers.stats(UPSTREAM_HOST).unwrap();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.success_count, 0);
    assert_eq!(pipeline.transformer.calls(), 0);

    // Open circuit: the stalled upstream is no longer contacted
    let resolved = pipeline
        .operation
        .resolve(image_request("img5"))
        .await
        .unwrap();
    assert_eq!(resolved.source, ResolutionSource::Fallback);
    assert_eq!(pipeline.fetcher.calls(), 5);
    assert!(pipeline.staged_files().is_empty());
}

#[tokio::test]
async fn test_body_breaking_off_without_default_asset_is_a_fetch_error() {
    let pipeline = TestPipeline::without_default_asset().await;
    pipeline.fetcher.respond_with(stalled_body());

    let error = pipeline
        .operation
        .resolve(image_request("cut"))
        .await
        .unwrap_err();
    assert!(matches!(error, ResolutionError::UnableToFetchResource(_)));

    let stats = pipeline
        .operation
        .components()
        .circuit_breakers
        .stats(UPSTREAM_HOST)
        .unwrap();
    assert_eq!(stats.failure_count, 1);
    assert!(pipeline.staged_files().is_empty());
}

#[tokio::test]
async fn test_overdue_leader_is_abandoned_before_a_replacement_starts() {
    let pipeline = TestPipeline::with_dedup_config(DeduplicatorConfig {
        grace_delay: Duration::from_millis(10),
        max_pending_age: Duration::from_millis(50),
        sweep_interval: Duration::from_secs(1),
    })
    .await;
    pipeline.fetcher.set_delay(Duration::from_millis(150));

    let operation = pipeline.operation.clone();
    let first = tokio::spawn(async move { operation.resolve(image_request("slow")).await });
    tokio::time::sleep(Duration::from_millis(80)).await;
    let second = pipeline.operation.resolve(image_request("slow")).await;

    assert_eq!(
        first.await.unwrap().unwrap_err(),
        ResolutionError::DeadlineExceeded { deadline_ms: 45 }
    );
    assert!(matches!(
        second,
        Err(ResolutionError::DeadlineExceeded { .. })
    ));
    assert_eq!(pipeline.fetcher.calls(), 2);
    assert_eq!(pipeline.fetcher.peak_in_flight(), 1);
    assert_eq!(
        pipeline
            .operation
            .components()
            .deduplicator
            .stats()
            .stale_evictions,
        0
    );

    // Abandoned executions clean up their staging files
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pipeline.staged_files().is_empty());
}

#[tokio::test]
async fn test_failed_execution_keeps_previously_published_artifact() {
    let pipeline = TestPipeline::new().await;
    let request = image_request("ibis");
    let identity = RequestIdentity::from_request(&request);
    let key = pipeline.operation.cache_key(&identity);

    let published = pipeline.operation.resolve(request.clone()).await.unwrap();
    pipeline.memory.delete(&key).await.unwrap();
    pipeline.file.delete(&key).await.unwrap();
    pipeline.transformer.set_failing(true);
    pipeline.settle().await;

    let error = pipeline.operation.resolve(request).await.unwrap_err();
    assert!(matches!(error, ResolutionError::ResourceProcessing(_)));

    // The partial output of the failed run never replaced the published file
    assert!(pipeline.storage.has_artifacts(&identity).await);
    assert_eq!(
        pipeline.storage.read_content(&identity).await.unwrap(),
        published.content
    );
    assert!(pipeline.staged_files().is_empty());
}

#[tokio::test]
async fn test_breakers_are_per_upstream_host() {
    let pipeline = TestPipeline::new().await;
    let breakers = &pipeline.operation.components().circuit_breakers;
    breakers.get_circuit_breaker(UPSTREAM_HOST).trip();

    let other = ProcessingRequest::new("https://cdn.example.org/a.png");
    let resolved = pipeline.operation.resolve(other).await.unwrap();
    assert_eq!(resolved.source, ResolutionSource::Miss);
    assert_eq!(pipeline.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_without_default_asset_errors_surface() {
    let pipeline = TestPipeline::without_default_asset().await;
    pipeline.fetcher.fail_with_status(500);

    let error = pipeline
        .operation
        .resolve(image_request("bat"))
        .await
        .unwrap_err();
    assert!(matches!(error, ResolutionError::UnableToFetchResource(_)));

    pipeline
        .operation
        .components()
        .circuit_breakers
        .get_circuit_breaker(UPSTREAM_HOST)
        .trip();
    pipeline.settle().await;

    let error = pipeline
        .operation
        .resolve(image_request("bat"))
        .await
        .unwrap_err();
    assert_eq!(
        error,
        ResolutionError::CircuitOpen {
            component: UPSTREAM_HOST.to_string()
        }
    );
    assert_eq!(pipeline.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_failed_transform_leaves_no_cache_entry_or_files() {
    let pipeline = TestPipeline::new().await;
    pipeline.transformer.set_failing(true);
    let request = image_request("eel");
    let identity = RequestIdentity::from_request(&request);

    let error = pipeline
        .operation
        .resolve(request.clone())
        .await
        .unwrap_err();
    assert!(matches!(error, ResolutionError::ResourceProcessing(_)));

    let key = pipeline.operation.cache_key(&identity);
    assert!(!pipeline.memory.exists(&key).await.unwrap());
    assert!(!pipeline.file.exists(&key).await.unwrap());
    assert!(pipeline.staged_files().is_empty());
    assert!(!pipeline.storage.content_path(&identity).exists());
    assert!(!pipeline.storage.metadata_path(&identity).exists());

    // A later attempt starts from scratch
    pipeline.transformer.set_failing(false);
    pipeline.settle().await;
    let resolved = pipeline.operation.resolve(request).await.unwrap();
    assert_eq!(resolved.source, ResolutionSource::Miss);
    assert_eq!(pipeline.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_response_without_body_is_a_streaming_error() {
    let pipeline = TestPipeline::new().await;
    pipeline.fetcher.respond_with(MockResponse::NoBody);

    let error = pipeline
        .operation
        .resolve(image_request("void"))
        .await
        .unwrap_err();
    assert!(matches!(error, ResolutionError::ResourceStreaming(_)));
    assert_eq!(pipeline.transformer.calls(), 0);
}

#[tokio::test]
async fn test_joiners_share_the_leaders_error() {
    let pipeline = TestPipeline::new().await;
    pipeline.fetcher.set_delay(Duration::from_millis(50));
    pipeline.transformer.set_failing(true);

    let (a, b, c) = tokio::join!(
        pipeline.operation.resolve(image_request("ant")),
        pipeline.operation.resolve(image_request("ant")),
        pipeline.operation.resolve(image_request("ant")),
    );
    let a = a.unwrap_err();
    assert_eq!(b.unwrap_err(), a);
    assert_eq!(c.unwrap_err(), a);
    assert_eq!(pipeline.transformer.calls(), 1);
}

#[tokio::test]
async fn test_invalid_requests_do_no_work() {
    let pipeline = TestPipeline::new().await;

    let error = pipeline
        .operation
        .resolve(ProcessingRequest::new("ftp://images.example.com/a.png"))
        .await
        .unwrap_err();
    assert!(matches!(error, ResolutionError::InvalidRequest(_)));

    let error = pipeline
        .operation
        .resolve(image_request("huge").with_size(7681, 4320))
        .await
        .unwrap_err();
    assert_eq!(
        error,
        ResolutionError::RequestedResizeTargetTooLarge {
            width: 7681,
            height: 4320,
            max_pixels: 7680 * 4320,
        }
    );

    assert_eq!(pipeline.fetcher.calls(), 0);
    assert_eq!(pipeline.operation.components().deduplicator.stats().executions, 0);
}

#[tokio::test]
async fn test_hit_in_file_tier_is_promoted_to_memory() {
    let pipeline = TestPipeline::new().await;
    let request = image_request("elk");
    pipeline.operation.resolve(request.clone()).await.unwrap();

    let key = pipeline
        .operation
        .cache_key(&RequestIdentity::from_request(&request));
    assert!(pipeline.memory.delete(&key).await.unwrap());
    pipeline.settle().await;

    let resolved = pipeline.operation.resolve(request).await.unwrap();
    assert_eq!(resolved.source, ResolutionSource::Hit);

    // Promotion is fire-and-forget
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pipeline.memory.exists(&key).await.unwrap());

    let stats = pipeline.operation.components().cache.stats();
    assert_eq!(stats.promotions, 1);
    assert_eq!(stats.layers[1].hits, 1);
}

#[tokio::test]
async fn test_hit_in_distributed_tier_populates_every_faster_tier() {
    let distributed = Arc::new(MemoryCacheLayer::new(16 * 1024 * 1024));
    let pipeline = TestPipeline::with_extra_layers(vec![distributed.clone()], true).await;
    let request = image_request("koi");
    let key = pipeline
        .operation
        .cache_key(&RequestIdentity::from_request(&request));

    // Produced by another node
    let cached = CachedResource {
        metadata: ResourceMetaData::new(
            PNG_BODY.len() as u64,
            "png",
            Duration::from_secs(3600),
            Duration::from_secs(86_400),
        ),
        content: Bytes::from_static(PNG_BODY),
    };
    distributed
        .set(&key, cached.encode().unwrap(), Duration::from_secs(60))
        .await
        .unwrap();

    let resolved = pipeline.operation.resolve(request.clone()).await.unwrap();
    assert_eq!(resolved.source, ResolutionSource::Hit);
    assert_eq!(resolved.content, cached.content);
    assert_eq!(pipeline.fetcher.calls(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pipeline.memory.exists(&key).await.unwrap());
    assert!(pipeline.file.exists(&key).await.unwrap());

    pipeline.settle().await;
    let again = pipeline.operation.resolve(request).await.unwrap();
    assert_eq!(again.source, ResolutionSource::Hit);

    let stats = pipeline.operation.components().cache.stats();
    assert_eq!(stats.promotions, 2);
    assert_eq!(stats.layers[0].hits, 1);
    assert_eq!(stats.layers[1].hits, 0);
    assert_eq!(stats.layers[2].hits, 1);
}

#[tokio::test]
async fn test_unavailable_tier_only_degrades() {
    let failing = Arc::new(FailingLayer::default());
    let pipeline = TestPipeline::with_extra_layers(vec![failing.clone()], true).await;
    let request = image_request("yak");

    let first = pipeline.operation.resolve(request.clone()).await.unwrap();
    assert_eq!(first.source, ResolutionSource::Miss);
    pipeline.settle().await;

    let second = pipeline.operation.resolve(request).await.unwrap();
    assert_eq!(second.source, ResolutionSource::Hit);
    assert!(failing.calls.load(std::sync::atomic::Ordering::SeqCst) > 0);

    let health = pipeline.operation.components().cache.health_check().await;
    assert_eq!(
        health,
        vec![
            ("memory".to_string(), true),
            ("file".to_string(), true),
            ("failing".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn test_hit_restores_missing_artifacts() {
    let pipeline = TestPipeline::new().await;
    let request = image_request("emu").with_format(ImageFormat::Webp);
    let identity = RequestIdentity::from_request(&request);

    let first = pipeline.operation.resolve(request.clone()).await.unwrap();
    assert_eq!(first.metadata.format, "webp");
    pipeline.storage.remove_artifacts(&identity).await;
    pipeline.settle().await;

    let second = pipeline.operation.resolve(request).await.unwrap();
    assert_eq!(second.source, ResolutionSource::Hit);
    assert!(pipeline.storage.has_artifacts(&identity).await);
    assert_eq!(
        pipeline.storage.read_metadata(&identity).await.unwrap(),
        first.metadata
    );
}

#[tokio::test]
async fn test_invalidate_removes_every_trace() {
    let pipeline = TestPipeline::new().await;
    let request = image_request("gnu");
    let identity = RequestIdentity::from_request(&request);
    let key = pipeline.operation.cache_key(&identity);

    pipeline.operation.resolve(request.clone()).await.unwrap();
    pipeline.settle().await;

    assert!(pipeline.operation.invalidate(&request).await.unwrap());
    assert!(!pipeline.memory.exists(&key).await.unwrap());
    assert!(!pipeline.file.exists(&key).await.unwrap());
    assert!(!pipeline.storage.has_artifacts(&identity).await);
    assert!(!pipeline.operation.invalidate(&request).await.unwrap());

    let resolved = pipeline.operation.resolve(request).await.unwrap();
    assert_eq!(resolved.source, ResolutionSource::Miss);
    assert_eq!(pipeline.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_conditional_request_helpers() {
    let pipeline = TestPipeline::new().await;
    let resolved = pipeline
        .operation
        .resolve(image_request("cow"))
        .await
        .unwrap();

    assert!(resolved.is_not_modified(Some(&resolved.etag)));
    assert!(!resolved.is_not_modified(Some("\"stale\"")));
    assert!(resolved.last_modified().ends_with(" GMT"));
    assert_eq!(resolved.content_length(), PNG_BODY.len() as u64);
}

#[tokio::test]
async fn test_shutdown_stops_background_sweeps() {
    let pipeline = TestPipeline::new().await;
    let deduplicator = &pipeline.operation.components().deduplicator;
    deduplicator.start_sweep();
    pipeline.file.start_sweep(Duration::from_millis(20));
    assert!(deduplicator.is_sweep_running());
    assert!(pipeline.file.is_sweep_running());

    pipeline.operation.shutdown().await;
    assert!(!deduplicator.is_sweep_running());
    assert!(!pipeline.file.is_sweep_running());
}

#[tokio::test]
async fn test_cleanup_reaps_only_stale_staging_files() {
    let pipeline = TestPipeline::new().await;
    let request = image_request("asp");
    let identity = RequestIdentity::from_request(&request);
    pipeline.operation.resolve(request).await.unwrap();

    // Left behind by a crashed process two hours ago
    let orphan = pipeline.storage.staging_paths(&identity).download;
    std::fs::write(&orphan, b"orphan").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&orphan)
        .unwrap()
        .set_modified(std::time::SystemTime::now() - Duration::from_secs(2 * 3600))
        .unwrap();

    let report = pipeline.operation.cleanup_stale_artifacts().await.unwrap();
    assert_eq!(report.temp_files_removed, 1);
    assert_eq!(report.artifacts_removed, 0);
    assert!(!orphan.exists());
    assert!(pipeline.storage.has_artifacts(&identity).await);
}
