//! Mock collaborators with call counters

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use pixelgate_core::cache::{CacheError, CacheLayer, CacheResult, CachedValue};
use pixelgate_core::resource::{
    CopyTransformer, FetchError, FetchedResource, ImageTransformer, ProcessingRequest,
    ResolutionError, ResourceFetcher, TransformOutput,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// PNG signature followed by a recognisable payload
pub const PNG_BODY: &[u8] = b"\x89PNG\r\n\x1a\nupstream-image";

/// What the mock upstream answers with
#[derive(Debug, Clone)]
pub enum MockResponse {
    Body(Bytes),
    /// Success without a readable body (e.g. 204)
    NoBody,
    /// Headers arrive, then the body breaks off after the given prefix
    BrokenBody(Bytes, FetchError),
    Fail(FetchError),
}

/// Upstream stand-in counting every fetch
#[derive(Debug)]
pub struct MockFetcher {
    response: Mutex<MockResponse>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight count even when the fetch is dropped mid-way
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockFetcher {
    pub fn new(body: &'static [u8]) -> Self {
        Self {
            response: Mutex::new(MockResponse::Body(Bytes::from_static(body))),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn png() -> Self {
        Self::new(PNG_BODY)
    }

    pub fn respond_with(&self, response: MockResponse) {
        *self.response.lock() = response;
    }

    pub fn fail_with_status(&self, status: u16) {
        self.respond_with(MockResponse::Fail(FetchError::Status {
            url: "mock".to_string(),
            status,
        }));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most fetches ever running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFetcher for MockFetcher {
    async fn fetch(&self, _url: &str) -> Result<FetchedResource, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let _in_flight = InFlight(Arc::clone(&self.in_flight));

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let response = self.response.lock().clone();
        match response {
            MockResponse::Body(body) => Ok(FetchedResource::from_bytes(
                body,
                Some("image/png".to_string()),
            )),
            MockResponse::NoBody => Ok(FetchedResource::empty(None)),
            MockResponse::BrokenBody(prefix, error) => Ok(FetchedResource {
                body: Some(stream::iter(vec![Ok(prefix), Err(error)]).boxed()),
                content_type: Some("image/png".to_string()),
                content_length: None,
            }),
            MockResponse::Fail(error) => Err(error),
        }
    }
}

/// Copying transformer that counts invocations and can be told to fail
#[derive(Debug, Default)]
pub struct CountingTransformer {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl CountingTransformer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageTransformer for CountingTransformer {
    async fn transform(
        &self,
        source: &Path,
        target: &Path,
        request: &ProcessingRequest,
    ) -> Result<TransformOutput, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            // Leave a partial artifact behind like a crashed codec would
            let _ = tokio::fs::write(target, b"partial").await;
            return Err(ResolutionError::ResourceProcessing(
                "unsupported image".to_string(),
            ));
        }
        CopyTransformer.transform(source, target, request).await
    }
}

/// Layer whose backend is always down
#[derive(Debug, Default)]
pub struct FailingLayer {
    pub calls: AtomicUsize,
}

impl FailingLayer {
    fn fail<T>(&self) -> CacheResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::ConnectionError("backend unreachable".to_string()))
    }
}

#[async_trait]
impl CacheLayer for FailingLayer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn get(&self, _key: &str) -> CacheResult<Option<CachedValue>> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> CacheResult<()> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        self.fail()
    }

    async fn exists(&self, _key: &str) -> CacheResult<bool> {
        self.fail()
    }

    async fn clear(&self) -> CacheResult<()> {
        self.fail()
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(false)
    }

    fn is_distributed(&self) -> bool {
        true
    }
}
