//! Image transform collaborator and its bounded worker pool
//!
//! The actual codec work is a black box behind [`ImageTransformer`]:
//! `(source, target, request) -> {size_bytes, format}`. [`TransformPool`] caps
//! how many transforms run at once so a burst of misses cannot exhaust CPU.

use crate::resource::{ImageFormat, ProcessingRequest, ResolutionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// Result reported by a transformer for the artifact it wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOutput {
    pub size_bytes: u64,
    pub format: ImageFormat,
}

#[async_trait]
pub trait ImageTransformer: Send + Sync + std::fmt::Debug {
    /// Read `source`, apply `request`'s options and write the result to `target`
    async fn transform(
        &self,
        source: &Path,
        target: &Path,
        request: &ProcessingRequest,
    ) -> Result<TransformOutput, ResolutionError>;
}

/// Occupancy of the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformPoolStats {
    pub max_concurrent: usize,
    pub available_capacity: usize,
    pub in_flight: usize,
}

/// Semaphore-bounded front for an [`ImageTransformer`]
#[derive(Debug, Clone)]
pub struct TransformPool {
    transformer: Arc<dyn ImageTransformer>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TransformPool {
    pub fn new(transformer: Arc<dyn ImageTransformer>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            transformer,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Wait for a worker slot, then run the transform
    pub async fn transform(
        &self,
        source: &Path,
        target: &Path,
        request: &ProcessingRequest,
    ) -> Result<TransformOutput, ResolutionError> {
        let queued_at = Instant::now();
        let _permit = self.semaphore.acquire().await.map_err(|e| {
            ResolutionError::ResourceProcessing(format!("transform pool closed: {e}"))
        })?;
        let queue_ms = queued_at.elapsed().as_millis() as u64;

        let started = Instant::now();
        match self.transformer.transform(source, target, request).await {
            Ok(output) => {
                debug!(
                    queue_ms = queue_ms,
                    duration_ms = started.elapsed().as_millis() as u64,
                    size_bytes = output.size_bytes,
                    format = %output.format,
                    "Transform completed"
                );
                Ok(output)
            }
            Err(e) => {
                error!(
                    source = %source.display(),
                    error = %e,
                    "Transform failed"
                );
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> TransformPoolStats {
        let available = self.semaphore.available_permits();
        TransformPoolStats {
            max_concurrent: self.max_concurrent,
            available_capacity: available,
            in_flight: self.max_concurrent.saturating_sub(available),
        }
    }
}

/// Pass-through transformer: copies the source and reports its format.
///
/// Used where no codec is wired in, and by tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyTransformer;

#[async_trait]
impl ImageTransformer for CopyTransformer {
    async fn transform(
        &self,
        source: &Path,
        target: &Path,
        request: &ProcessingRequest,
    ) -> Result<TransformOutput, ResolutionError> {
        let size_bytes = tokio::fs::copy(source, target).await.map_err(|e| {
            ResolutionError::ResourceProcessing(format!(
                "failed to copy {} to {}: {e}",
                source.display(),
                target.display()
            ))
        })?;

        let format = match request.format {
            Some(format) => format,
            None => sniff_format(target).await.unwrap_or(ImageFormat::Jpeg),
        };

        Ok(TransformOutput { size_bytes, format })
    }
}

/// Detect an image format from its leading magic bytes
pub fn detect_format(header: &[u8]) -> Option<ImageFormat> {
    match header {
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [0x89, b'P', b'N', b'G', ..] => Some(ImageFormat::Png),
        [b'G', b'I', b'F', b'8', ..] => Some(ImageFormat::Gif),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageFormat::Webp),
        [_, _, _, _, b'f', b't', b'y', b'p', b'a', b'v', b'i', b'f', ..] => Some(ImageFormat::Avif),
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(ImageFormat::Tiff),
        _ => None,
    }
}

async fn sniff_format(path: &Path) -> Option<ImageFormat> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut header = [0u8; 12];
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..]).await.ok()? {
            0 => break,
            n => filled += n,
        }
    }
    detect_format(&header[..filled])
}
