//! Resolution error types
//!
//! Errors are `Clone` so a single deduplicated execution can hand the same
//! failure to every caller that joined it.

use crate::cache::CacheError;
use crate::resilience::DeduplicationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    /// Rejected by the request validator
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(
        "Requested resize target {width}x{height} ({} pixels) exceeds the maximum of {max_pixels} pixels",
        pixel_count(.width, .height)
    )]
    RequestedResizeTargetTooLarge {
        width: u64,
        height: u64,
        max_pixels: u64,
    },

    /// The upstream response had no readable body, or the stream broke
    #[error("Resource streaming error: {0}")]
    ResourceStreaming(String),

    /// Transform or artifact handling failed
    #[error("Resource processing error: {0}")]
    ResourceProcessing(String),

    /// The upstream circuit is open and no fallback was available
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    #[error("Cache write failure: {0}")]
    CacheWriteFailure(String),

    #[error("Unable to fetch resource: {0}")]
    UnableToFetchResource(String),

    #[error("Unable to store fetched resource: {0}")]
    UnableToStoreFetchedResource(String),

    #[error("Invalid cache key format: {0}")]
    InvalidKeyFormat(String),

    /// The execution outlived its deadline and was abandoned
    #[error("Resource resolution exceeded its {deadline_ms}ms deadline")]
    DeadlineExceeded { deadline_ms: u64 },
}

fn pixel_count(width: &u64, height: &u64) -> u128 {
    u128::from(*width) * u128::from(*height)
}

impl ResolutionError {
    /// Errors caused by the request itself rather than by the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::RequestedResizeTargetTooLarge { .. }
        )
    }
}

impl From<CacheError> for ResolutionError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::CacheWriteFailure { .. } => Self::CacheWriteFailure(error.to_string()),
            CacheError::InvalidKeyFormat(key) => Self::InvalidKeyFormat(key),
            other => Self::ResourceProcessing(other.to_string()),
        }
    }
}

impl From<DeduplicationError> for ResolutionError {
    fn from(error: DeduplicationError) -> Self {
        Self::ResourceProcessing(error.to_string())
    }
}
