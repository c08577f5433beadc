//! Error types for the Pixelgate core.
//!
//! Each subsystem carries its own `thiserror` enum ([`CacheError`],
//! [`ResolutionError`], [`ConfigurationError`], ...). `PixelgateError` is the
//! crate-level umbrella used at service boundaries and in the binaries.

use crate::cache::CacheError;
use crate::config::ConfigurationError;
use crate::resilience::DeduplicationError;
use crate::resource::ResolutionError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PixelgateError {
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Resolution error: {0}")]
    ResolutionError(#[from] ResolutionError),
    #[error("Deduplication error: {0}")]
    DeduplicationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CacheError> for PixelgateError {
    fn from(error: CacheError) -> Self {
        PixelgateError::CacheError(error.to_string())
    }
}

impl From<ConfigurationError> for PixelgateError {
    fn from(error: ConfigurationError) -> Self {
        PixelgateError::ConfigurationError(error.to_string())
    }
}

impl From<DeduplicationError> for PixelgateError {
    fn from(error: DeduplicationError) -> Self {
        PixelgateError::DeduplicationError(error.to_string())
    }
}

impl From<std::io::Error> for PixelgateError {
    fn from(error: std::io::Error) -> Self {
        PixelgateError::StorageError(error.to_string())
    }
}

impl From<serde_json::Error> for PixelgateError {
    fn from(error: serde_json::Error) -> Self {
        PixelgateError::Internal(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, PixelgateError>;
