//! Cache error types

use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    /// Failed to connect to cache backend
    #[error("Cache connection error: {0}")]
    ConnectionError(String),

    /// Failed to serialize or deserialize cache value
    #[error("Cache serialization error: {0}")]
    SerializationError(String),

    /// Cache operation timed out
    #[error("Cache operation timed out: {0}")]
    Timeout(String),

    /// Generic backend error
    #[error("Cache backend error: {0}")]
    BackendError(String),

    /// Local storage error (file tier)
    #[error("Cache storage error: {0}")]
    StorageError(String),

    /// Key does not follow `namespace:identifier[:paramsHash]`
    #[error("Invalid cache key format: {0}")]
    InvalidKeyFormat(String),

    /// Every layer rejected a write-through
    #[error("Cache write failed on all {} layers for key {key}: {}", failures.len(), failures.join("; "))]
    CacheWriteFailure { key: String, failures: Vec<String> },

    /// Every layer failed an operation other than a write
    #[error("Cache operation '{operation}' failed on all layers: {}", failures.join("; "))]
    AllLayersFailed {
        operation: String,
        failures: Vec<String>,
    },
}

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        CacheError::StorageError(error.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        CacheError::SerializationError(error.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
