//! Cache layer implementations, fastest first
//!
//! - [`MemoryCacheLayer`]: in-process Moka cache
//! - [`FileCacheLayer`]: durable entries on the local filesystem
//! - [`RedisCacheLayer`]: shared distributed tier (feature `cache-redis`)

pub mod file;
pub mod memory;

#[cfg(feature = "cache-redis")]
pub mod redis;

pub use file::FileCacheLayer;
pub use memory::{CacheEntrySnapshot, MemoryCacheLayer};

#[cfg(feature = "cache-redis")]
pub use self::redis::RedisCacheLayer;
