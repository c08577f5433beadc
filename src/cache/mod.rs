//! # Cache Module
//!
//! Multi-layer caching for resolved resources.
//!
//! - [`CacheLayer`]: uniform byte-oriented contract every tier implements
//! - [`layers`]: memory (Moka), file, and distributed (Redis, feature `cache-redis`)
//! - [`MultiLayerCache`]: read-through with promotion, concurrent write-through
//! - [`CircuitBreakerLayer`]: circuit breaker guard for remote tiers
//! - [`CacheKeyStrategy`]: `namespace:identifier[:paramsHash]` keys
//! - [`CacheCodec`]: typed (de)serialization at the composed cache's edge

pub mod circuit_breaker;
pub mod codec;
pub mod errors;
pub mod key;
pub mod layers;
pub mod multi_layer;
pub mod traits;

pub use circuit_breaker::CircuitBreakerLayer;
pub use codec::{decode_framed, encode_framed, CacheCodec, Json};
pub use errors::{CacheError, CacheResult};
pub use key::{CacheKeyStrategy, ParsedCacheKey};
pub use multi_layer::{LayerStats, MultiLayerCache, MultiLayerCacheStats};
pub use traits::{CacheLayer, CachedValue, LayerUsage};
