//! # System Constants
//!
//! Operational boundaries and defaults shared by the resolution pipeline,
//! the cache tiers and the on-disk artifact layout.

use std::time::Duration;

/// Largest accepted resize target, 8K UHD
pub mod limits {
    pub const MAX_RESIZE_WIDTH: u64 = 7680;
    pub const MAX_RESIZE_HEIGHT: u64 = 4320;
    pub const MAX_RESIZE_PIXELS: u64 = MAX_RESIZE_WIDTH * MAX_RESIZE_HEIGHT;

    pub const MIN_QUALITY: u8 = 1;
    pub const MAX_QUALITY: u8 = 100;

    pub const MAX_TRIM_THRESHOLD: f64 = 255.0;
}

/// File extensions of the artifacts stored per request identity
pub mod artifacts {
    /// Transformed content
    pub const CONTENT_EXTENSION: &str = "rsc";
    /// Metadata sidecar
    pub const METADATA_EXTENSION: &str = "rsm";
    /// In-progress download
    pub const TEMP_EXTENSION: &str = "rst";
}

/// Cache namespaces used when deriving keys
pub mod namespaces {
    pub const RESOURCE: &str = "resource";
    pub const METADATA: &str = "metadata";
}

/// Current metadata sidecar schema version
pub const METADATA_VERSION: u32 = 1;

/// Default TTL handed to browsers (`max-age`)
pub const DEFAULT_PRIVATE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Default TTL handed to shared caches (`s-maxage`)
pub const DEFAULT_PUBLIC_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Width of the truncated params hash appended to cache keys
pub const CACHE_KEY_HASH_LENGTH: usize = 16;

pub const CACHE_KEY_SEPARATOR: char = ':';
