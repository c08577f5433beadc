#![allow(clippy::doc_markdown)] // Allow technical terms like SHA-256, Redis in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Pixelgate Core
//!
//! Resource resolution core for an on-demand image proxy.
//!
//! ## Overview
//!
//! Pixelgate fetches remote images, transforms them on demand (resize, format,
//! trim) and serves the result with HTTP caching semantics. This crate is the
//! resolution pipeline behind it; HTTP routing, parameter parsing and the image
//! codec itself live in the host service.
//!
//! ## Key Features
//!
//! - **Deterministic identity**: logically identical requests share one SHA-256 fingerprint
//! - **Multi-layer cache**: memory (Moka), file and Redis tiers with promotion and write-through
//! - **Single-flight**: at most one in-flight fetch and transform per identity
//! - **Circuit breaking**: a failing upstream host is isolated and the default asset served
//! - **Degrade, don't fail**: an unavailable cache tier only costs hit rate
//!
//! ## Module Organization
//!
//! - [`identity`] - Request fingerprinting
//! - [`cache`] - Cache layers, keys and the multi-layer composition
//! - [`resilience`] - Circuit breakers and request deduplication
//! - [`resource`] - The resolution operation and its collaborators
//! - [`config`] - Layered configuration
//! - [`error`] - Crate-level error type
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pixelgate_core::config::ConfigManager;
//! use pixelgate_core::resource::{CopyTransformer, ProcessingRequest, ResourceResolutionOperation};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! pixelgate_core::logging::init_structured_logging();
//!
//! let manager = ConfigManager::load()?;
//! let operation =
//!     ResourceResolutionOperation::from_config(manager.config(), Arc::new(CopyTransformer)).await?;
//!
//! let request = ProcessingRequest::new("https://images.example.com/cat.jpg").with_size(640, 480);
//! let resolved = operation.resolve(request).await?;
//! println!("{} bytes, etag {}", resolved.content_length(), resolved.etag);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                                # Unit and integration tests
//! cargo test --features test-services       # Plus Redis tests (REDIS_URL)
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod logging;
pub mod resilience;
pub mod resource;

pub use cache::{CacheKeyStrategy, MultiLayerCache};
pub use config::{ConfigManager, PixelgateConfig};
pub use error::{PixelgateError, Result};
pub use identity::RequestIdentity;
pub use resilience::{CircuitBreaker, CircuitBreakerManager, RequestDeduplicator};
pub use resource::{
    ProcessingRequest, ResolutionError, ResolvedResource, ResourceMetaData,
    ResourceResolutionOperation,
};
