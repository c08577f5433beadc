//! # Resource Resolution
//!
//! Turns a [`ProcessingRequest`] into a transformed, cached artifact.
//!
//! - [`ResourceResolutionOperation`]: the pipeline itself
//! - [`RequestValidator`], [`ResourceFetcher`], [`ImageTransformer`]: collaborator seams
//! - [`ResourceStorage`]: staged `.rst` downloads and published `.rsc|.rsm` files
//! - [`ResourceMetaData`]: metadata sidecar and HTTP caching headers

pub mod context;
pub mod errors;
pub mod fetch;
pub mod metadata;
pub mod operation;
pub mod request;
pub mod storage;
pub mod transform;
pub mod validation;

pub use context::ResolutionContext;
pub use errors::ResolutionError;
pub use fetch::{
    load_default_asset, ByteStream, FetchError, FetchedResource, HttpResourceFetcher,
    ResourceFetcher,
};
pub use metadata::ResourceMetaData;
pub use operation::{
    CachedResource, ResolutionComponents, ResolutionOutcome, ResolutionSettings,
    ResolutionSource, ResolvedResource, ResourceResolutionOperation,
};
pub use request::{ImageFormat, ProcessingRequest, ResizeFit, ResizeOptions};
pub use storage::{CleanupReport, PersistError, ResourceStorage, StagingPaths};
pub use transform::{
    detect_format, CopyTransformer, ImageTransformer, TransformOutput, TransformPool,
    TransformPoolStats,
};
pub use validation::{DefaultRequestValidator, RequestValidator};
