//! fetchline - tiered resource fetch pipeline
//!
//! Turns a resource URI into a decoded artifact, walking a memory cache,
//! a persistent cache, the network and a decoder, on three scheduling
//! lanes. Concurrent requests for the same resource share one download and
//! one decode.
//!
//! # High-Level API
//!
//! ```ignore
//! use fetchline::{FetchRequest, Pipeline};
//! use fetchline::cache::TieredCache;
//! use fetchline::decode::PassthroughDecoder;
//! use fetchline::provider::HttpFetcher;
//!
//! let pipeline = Pipeline::builder()
//!     .cache(Arc::new(TieredCache::memory_only(64 * 1024 * 1024)))
//!     .fetcher(Arc::new(HttpFetcher::new(Duration::from_secs(30), "demo")?))
//!     .decoder(Arc::new(PassthroughDecoder))
//!     .build()?;
//!
//! let mut handle = pipeline.submit(FetchRequest::new("https://example.com/a.png"));
//! let outcome = handle.wait().await;
//! ```

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod decode;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod provider;
pub mod request;
pub mod scheduler;
pub mod traits;

pub use delivery::RequestListener;
pub use error::{CancelCause, DecodeError, ErrorCause, FetchError};
pub use pipeline::{BuildError, Pipeline, PipelineBuilder, PipelineConfig, PipelineStats};
pub use request::{
    Delivered, FetchRequest, LoadFrom, Outcome, RequestHandle, RequestId, RequestKey,
    RequestLevel, RequestOptions, State,
};
pub use traits::{Artifact, CacheFacade, Decoder, Fetcher};

/// Version of the fetchline library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
