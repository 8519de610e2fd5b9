//! Collaborator contracts.
//!
//! The pipeline does no I/O or decoding of its own. It drives three
//! collaborators supplied at build time:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Pipeline                             │
//! │  dispatch ──► download ──► load ──► deliver                 │
//! └─────┬──────────────┬───────────┬────────────────────────────┘
//!       │              │           │
//!       ▼              ▼           ▼
//!  CacheFacade      Fetcher     Decoder
//!  (memory tier     (raw bytes  (bytes or local file
//!   + persistent     for a       → artifact)
//!   tier)            NetworkKey)
//! ```
//!
//! Reference implementations live in [`crate::cache`], [`crate::provider`]
//! and [`crate::decode`]; tests substitute counting mocks.

use crate::error::{DecodeError, FetchError};
use crate::request::{NetworkKey, RequestKey, RequestShared};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;

// ============================================================================
// Artifact
// ============================================================================

/// A decoded, consumer-ready result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    data: Bytes,
    content_type: Option<String>,
}

impl Artifact {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ============================================================================
// Cache Facade
// ============================================================================

/// Two-tier cache as seen by the pipeline.
///
/// The memory tier stores decoded artifacts by [`RequestKey`]; the persistent
/// tier stores raw bytes by [`NetworkKey`]. Methods are synchronous: the
/// pipeline calls the persistent tier from a blocking thread, never from a
/// lane worker directly.
///
/// Coalescing relies on `put` and `put_raw` keeping what they are given:
/// followers parked behind a leader are replayed against the cache once the
/// leader finishes. An entry that is dropped on write (too large for the
/// tier, a failed disk write) sends every follower back to do the work
/// itself, one after another.
pub trait CacheFacade: Send + Sync + 'static {
    /// Looks up a decoded artifact.
    fn get(&self, key: &RequestKey) -> Option<Artifact>;

    /// Stores a decoded artifact.
    fn put(&self, key: &RequestKey, artifact: Artifact);

    /// Returns true if a decoded artifact is present.
    fn contains(&self, key: &RequestKey) -> bool {
        self.get(key).is_some()
    }

    /// Looks up raw bytes in the persistent tier.
    fn get_raw(&self, key: &NetworkKey) -> Option<Bytes>;

    /// Stores raw bytes in the persistent tier.
    fn put_raw(&self, key: &NetworkKey, data: Bytes);

    /// Whether the memory tier exists at all.
    fn memory_enabled(&self) -> bool;

    /// Whether the persistent tier exists at all.
    fn persistent_enabled(&self) -> bool;
}

// ============================================================================
// Fetcher
// ============================================================================

/// Retrieves raw bytes for a network key.
///
/// Implementations should report progress through the sink and poll the
/// cancel probe between chunks, returning [`FetchError::Canceled`] once it
/// trips. The pipeline decides the outcome either way.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch<'a>(
        &'a self,
        key: &'a NetworkKey,
        progress: ProgressSink,
        cancel: CancelProbe,
    ) -> BoxFuture<'a, Result<Bytes, FetchError>>;

    /// Returns the fetcher name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Decoder
// ============================================================================

/// Raw input handed to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeInput {
    /// Bytes from the network or the persistent tier.
    Bytes(Bytes),
    /// A local file the decoder reads itself.
    Local(PathBuf),
}

/// Options forwarded from the request to the decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub processing: Option<String>,
}

/// Turns raw input into an artifact. CPU-bound; always run off the lane
/// workers for asynchronous requests.
pub trait Decoder: Send + Sync + 'static {
    fn decode(&self, input: DecodeInput, options: &DecodeOptions) -> Result<Artifact, DecodeError>;
}

// ============================================================================
// Progress and cancellation hooks
// ============================================================================

/// Forwards transfer progress to the request's consumer.
#[derive(Clone)]
pub struct ProgressSink {
    shared: Option<Arc<RequestShared>>,
}

impl ProgressSink {
    pub(crate) fn for_request(shared: Arc<RequestShared>) -> Self {
        Self {
            shared: Some(shared),
        }
    }

    /// A sink that discards everything.
    pub fn noop() -> Self {
        Self { shared: None }
    }

    /// Reports `completed` bytes out of `total`, when known.
    pub fn report(&self, completed: u64, total: Option<u64>) {
        if let Some(shared) = &self.shared {
            shared.notify_progress(completed, total);
        }
    }
}

/// Lets a long-running collaborator notice that nobody wants the result.
#[derive(Clone)]
pub struct CancelProbe {
    shared: Option<Arc<RequestShared>>,
}

impl CancelProbe {
    pub(crate) fn for_request(shared: Arc<RequestShared>) -> Self {
        Self {
            shared: Some(shared),
        }
    }

    /// A probe that never trips.
    pub fn never() -> Self {
        Self { shared: None }
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.is_canceled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_accessors() {
        let artifact = Artifact::new(vec![1u8, 2, 3]).with_content_type("image/png");
        assert_eq!(artifact.len(), 3);
        assert!(!artifact.is_empty());
        assert_eq!(artifact.content_type(), Some("image/png"));
        assert!(Artifact::new(Bytes::new()).is_empty());
    }

    #[test]
    fn test_detached_hooks_are_inert() {
        ProgressSink::noop().report(10, Some(20));
        assert!(!CancelProbe::never().is_canceled());
    }
}
