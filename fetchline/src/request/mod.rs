//! Requests and their state.
//!
//! A request is split in two:
//!
//! - [`Request`] is the mutable record. It is owned by whichever stage
//!   handler is running it and moves from lane to lane by value, so there is
//!   never more than one writer.
//! - `RequestShared` holds what other threads need to see: the state cell,
//!   the terminal guard and the consumer handle.
//!
//! Callers build a [`FetchRequest`] and get a [`RequestHandle`] back.

mod handle;
mod key;
mod options;
mod shared;
mod state;

pub use handle::RequestHandle;
pub use key::{NetworkKey, RequestKey, UriKind};
pub use options::{RequestLevel, RequestOptions};
pub(crate) use shared::{RequestShared, SyncTerminal};
pub use shared::{ConsumerHandle, RequestId};
pub use state::{Delivered, LoadFrom, Outcome, State, Status};

use crate::delivery::RequestListener;
use crate::error::{CancelCause, ErrorCause};
use crate::traits::{Artifact, CancelProbe, DecodeInput, DecodeOptions, ProgressSink};
use bytes::Bytes;
use std::sync::{Arc, Weak};
use tracing::warn;

// ============================================================================
// Caller-facing builder
// ============================================================================

/// What a caller asks the pipeline for.
///
/// ```ignore
/// let handle = pipeline.submit(
///     FetchRequest::new("https://example.com/a.png")
///         .options(RequestOptions::default().with_processing("thumb"))
///         .listener(&listener),
/// );
/// ```
#[derive(Clone)]
pub struct FetchRequest {
    uri: String,
    options: RequestOptions,
    listener: Option<Weak<dyn RequestListener>>,
}

impl FetchRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            options: RequestOptions::default(),
            listener: None,
        }
    }

    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers a listener for callbacks.
    ///
    /// Only a weak reference is kept. Dropping the last `Arc` breaks the
    /// consumer and the request is canceled at the next stage boundary.
    pub fn listener<L: RequestListener + 'static>(mut self, listener: &Arc<L>) -> Self {
        let weak: Weak<L> = Arc::downgrade(listener);
        self.listener = Some(weak);
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn into_parts(
        self,
    ) -> (String, RequestOptions, Option<Weak<dyn RequestListener>>) {
        (self.uri, self.options, self.listener)
    }
}

// ============================================================================
// Request record
// ============================================================================

/// The in-flight request record.
///
/// Dropping a request that has not reached a terminal state fails it with
/// [`ErrorCause::ResultLost`]: a request can be lost to a panic or a bug, but
/// never silently.
pub struct Request {
    shared: Arc<RequestShared>,
    uri: String,
    kind: UriKind,
    network_key: NetworkKey,
    options: RequestOptions,
    raw: Option<(Bytes, LoadFrom)>,
}

impl Request {
    pub(crate) fn new(
        shared: Arc<RequestShared>,
        uri: String,
        kind: UriKind,
        options: RequestOptions,
    ) -> Self {
        let network_key = NetworkKey::new(&uri);
        Self {
            shared,
            uri,
            kind,
            network_key,
            options,
            raw: None,
        }
    }

    pub fn id(&self) -> RequestId {
        self.shared.id()
    }

    pub fn key(&self) -> &RequestKey {
        self.shared.key()
    }

    pub fn network_key(&self) -> &NetworkKey {
        &self.network_key
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn kind(&self) -> &UriKind {
        &self.kind
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    pub fn is_sync(&self) -> bool {
        self.shared.is_sync()
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<RequestShared> {
        &self.shared
    }

    pub(crate) fn set_state(&self, state: State) {
        self.shared.advance(state);
    }

    pub(crate) fn fail(&self, cause: ErrorCause) -> bool {
        self.shared.finish(Outcome::Failed(cause))
    }

    pub(crate) fn cancel(&self, cause: CancelCause) -> bool {
        self.shared.finish(Outcome::Canceled(cause))
    }

    pub(crate) fn complete(&self, artifact: Artifact, from: LoadFrom) -> bool {
        self.shared
            .finish(Outcome::Completed(Delivered { artifact, from }))
    }

    /// Returns true if the request should not continue.
    ///
    /// A consumer that went away is turned into `Canceled(ConsumerBroken)`
    /// here.
    pub(crate) fn check_canceled(&self) -> bool {
        if self.shared.is_finished() {
            return true;
        }
        if self.shared.consumer().is_broken() {
            self.cancel(CancelCause::ConsumerBroken);
            return true;
        }
        false
    }

    pub(crate) fn notify_started(&self) {
        self.shared.notify_started();
    }

    pub(crate) fn set_raw(&mut self, data: Bytes, from: LoadFrom) {
        self.raw = Some((data, from));
    }

    /// Source reported on delivery when the artifact was decoded here.
    pub(crate) fn raw_source(&self) -> LoadFrom {
        match (&self.kind, &self.raw) {
            (UriKind::Local(_), _) => LoadFrom::Local,
            (UriKind::Network, Some((_, from))) => *from,
            (UriKind::Network, None) => LoadFrom::Network,
        }
    }

    /// Input for the decoder, or `None` if a network request reached the load
    /// stage without bytes.
    pub(crate) fn decode_input(&self) -> Option<DecodeInput> {
        match &self.kind {
            UriKind::Local(path) => Some(DecodeInput::Local(path.clone())),
            UriKind::Network => self
                .raw
                .as_ref()
                .map(|(data, _)| DecodeInput::Bytes(data.clone())),
        }
    }

    pub(crate) fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            processing: self.options.processing.clone(),
        }
    }

    pub(crate) fn progress_sink(&self) -> ProgressSink {
        ProgressSink::for_request(Arc::clone(&self.shared))
    }

    pub(crate) fn cancel_probe(&self) -> CancelProbe {
        CancelProbe::for_request(Arc::clone(&self.shared))
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.shared.is_finished() {
            return;
        }
        warn!(
            request_id = %self.shared.id(),
            key = %self.shared.key(),
            state = %self.shared.state(),
            "Request dropped before reaching a terminal state"
        );
        self.shared.finish(Outcome::Failed(ErrorCause::ResultLost(format!(
            "request dropped in state {}",
            self.shared.state()
        ))));
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id())
            .field("key", self.key())
            .field("state", &self.state())
            .field("sync", &self.is_sync())
            .finish()
    }
}
