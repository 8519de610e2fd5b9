//! Stage handlers: dispatch, download and load.
//!
//! Each handler takes ownership of the request, does its part and returns
//! the next [`Step`]. Asynchronous requests hop lanes between steps;
//! synchronous ones run every step back to back on the caller's task.
//!
//! Handlers check for cancellation when they start and again after every
//! blocking call. Once a request is terminal a handler only lets go of it.

use super::PipelineInner;
use crate::coalesce::{CoalescingRegistry, LeaderOutcome, Leadership, Registration};
use crate::error::{CancelCause, ErrorCause, FetchError};
use crate::request::{LoadFrom, Request, RequestLevel, State};
use crate::scheduler::LaneTask;
use crate::traits::Artifact;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Where a request goes next.
pub(crate) enum Step {
    Dispatch(Request),
    Download(Request),
    Load(Request),
    Done,
}

impl Step {
    fn into_request(self) -> Option<Request> {
        match self {
            Step::Dispatch(req) | Step::Download(req) | Step::Load(req) => Some(req),
            Step::Done => None,
        }
    }
}

/// One step of an asynchronous request, queued on a lane.
pub(crate) struct StageTask {
    pipeline: Arc<PipelineInner>,
    step: Step,
}

impl StageTask {
    pub(crate) fn new(pipeline: Arc<PipelineInner>, step: Step) -> Self {
        Self { pipeline, step }
    }
}

impl LaneTask for StageTask {
    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let StageTask { pipeline, step } = *self;
        Box::pin(async move {
            let next = match step {
                Step::Dispatch(req) => pipeline.dispatch(req),
                Step::Download(req) => pipeline.download(req).await,
                Step::Load(req) => pipeline.load(req).await,
                Step::Done => Step::Done,
            };
            pipeline.route(next);
        })
    }

    fn reject(self: Box<Self>, cause: ErrorCause) {
        if let Some(req) = self.step.into_request() {
            debug!(request_id = %req.id(), error = %cause, "Stage task rejected");
            req.fail(cause);
        }
    }
}

/// Result of obtaining raw bytes for the load stage.
enum Fetched {
    Ready(Bytes, LoadFrom),
    Failed(ErrorCause),
    Canceled(CancelCause),
    /// The request was canceled while the work was in progress.
    Abandoned,
}

/// Result of producing the artifact.
enum Produced {
    Ready(Artifact, LoadFrom),
    Failed(ErrorCause),
}

/// Coalescing entry point shared by download and load.
enum Coalesced {
    /// Parked behind a leader.
    Parked,
    /// Do the work; `Some` when leading followers.
    Work(Request, Option<Leadership>),
}

fn coalesce(registry: &Arc<CoalescingRegistry>, req: Request) -> Coalesced {
    let req = match registry.try_join(req) {
        Ok(()) => return Coalesced::Parked,
        Err(req) => req,
    };
    match registry.register(req) {
        Registration::Leader(req, leadership) => Coalesced::Work(req, Some(leadership)),
        Registration::Joined => Coalesced::Parked,
        Registration::Ineligible(req) => Coalesced::Work(req, None),
    }
}

impl PipelineInner {
    /// Common stage entry check.
    fn enter(&self, req: &Request) -> bool {
        if req.check_canceled() {
            trace!(request_id = %req.id(), "Request canceled before stage");
            return false;
        }
        if !req.is_sync() && self.scheduler.is_shutdown() {
            req.fail(ErrorCause::PipelineShutdown);
            return false;
        }
        true
    }

    fn memory_usable(&self, req: &Request) -> bool {
        req.options().memory_cache && self.cache.memory_enabled()
    }

    fn persistent_usable(&self, req: &Request) -> bool {
        req.options().disk_cache && self.cache.persistent_enabled()
    }

    /// Runs blocking work off the lane workers, or inline for synchronous
    /// requests. `None` if the work panicked.
    async fn off_lane<T, F>(&self, inline: bool, work: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if inline {
            return Some(work());
        }
        match self.runtime.spawn_blocking(work).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!(error = %e, "Blocking stage work failed");
                None
            }
        }
    }

    fn deliver(&self, req: Request, artifact: Artifact, from: LoadFrom) {
        req.set_state(State::WaitDeliver);
        trace!(request_id = %req.id(), from = %from, bytes = artifact.len(), "Delivering");
        req.complete(artifact, from);
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Routing only: memory cache probe, level check, choice of next lane.
    pub(super) fn dispatch(&self, req: Request) -> Step {
        if !self.enter(&req) {
            return Step::Done;
        }
        req.set_state(State::Dispatching);

        if self.memory_usable(&req) {
            if let Some(artifact) = self.cache.get(req.key()) {
                debug!(request_id = %req.id(), key = %req.key(), "Memory cache hit");
                self.deliver(req, artifact, LoadFrom::MemoryCache);
                return Step::Done;
            }
        }

        if req.options().level == RequestLevel::Memory {
            req.cancel(CancelCause::LevelIsMemory);
            return Step::Done;
        }

        req.notify_started();
        if req.kind().is_local() {
            req.set_state(State::WaitLoad);
            Step::Load(req)
        } else {
            req.set_state(State::WaitDownload);
            Step::Download(req)
        }
    }

    // =========================================================================
    // Download
    // =========================================================================

    pub(super) async fn download(&self, req: Request) -> Step {
        if !self.enter(&req) {
            return Step::Done;
        }
        req.set_state(State::Downloading);

        let (mut req, leadership) = match coalesce(&self.downloads, req) {
            Coalesced::Parked => return Step::Done,
            Coalesced::Work(req, leadership) => (req, leadership),
        };

        let fetched = self.fetch_raw(&req).await;

        if let Some(leadership) = leadership {
            let outcome = match &fetched {
                Fetched::Ready(..) => LeaderOutcome::Succeeded,
                Fetched::Failed(cause) => LeaderOutcome::Failed(cause.clone()),
                Fetched::Canceled(_) | Fetched::Abandoned => LeaderOutcome::Canceled,
            };
            self.downloads.unregister(leadership, outcome);
        }

        match fetched {
            Fetched::Ready(data, from) => {
                if req.check_canceled() {
                    return Step::Done;
                }
                req.set_raw(data, from);
                req.set_state(State::WaitLoad);
                Step::Load(req)
            }
            Fetched::Failed(cause) => {
                req.fail(cause);
                Step::Done
            }
            Fetched::Canceled(cause) => {
                req.cancel(cause);
                Step::Done
            }
            Fetched::Abandoned => {
                if !req.check_canceled() {
                    req.fail(ErrorCause::FetchFailed(FetchError::Canceled));
                }
                Step::Done
            }
        }
    }

    /// Persistent cache, then the fetcher.
    async fn fetch_raw(&self, req: &Request) -> Fetched {
        let persistent = self.persistent_usable(req);

        if persistent {
            let cache = Arc::clone(&self.cache);
            let key = req.network_key().clone();
            let hit = self
                .off_lane(req.is_sync(), move || cache.get_raw(&key))
                .await
                .flatten();
            if req.check_canceled() {
                return Fetched::Abandoned;
            }
            if let Some(data) = hit {
                debug!(request_id = %req.id(), key = %req.network_key(), "Persistent cache hit");
                return Fetched::Ready(data, LoadFrom::DiskCache);
            }
        }

        if req.options().level == RequestLevel::Local {
            return Fetched::Canceled(CancelCause::LevelIsLocal);
        }

        debug!(
            request_id = %req.id(),
            key = %req.network_key(),
            fetcher = self.fetcher.name(),
            "Fetching"
        );
        let result = self
            .fetcher
            .fetch(req.network_key(), req.progress_sink(), req.cancel_probe())
            .await;

        let data = match result {
            Ok(data) => data,
            Err(FetchError::Canceled) => return Fetched::Abandoned,
            Err(e) => {
                debug!(request_id = %req.id(), key = %req.network_key(), error = %e, "Fetch failed");
                return Fetched::Failed(ErrorCause::FetchFailed(e));
            }
        };

        if persistent {
            let cache = Arc::clone(&self.cache);
            let key = req.network_key().clone();
            let stored = data.clone();
            self.off_lane(req.is_sync(), move || cache.put_raw(&key, stored))
                .await;
        }

        Fetched::Ready(data, LoadFrom::Network)
    }

    // =========================================================================
    // Load
    // =========================================================================

    pub(super) async fn load(&self, req: Request) -> Step {
        if !self.enter(&req) {
            return Step::Done;
        }
        req.set_state(State::Loading);

        let (req, leadership) = match coalesce(&self.loads, req) {
            Coalesced::Parked => return Step::Done,
            Coalesced::Work(req, leadership) => (req, leadership),
        };

        let produced = self.produce(&req).await;

        if let Some(leadership) = leadership {
            let outcome = match &produced {
                Produced::Ready(..) => LeaderOutcome::Succeeded,
                Produced::Failed(cause) => LeaderOutcome::Failed(cause.clone()),
            };
            self.loads.unregister(leadership, outcome);
        }

        // A result that arrives after cancellation is discarded.
        if req.check_canceled() {
            return Step::Done;
        }

        match produced {
            Produced::Ready(artifact, from) => self.deliver(req, artifact, from),
            Produced::Failed(cause) => {
                req.fail(cause);
            }
        }
        Step::Done
    }

    /// Memory re-check, decode, post-condition, memory store.
    async fn produce(&self, req: &Request) -> Produced {
        let memory = self.memory_usable(req);

        req.set_state(State::MemoryCheck);
        if memory {
            if let Some(artifact) = self.cache.get(req.key()) {
                debug!(request_id = %req.id(), key = %req.key(), "Memory cache hit before decode");
                return Produced::Ready(artifact, LoadFrom::MemoryCache);
            }
        }

        let Some(input) = req.decode_input() else {
            return Produced::Failed(ErrorCause::ResultLost(
                "no raw input reached the load stage".to_string(),
            ));
        };

        req.set_state(State::Decoding);
        let decoder = Arc::clone(&self.decoder);
        let options = req.decode_options();
        let decoded = self
            .off_lane(req.is_sync(), move || decoder.decode(input, &options))
            .await;

        let artifact = match decoded {
            Some(Ok(artifact)) => artifact,
            Some(Err(e)) => {
                debug!(request_id = %req.id(), key = %req.key(), error = %e, "Decode failed");
                return Produced::Failed(ErrorCause::DecodeFailed(e));
            }
            None => {
                return Produced::Failed(ErrorCause::ResultLost(
                    "decoder did not return".to_string(),
                ))
            }
        };

        req.set_state(State::Processing);
        if artifact.is_empty() {
            return Produced::Failed(ErrorCause::ResultLost(
                "decoder produced an empty artifact".to_string(),
            ));
        }
        if memory {
            self.cache.put(req.key(), artifact.clone());
        }

        Produced::Ready(artifact, req.raw_source())
    }
}
