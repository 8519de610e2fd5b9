//! The request pipeline.
//!
//! A [`Pipeline`] is built once with its collaborators and then accepts any
//! number of requests. Each request walks the stages on the scheduler's
//! lanes:
//!
//! ```text
//! submit ─► dispatch ──┬─► download ─► load ─► deliver
//!           (memory    │   (persistent   (memory re-check,
//!            cache)    │    cache, fetch) decode, store)
//!                      └───────────────► load  (local files)
//! ```
//!
//! Downloads coalesce on the network key, loads on the request key, so
//! concurrent equivalent requests share one fetch and one decode.
//!
//! # Example
//!
//! ```ignore
//! let pipeline = Pipeline::builder()
//!     .cache(Arc::new(TieredCache::memory_only(64 * 1024 * 1024)))
//!     .fetcher(Arc::new(HttpFetcher::new(Duration::from_secs(30), "demo")?))
//!     .decoder(Arc::new(PassthroughDecoder))
//!     .build()?;
//!
//! let mut handle = pipeline.submit(FetchRequest::new("https://example.com/a.png"));
//! let outcome = handle.wait().await;
//! ```

mod config;
mod stages;
mod stats;

pub use config::PipelineConfig;
pub use stats::PipelineStats;

use crate::coalesce::{CoalescingRegistry, Namespace};
use crate::delivery::ResultDelivery;
use crate::error::ErrorCause;
use crate::request::{
    ConsumerHandle, FetchRequest, Outcome, Request, RequestHandle, RequestId, RequestKey,
    RequestShared, State, SyncTerminal, UriKind,
};
use crate::scheduler::{LaneKind, StageScheduler};
use crate::traits::{CacheFacade, Decoder, Fetcher};
use stages::{StageTask, Step};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Errors from [`PipelineBuilder::build`].
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no cache configured")]
    MissingCache,

    #[error("no fetcher configured")]
    MissingFetcher,

    #[error("no decoder configured")]
    MissingDecoder,

    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

// =============================================================================
// Builder
// =============================================================================

/// Collects collaborators and configuration for a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    cache: Option<Arc<dyn CacheFacade>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    decoder: Option<Arc<dyn Decoder>>,
    config: PipelineConfig,
    runtime: Option<Handle>,
}

impl PipelineBuilder {
    pub fn cache<C: CacheFacade>(mut self, cache: Arc<C>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn fetcher<F: Fetcher>(mut self, fetcher: Arc<F>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn decoder<D: Decoder>(mut self, decoder: Arc<D>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime for lane workers and the callback task. Defaults to the
    /// runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        let cache = self.cache.ok_or(BuildError::MissingCache)?;
        let fetcher = self.fetcher.ok_or(BuildError::MissingFetcher)?;
        let decoder = self.decoder.ok_or(BuildError::MissingDecoder)?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };

        let inner = PipelineInner::new(cache, fetcher, decoder, self.config, runtime);
        info!(
            fetcher = inner.fetcher.name(),
            memory_cache = inner.cache.memory_enabled(),
            persistent_cache = inner.cache.persistent_enabled(),
            "Pipeline ready"
        );
        Ok(Pipeline { inner })
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Tiered fetch pipeline with request coalescing.
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Submits a request for asynchronous processing.
    ///
    /// Never blocks. The outcome arrives through the listener, if any, and
    /// through [`RequestHandle::wait`]. A `sync` option on the request is
    /// ignored here; use [`execute`](Self::execute) for inline processing.
    pub fn submit(&self, request: FetchRequest) -> RequestHandle {
        let (req, handle) = match self.inner.admit(request, false) {
            Ok(admitted) => admitted,
            Err(handle) => return handle,
        };
        req.set_state(State::WaitDispatch);
        self.inner.route(Step::Dispatch(req));
        handle
    }

    /// Runs a request inline on the calling task.
    ///
    /// The request never coalesces and its callbacks run inline. Decoding
    /// and persistent cache access happen directly on the calling task. The
    /// terminal callback is delivered here before returning, even when the
    /// request was canceled from another thread.
    pub async fn execute(&self, request: FetchRequest) -> Outcome {
        let (req, handle) = match self.inner.admit(request, true) {
            Ok(admitted) => admitted,
            Err(handle) => {
                drop(SyncTerminal::new(Arc::clone(handle.shared())));
                return final_outcome(&handle);
            }
        };
        let terminal = SyncTerminal::new(Arc::clone(handle.shared()));
        req.set_state(State::WaitDispatch);
        self.inner.drive_inline(Step::Dispatch(req)).await;
        drop(terminal);
        final_outcome(&handle)
    }

    /// Stops accepting work. Idempotent.
    ///
    /// Requests submitted afterwards fail with `PipelineShutdown`; queued
    /// requests fail the same way when their stage starts.
    pub fn shutdown(&self) {
        self.inner.scheduler.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.scheduler.is_shutdown()
    }

    /// Waits for the lanes to drain and pending callbacks to be delivered.
    pub async fn join(&self) {
        self.inner.scheduler.join().await;
        self.inner.delivery.flush().await;
        debug!("Pipeline joined");
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            lanes: self.inner.scheduler.stats(),
            downloads: self.inner.downloads.stats(),
            loads: self.inner.loads.stats(),
            downloads_in_flight: self.inner.downloads.in_flight_count(),
            loads_in_flight: self.inner.loads.in_flight_count(),
            delivered: self.inner.delivery.stats(),
        }
    }

    /// Logs lane, coalescing and delivery counters at info level.
    pub fn log_stats(&self) {
        for lane in self.inner.scheduler.stats() {
            info!(
                lane = %lane.kind,
                workers = lane.workers,
                queued = lane.queued,
                submitted = lane.submitted,
                executed = lane.executed,
                discarded = lane.discarded,
                rejected = lane.rejected,
                peak_queued = lane.peak_queued,
                "Lane statistics"
            );
        }
        self.inner.downloads.log_stats();
        self.inner.loads.log_stats();

        let delivered = self.inner.delivery.stats();
        info!(
            completed = delivered.completed,
            failed = delivered.failed,
            canceled = delivered.canceled,
            "Delivery statistics"
        );
    }
}

fn final_outcome(handle: &RequestHandle) -> Outcome {
    handle.outcome().unwrap_or_else(|| {
        Outcome::Failed(ErrorCause::ResultLost(
            "request ended without an outcome".to_string(),
        ))
    })
}

// =============================================================================
// Shared internals
// =============================================================================

pub(crate) struct PipelineInner {
    cache: Arc<dyn CacheFacade>,
    fetcher: Arc<dyn Fetcher>,
    decoder: Arc<dyn Decoder>,
    scheduler: StageScheduler,
    downloads: Arc<CoalescingRegistry>,
    loads: Arc<CoalescingRegistry>,
    delivery: ResultDelivery,
    runtime: Handle,
    next_id: AtomicU64,
}

impl PipelineInner {
    fn new(
        cache: Arc<dyn CacheFacade>,
        fetcher: Arc<dyn Fetcher>,
        decoder: Arc<dyn Decoder>,
        config: PipelineConfig,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<PipelineInner>| {
            let scheduler = StageScheduler::new(config.lanes, runtime.clone());
            let (delivery, _callback_task) = ResultDelivery::spawn(&runtime);

            let persistent = Arc::clone(&cache);
            let downloads = CoalescingRegistry::new(
                Namespace::Download,
                scheduler.shutdown_token(),
                Box::new(move |r: &Request| {
                    !r.is_sync() && r.options().disk_cache && persistent.persistent_enabled()
                }),
                replay_to(weak.clone(), Step::Download),
            );

            let memory = Arc::clone(&cache);
            let loads = CoalescingRegistry::new(
                Namespace::Load,
                scheduler.shutdown_token(),
                Box::new(move |r: &Request| {
                    !r.is_sync() && r.options().memory_cache && memory.memory_enabled()
                }),
                replay_to(weak.clone(), Step::Load),
            );

            Self {
                cache,
                fetcher,
                decoder,
                scheduler,
                downloads,
                loads,
                delivery,
                runtime,
                next_id: AtomicU64::new(1),
            }
        })
    }

    /// Creates the request record, or finishes it right away when the URI is
    /// unusable or the pipeline is shut down.
    fn admit(
        &self,
        request: FetchRequest,
        sync: bool,
    ) -> Result<(Request, RequestHandle), RequestHandle> {
        let (uri, mut options, listener) = request.into_parts();
        options.sync = sync;

        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let key = RequestKey::new(&uri, &options);
        let shared = RequestShared::new(
            id,
            key,
            sync,
            ConsumerHandle::new(listener),
            self.delivery.clone(),
        );
        let handle = RequestHandle::new(Arc::clone(&shared));

        let kind = match UriKind::classify(&uri) {
            Ok(kind) => kind,
            Err(cause) => {
                debug!(request_id = %id, uri = %uri, error = %cause, "Rejected request");
                shared.finish(Outcome::Failed(cause));
                return Err(handle);
            }
        };

        if self.scheduler.is_shutdown() {
            shared.finish(Outcome::Failed(ErrorCause::PipelineShutdown));
            return Err(handle);
        }

        debug!(request_id = %id, key = %shared.key(), sync, "Request admitted");
        Ok((Request::new(shared, uri.trim().to_string(), kind, options), handle))
    }

    /// Queues the next step of an asynchronous request on its lane.
    fn route(self: &Arc<Self>, step: Step) {
        let lane = match &step {
            Step::Dispatch(_) => LaneKind::Dispatch,
            Step::Download(_) => LaneKind::Network,
            Step::Load(_) => LaneKind::Local,
            Step::Done => return,
        };
        self.scheduler
            .submit(lane, Box::new(StageTask::new(Arc::clone(self), step)));
    }

    /// Runs every step of a synchronous request on the calling task.
    async fn drive_inline(self: &Arc<Self>, mut step: Step) {
        loop {
            step = match step {
                Step::Dispatch(req) => self.dispatch(req),
                Step::Download(req) => self.download(req).await,
                Step::Load(req) => self.load(req).await,
                Step::Done => break,
            };
        }
    }
}

/// Builds a replay hook that sends followers back to the stage they parked
/// in. Followers of a pipeline that is gone are dropped, which fails them.
fn replay_to(
    pipeline: Weak<PipelineInner>,
    stage: fn(Request) -> Step,
) -> crate::coalesce::Replay {
    Box::new(move |req: Request| {
        if let Some(inner) = pipeline.upgrade() {
            inner.route(stage(req));
        }
    })
}
