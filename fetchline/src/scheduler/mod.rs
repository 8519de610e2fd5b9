//! Three-lane stage scheduler.
//!
//! ```text
//!                 ┌──────────────────────────┐
//!  submit ──────► │ dispatch (1 worker, FIFO)│ ── routing only, never blocks
//!                 └────────────┬─────────────┘
//!                              │
//!            ┌─────────────────┴─────────────────┐
//!            ▼                                   ▼
//!  ┌───────────────────────┐          ┌───────────────────────┐
//!  │ network (N workers,   │ ───────► │ local (M workers,     │
//!  │ bounded, drop oldest) │          │ bounded, drop oldest) │
//!  └───────────────────────┘          └───────────────────────┘
//! ```
//!
//! Lanes are created on first use. Tasks evicted from a full bounded queue
//! are rejected rather than dropped, so their requests always reach a
//! terminal state.

mod lane;

use crate::error::ErrorCause;
use futures::future::BoxFuture;
use lane::Lane;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default worker count of the network lane.
pub const DEFAULT_NETWORK_WORKERS: usize = 3;

/// Default queue bound of the network lane.
pub const DEFAULT_NETWORK_QUEUE: usize = 200;

/// Default worker count of the local lane.
pub const DEFAULT_LOCAL_WORKERS: usize = 3;

/// Default queue bound of the local lane.
pub const DEFAULT_LOCAL_QUEUE: usize = 200;

// =============================================================================
// Lane identity and configuration
// =============================================================================

/// The three execution lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneKind {
    /// Serial routing stage.
    Dispatch,
    /// Downloads.
    Network,
    /// Local file loads and decoding.
    Local,
}

impl LaneKind {
    pub const ALL: [LaneKind; 3] = [LaneKind::Dispatch, LaneKind::Network, LaneKind::Local];
}

impl fmt::Display for LaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch => write!(f, "dispatch"),
            Self::Network => write!(f, "network"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Shape of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneConfig {
    /// Number of worker tasks (at least one is always started).
    pub workers: usize,
    /// Queue bound; `None` for unbounded.
    pub queue_capacity: Option<usize>,
}

impl LaneConfig {
    pub fn bounded(workers: usize, capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity: Some(capacity),
        }
    }

    pub fn unbounded(workers: usize) -> Self {
        Self {
            workers,
            queue_capacity: None,
        }
    }
}

/// Configuration of all three lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub dispatch: LaneConfig,
    pub network: LaneConfig,
    pub local: LaneConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch: LaneConfig::unbounded(1),
            network: LaneConfig::bounded(DEFAULT_NETWORK_WORKERS, DEFAULT_NETWORK_QUEUE),
            local: LaneConfig::bounded(DEFAULT_LOCAL_WORKERS, DEFAULT_LOCAL_QUEUE),
        }
    }
}

impl SchedulerConfig {
    pub fn lane(&self, kind: LaneKind) -> LaneConfig {
        match kind {
            LaneKind::Dispatch => self.dispatch,
            LaneKind::Network => self.network,
            LaneKind::Local => self.local,
        }
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// A unit of work queued on a lane.
pub trait LaneTask: Send + 'static {
    /// Runs the task on a lane worker.
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;

    /// Resolves the task without running it (evicted, or lane closed).
    fn reject(self: Box<Self>, cause: ErrorCause);
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of one lane's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneStats {
    pub kind: LaneKind,
    pub workers: usize,
    pub queued: usize,
    pub submitted: u64,
    pub executed: u64,
    pub discarded: u64,
    pub rejected: u64,
    pub peak_queued: usize,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Owns the three lanes and their workers.
pub struct StageScheduler {
    config: SchedulerConfig,
    runtime: Handle,
    cancel: CancellationToken,
    dispatch: OnceLock<Arc<Lane>>,
    network: OnceLock<Arc<Lane>>,
    local: OnceLock<Arc<Lane>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl StageScheduler {
    pub fn new(config: SchedulerConfig, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            cancel: CancellationToken::new(),
            dispatch: OnceLock::new(),
            network: OnceLock::new(),
            local: OnceLock::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn slot(&self, kind: LaneKind) -> &OnceLock<Arc<Lane>> {
        match kind {
            LaneKind::Dispatch => &self.dispatch,
            LaneKind::Network => &self.network,
            LaneKind::Local => &self.local,
        }
    }

    fn lane(&self, kind: LaneKind) -> &Arc<Lane> {
        self.slot(kind).get_or_init(|| {
            let lane = Lane::new(kind, self.config.lane(kind), self.cancel.child_token());
            let handles = lane.start(&self.runtime);
            self.workers.lock().extend(handles);
            lane
        })
    }

    /// Queues `task` on `kind`.
    ///
    /// Never blocks. After [`shutdown`](Self::shutdown) the task is rejected
    /// with `PipelineShutdown` instead of being queued.
    pub fn submit(&self, kind: LaneKind, task: Box<dyn LaneTask>) {
        self.lane(kind).push(task);
    }

    /// Closes every lane. Idempotent.
    ///
    /// Tasks already queued still run; workers exit once their lane is empty.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!("Stage scheduler shutting down");
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for every lane worker to exit. Call after `shutdown`.
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.workers.lock());
        debug!(workers = handles.len(), "Joining lane workers");
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                debug!(error = %e, "Lane worker ended abnormally");
            }
        }
    }

    /// Counters for every lane created so far.
    pub fn stats(&self) -> Vec<LaneStats> {
        LaneKind::ALL
            .iter()
            .filter_map(|kind| self.slot(*kind).get())
            .map(|lane| lane.stats())
            .collect()
    }
}

impl Drop for StageScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Records runs and rejections by label.
    #[derive(Default)]
    struct Journal {
        ran: PlMutex<Vec<u32>>,
        rejected: PlMutex<Vec<(u32, ErrorCause)>>,
    }

    struct Recording {
        label: u32,
        journal: Arc<Journal>,
        gate: Option<oneshot::Receiver<()>>,
    }

    impl LaneTask for Recording {
        fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                if let Some(gate) = self.gate {
                    let _ = gate.await;
                }
                self.journal.ran.lock().push(self.label);
            })
        }

        fn reject(self: Box<Self>, cause: ErrorCause) {
            self.journal.rejected.lock().push((self.label, cause));
        }
    }

    fn task(label: u32, journal: &Arc<Journal>) -> Box<dyn LaneTask> {
        Box::new(Recording {
            label,
            journal: Arc::clone(journal),
            gate: None,
        })
    }

    #[tokio::test]
    async fn test_dispatch_lane_runs_in_fifo_order() {
        let scheduler = StageScheduler::new(SchedulerConfig::default(), Handle::current());
        let journal = Arc::new(Journal::default());

        for label in 0..20 {
            scheduler.submit(LaneKind::Dispatch, task(label, &journal));
        }
        scheduler.shutdown();
        scheduler.join().await;

        assert_eq!(*journal.ran.lock(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_full_lane_rejects_oldest_with_queue_overflow() {
        let config = SchedulerConfig {
            network: LaneConfig::bounded(1, 2),
            ..SchedulerConfig::default()
        };
        let scheduler = StageScheduler::new(config, Handle::current());
        let journal = Arc::new(Journal::default());

        // Occupy the only worker.
        let (release, gate) = oneshot::channel();
        scheduler.submit(
            LaneKind::Network,
            Box::new(Recording {
                label: 0,
                journal: Arc::clone(&journal),
                gate: Some(gate),
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        for label in 1..=3 {
            scheduler.submit(LaneKind::Network, task(label, &journal));
        }

        let _ = release.send(());
        scheduler.shutdown();
        scheduler.join().await;

        assert_eq!(
            *journal.rejected.lock(),
            vec![(
                1,
                ErrorCause::QueueOverflow {
                    lane: LaneKind::Network
                }
            )]
        );
        assert_eq!(*journal.ran.lock(), vec![0, 2, 3]);

        let stats = scheduler.stats();
        let network = stats
            .iter()
            .find(|s| s.kind == LaneKind::Network)
            .unwrap();
        assert_eq!(network.discarded, 1);
        assert_eq!(network.executed, 3);
        assert_eq!(network.peak_queued, 2);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_rejects() {
        let scheduler = StageScheduler::new(SchedulerConfig::default(), Handle::current());
        let journal = Arc::new(Journal::default());

        scheduler.shutdown();
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());

        scheduler.submit(LaneKind::Local, task(7, &journal));
        scheduler.join().await;

        assert!(journal.ran.lock().is_empty());
        assert_eq!(
            *journal.rejected.lock(),
            vec![(7, ErrorCause::PipelineShutdown)]
        );
    }

    #[tokio::test]
    async fn test_lanes_are_created_lazily() {
        let scheduler = StageScheduler::new(SchedulerConfig::default(), Handle::current());
        assert!(scheduler.stats().is_empty());

        let journal = Arc::new(Journal::default());
        scheduler.submit(LaneKind::Local, task(1, &journal));
        let kinds: Vec<_> = scheduler.stats().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![LaneKind::Local]);

        scheduler.shutdown();
        scheduler.join().await;
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        struct Boom;
        impl LaneTask for Boom {
            fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
                Box::pin(async { panic!("stage bug") })
            }
            fn reject(self: Box<Self>, _cause: ErrorCause) {}
        }

        let config = SchedulerConfig {
            local: LaneConfig::bounded(1, 10),
            ..SchedulerConfig::default()
        };
        let scheduler = StageScheduler::new(config, Handle::current());
        let journal = Arc::new(Journal::default());

        scheduler.submit(LaneKind::Local, Box::new(Boom));
        scheduler.submit(LaneKind::Local, task(1, &journal));

        scheduler.shutdown();
        scheduler.join().await;
        assert_eq!(*journal.ran.lock(), vec![1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_submits_racing_shutdown_are_run_or_rejected() {
        const SUBMITTERS: u32 = 8;
        const PER_SUBMITTER: u32 = 50;

        for _round in 0..20 {
            let scheduler = Arc::new(StageScheduler::new(
                SchedulerConfig::default(),
                Handle::current(),
            ));
            let journal = Arc::new(Journal::default());
            let barrier = Arc::new(std::sync::Barrier::new(SUBMITTERS as usize + 1));

            let submitters: Vec<_> = (0..SUBMITTERS)
                .map(|s| {
                    let scheduler = Arc::clone(&scheduler);
                    let journal = Arc::clone(&journal);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        for i in 0..PER_SUBMITTER {
                            let kind = LaneKind::ALL[(i % 3) as usize];
                            scheduler.submit(kind, task(s * PER_SUBMITTER + i, &journal));
                        }
                    })
                })
                .collect();

            barrier.wait();
            scheduler.shutdown();
            for submitter in submitters {
                submitter.join().unwrap();
            }
            scheduler.join().await;

            let ran = journal.ran.lock().len();
            let rejected = journal.rejected.lock().len();
            assert_eq!(ran + rejected, (SUBMITTERS * PER_SUBMITTER) as usize);
            assert!(journal
                .rejected
                .lock()
                .iter()
                .all(|(_, cause)| *cause == ErrorCause::PipelineShutdown));
        }
    }
}
