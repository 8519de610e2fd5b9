//! A single execution lane: a queue plus a fixed set of worker tasks.

use super::{LaneConfig, LaneKind, LaneStats, LaneTask};
use crate::error::ErrorCause;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Default)]
struct LaneCounters {
    submitted: AtomicU64,
    executed: AtomicU64,
    discarded: AtomicU64,
    rejected: AtomicU64,
    peak_queued: AtomicUsize,
}

enum Next {
    Run(Box<dyn LaneTask>),
    Wait,
    Exit,
}

pub(crate) struct Lane {
    kind: LaneKind,
    config: LaneConfig,
    queue: Mutex<VecDeque<Box<dyn LaneTask>>>,
    notify: Notify,
    cancel: CancellationToken,
    counters: LaneCounters,
}

impl Lane {
    pub(crate) fn new(kind: LaneKind, config: LaneConfig, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            kind,
            config,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            cancel,
            counters: LaneCounters::default(),
        })
    }

    /// Spawns the lane's workers, unless the lane is already closed.
    pub(crate) fn start(self: &Arc<Self>, runtime: &Handle) -> Vec<JoinHandle<()>> {
        if self.cancel.is_cancelled() {
            return Vec::new();
        }

        let workers = self.config.workers.max(1);
        debug!(
            lane = %self.kind,
            workers,
            queue_capacity = ?self.config.queue_capacity,
            "Starting lane"
        );

        (0..workers)
            .map(|index| runtime.spawn(Arc::clone(self).worker(index)))
            .collect()
    }

    /// Queues a task.
    ///
    /// On a full bounded lane the oldest queued task is evicted and rejected
    /// with `QueueOverflow`. On a closed lane the new task is rejected with
    /// `PipelineShutdown`.
    ///
    /// The closed check and the enqueue share the queue lock with the
    /// workers' exit decision, so a task is either run or rejected.
    pub(crate) fn push(&self, task: Box<dyn LaneTask>) {
        let evicted = {
            let mut queue = self.queue.lock();
            if self.cancel.is_cancelled() {
                drop(queue);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                trace!(lane = %self.kind, "Lane closed, rejecting task");
                task.reject(ErrorCause::PipelineShutdown);
                return;
            }

            self.counters.submitted.fetch_add(1, Ordering::Relaxed);
            let evicted = match self.config.queue_capacity {
                Some(capacity) if queue.len() >= capacity.max(1) => queue.pop_front(),
                _ => None,
            };
            queue.push_back(task);
            self.counters
                .peak_queued
                .fetch_max(queue.len(), Ordering::Relaxed);
            evicted
        };

        self.notify.notify_one();

        if let Some(evicted) = evicted {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            warn!(lane = %self.kind, "Lane queue full, discarding oldest task");
            evicted.reject(ErrorCause::QueueOverflow { lane: self.kind });
        }
    }

    /// Takes the next task, or decides under the queue lock that a closed
    /// lane has drained.
    fn next(&self) -> Next {
        let mut queue = self.queue.lock();
        match queue.pop_front() {
            Some(task) => Next::Run(task),
            None if self.cancel.is_cancelled() => Next::Exit,
            None => Next::Wait,
        }
    }

    async fn worker(self: Arc<Self>, index: usize) {
        trace!(lane = %self.kind, worker = index, "Lane worker started");

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.next() {
                Next::Run(task) => {
                    self.run(task).await;
                    continue;
                }
                Next::Exit => break,
                Next::Wait => {}
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.cancel.cancelled() => {}
            }
        }

        trace!(lane = %self.kind, worker = index, "Lane worker stopped");
    }

    async fn run(&self, task: Box<dyn LaneTask>) {
        let result = AssertUnwindSafe(async move { task.run().await })
            .catch_unwind()
            .await;
        self.counters.executed.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            error!(lane = %self.kind, "Lane task panicked");
        }
    }

    pub(crate) fn stats(&self) -> LaneStats {
        LaneStats {
            kind: self.kind,
            workers: self.config.workers.max(1),
            queued: self.queue.lock().len(),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            executed: self.counters.executed.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            peak_queued: self.counters.peak_queued.load(Ordering::Relaxed),
        }
    }
}
