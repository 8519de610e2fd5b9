//! The cross-thread half of a request.
//!
//! A [`Request`](super::Request) is owned by exactly one stage handler at a
//! time, but a few things about it must be visible from anywhere: its state
//! (read by the caller's handle), its terminal guard (the caller may cancel
//! from another thread), and its consumer. Those live here, behind an `Arc`.
//!
//! The state cell is a `watch` channel mutated only through
//! `send_if_modified`, which runs the check and the write under the
//! channel's lock. That makes "already finished?" and the terminal transition
//! a single atomic step, so only one terminal outcome can ever win.
//!
//! A sync request's terminal callback is not delivered by `finish`, which
//! may run on whatever thread cancelled it. The executing task delivers it
//! through [`SyncTerminal`] once it is done with the request.

use super::key::RequestKey;
use super::state::{Outcome, State, Status};
use crate::delivery::{Notification, RequestListener, ResultDelivery};
use crate::error::ErrorCause;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Unique identifier of a request within one pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the numeric id.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Revocable link to whoever is waiting for the request.
///
/// The listener is held weakly: if the caller drops it, the handle reports
/// itself broken and the pipeline cancels the request the next time a stage
/// looks. [`detach`](Self::detach) breaks the link explicitly, for callers
/// that tear down while keeping the listener alive.
pub struct ConsumerHandle {
    listener: Option<Weak<dyn RequestListener>>,
    detached: AtomicBool,
}

impl ConsumerHandle {
    pub(crate) fn new(listener: Option<Weak<dyn RequestListener>>) -> Self {
        Self {
            listener,
            detached: AtomicBool::new(false),
        }
    }

    /// Returns true once the consumer has detached or its listener is gone.
    ///
    /// Requests issued without a listener are never broken.
    pub fn is_broken(&self) -> bool {
        if self.detached.load(Ordering::Acquire) {
            return true;
        }
        match &self.listener {
            Some(weak) => weak.strong_count() == 0,
            None => false,
        }
    }

    /// Marks the consumer as gone.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    /// Upgrades the listener for a callback, unless the consumer is broken.
    pub(crate) fn listener(&self) -> Option<Arc<dyn RequestListener>> {
        if self.detached.load(Ordering::Acquire) {
            return None;
        }
        self.listener.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("has_listener", &self.listener.is_some())
            .field("broken", &self.is_broken())
            .finish()
    }
}

pub(crate) struct RequestShared {
    id: RequestId,
    key: RequestKey,
    sync: bool,
    status: watch::Sender<Status>,
    consumer: ConsumerHandle,
    delivery: ResultDelivery,
    started_sent: AtomicBool,
    terminal_delivered: AtomicBool,
    dispatch_lock: ReentrantMutex<()>,
}

impl RequestShared {
    pub(crate) fn new(
        id: RequestId,
        key: RequestKey,
        sync: bool,
        consumer: ConsumerHandle,
        delivery: ResultDelivery,
    ) -> Arc<Self> {
        let (status, _rx) = watch::channel(Status::default());
        Arc::new(Self {
            id,
            key,
            sync,
            status,
            consumer,
            delivery,
            started_sent: AtomicBool::new(false),
            terminal_delivered: AtomicBool::new(false),
            dispatch_lock: ReentrantMutex::new(()),
        })
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    pub(crate) fn key(&self) -> &RequestKey {
        &self.key
    }

    pub(crate) fn is_sync(&self) -> bool {
        self.sync
    }

    pub(crate) fn consumer(&self) -> &ConsumerHandle {
        &self.consumer
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub(crate) fn state(&self) -> State {
        self.status.borrow().state
    }

    pub(crate) fn outcome(&self) -> Option<Outcome> {
        self.status.borrow().outcome.clone()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Finished, or the consumer went away.
    pub(crate) fn is_canceled(&self) -> bool {
        self.is_finished() || self.consumer.is_broken()
    }

    /// Moves to a later non-terminal state. No-op once finished or if `next`
    /// would move backwards.
    pub(crate) fn advance(&self, next: State) {
        debug_assert!(!next.is_terminal(), "terminal states go through finish()");
        let moved = self.status.send_if_modified(|status| {
            if status.state.is_terminal() || next <= status.state {
                return false;
            }
            status.state = next;
            true
        });
        if moved {
            trace!(request_id = %self.id, state = %next, "State changed");
        }
    }

    /// Applies the terminal outcome if the request is not finished yet.
    ///
    /// Returns true for the single caller that wins; that caller's outcome is
    /// the one delivered.
    pub(crate) fn finish(self: &Arc<Self>, outcome: Outcome) -> bool {
        let won = self.status.send_if_modified(|status| {
            if status.state.is_terminal() {
                return false;
            }
            status.state = outcome.state();
            status.outcome = Some(outcome.clone());
            true
        });

        if won {
            debug!(
                request_id = %self.id,
                key = %self.key,
                state = %outcome.state(),
                "Request finished"
            );
            if self.sync {
                trace!(request_id = %self.id, "Terminal callback deferred to the executing task");
            } else {
                self.delivery
                    .notify(self, Notification::Terminal(outcome));
            }
        }
        won
    }

    /// Delivers a sync request's terminal callback, once it has an outcome.
    fn deliver_sync_terminal(self: &Arc<Self>) {
        if let Some(outcome) = self.outcome() {
            self.delivery
                .notify(self, Notification::Terminal(outcome));
        }
    }

    pub(crate) fn notify_started(self: &Arc<Self>) {
        if self.is_finished() || self.started_sent.swap(true, Ordering::AcqRel) {
            return;
        }
        self.delivery.notify(self, Notification::Started);
    }

    pub(crate) fn notify_progress(self: &Arc<Self>, completed: u64, total: Option<u64>) {
        if self.is_finished() {
            return;
        }
        self.delivery
            .notify(self, Notification::Progress { completed, total });
    }

    /// Called by the delivery side right before the terminal callback runs.
    pub(crate) fn mark_terminal_delivered(&self) {
        self.terminal_delivered.store(true, Ordering::Release);
    }

    pub(crate) fn terminal_delivered(&self) -> bool {
        self.terminal_delivered.load(Ordering::Acquire)
    }

    /// Serializes callbacks of this request. Reentrant, so a listener may
    /// act on the request from inside a callback.
    pub(crate) fn dispatch_lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.dispatch_lock.lock()
    }
}

/// Delivers a sync request's terminal callback on the executing task.
///
/// Dropped when `execute` returns or its future is dropped. A request that
/// is still unfinished at that point is failed as lost first.
pub(crate) struct SyncTerminal(Arc<RequestShared>);

impl SyncTerminal {
    pub(crate) fn new(shared: Arc<RequestShared>) -> Self {
        debug_assert!(shared.is_sync());
        Self(shared)
    }
}

impl Drop for SyncTerminal {
    fn drop(&mut self) {
        if !self.0.is_finished() {
            self.0.finish(Outcome::Failed(ErrorCause::ResultLost(
                "execution abandoned".to_string(),
            )));
        }
        self.0.deliver_sync_terminal();
    }
}
