//! Caller-side handle to a submitted request.

use super::key::RequestKey;
use super::shared::{RequestId, RequestShared};
use super::state::{Outcome, State, Status};
use crate::error::{CancelCause, ErrorCause};
use std::sync::Arc;
use tokio::sync::watch;

/// Handle returned by [`Pipeline::submit`](crate::pipeline::Pipeline::submit).
///
/// The handle can observe the request's state, cancel it, detach from it or
/// wait for its outcome. Dropping the handle does not cancel the request; a
/// registered listener is still notified.
#[derive(Clone)]
pub struct RequestHandle {
    shared: Arc<RequestShared>,
    status_rx: watch::Receiver<Status>,
}

impl RequestHandle {
    pub(crate) fn new(shared: Arc<RequestShared>) -> Self {
        let status_rx = shared.subscribe();
        Self { shared, status_rx }
    }

    pub(crate) fn shared(&self) -> &Arc<RequestShared> {
        &self.shared
    }

    pub fn id(&self) -> RequestId {
        self.shared.id()
    }

    pub fn key(&self) -> &RequestKey {
        self.shared.key()
    }

    /// Current state of the request.
    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// Terminal outcome, once the request has finished.
    pub fn outcome(&self) -> Option<Outcome> {
        self.shared.outcome()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// Cancels the request.
    ///
    /// Returns true if this call produced the terminal outcome. Calling it on
    /// a finished request does nothing and emits no further callbacks.
    pub fn cancel(&self) -> bool {
        self.shared.finish(Outcome::Canceled(CancelCause::Caller))
    }

    /// Breaks the link to the consumer.
    ///
    /// The request is canceled with [`CancelCause::ConsumerBroken`] the next
    /// time a stage looks at it; no callbacks reach the listener after this.
    pub fn detach(&self) {
        self.shared.consumer().detach();
    }

    /// Waits until the request reaches a terminal state.
    pub async fn wait(&mut self) -> Outcome {
        loop {
            if let Some(outcome) = self.status_rx.borrow_and_update().outcome.clone() {
                return outcome;
            }
            if self.status_rx.changed().await.is_err() {
                return self.shared.outcome().unwrap_or_else(|| {
                    Outcome::Failed(ErrorCause::ResultLost(
                        "status channel closed".to_string(),
                    ))
                });
            }
        }
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id())
            .field("key", self.key())
            .field("state", &self.state())
            .finish()
    }
}
