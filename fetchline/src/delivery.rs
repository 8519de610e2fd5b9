//! Result delivery to consumers.
//!
//! Every consumer-visible callback runs on a single callback task, which
//! drains one FIFO channel. Since one consumer runs every callback in
//! arrival order, a request's notifications keep the order in which the
//! pipeline produced them:
//!
//! ```text
//! started? → progress* → completed | failed | canceled
//! ```
//!
//! Synchronous requests (issued through `Pipeline::execute`) bypass the
//! channel and get their callbacks inline on the calling task.

use crate::error::{CancelCause, ErrorCause};
use crate::request::{Delivered, Outcome, RequestId, RequestShared};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Receives request callbacks.
///
/// Only the terminal callbacks are required. At most one terminal callback
/// is ever made per request, and nothing follows it.
pub trait RequestListener: Send + Sync {
    /// The request left the dispatch stage towards a download or load.
    fn on_started(&self, _id: RequestId) {}

    /// Transfer progress. `total` is `None` when the size is unknown.
    fn on_progress(&self, _id: RequestId, _completed: u64, _total: Option<u64>) {}

    fn on_completed(&self, id: RequestId, delivered: &Delivered);

    fn on_failed(&self, id: RequestId, cause: &ErrorCause);

    fn on_canceled(&self, _id: RequestId, _cause: CancelCause) {}
}

#[derive(Debug, Clone)]
pub(crate) enum Notification {
    Started,
    Progress { completed: u64, total: Option<u64> },
    Terminal(Outcome),
}

struct Envelope {
    shared: Arc<RequestShared>,
    notification: Notification,
}

enum Message {
    Deliver(Envelope),
    Flush(oneshot::Sender<()>),
}

/// Terminal outcomes delivered so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub completed: u64,
    pub failed: u64,
    pub canceled: u64,
}

#[derive(Debug, Default)]
struct DeliveryCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    canceled: AtomicU64,
}

impl DeliveryCounters {
    fn record(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Completed(_) => &self.completed,
            Outcome::Failed(_) => &self.failed,
            Outcome::Canceled(_) => &self.canceled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Routes notifications to the callback task or inline.
#[derive(Clone)]
pub(crate) struct ResultDelivery {
    tx: Option<mpsc::UnboundedSender<Message>>,
    counters: Arc<DeliveryCounters>,
}

impl ResultDelivery {
    /// Starts the callback task on `runtime`.
    pub(crate) fn spawn(runtime: &Handle) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let counters = Arc::new(DeliveryCounters::default());

        let task_counters = Arc::clone(&counters);
        let task = runtime.spawn(async move {
            debug!("Callback task started");
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Deliver(envelope) => {
                        dispatch(&envelope.shared, envelope.notification, &task_counters)
                    }
                    Message::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Callback task stopped");
        });

        (
            Self {
                tx: Some(tx),
                counters,
            },
            task,
        )
    }

    /// Delivery with no callback task; everything runs inline.
    #[cfg(test)]
    pub(crate) fn inline_only() -> Self {
        Self {
            tx: None,
            counters: Arc::new(DeliveryCounters::default()),
        }
    }

    pub(crate) fn notify(&self, shared: &Arc<RequestShared>, notification: Notification) {
        let tx = match &self.tx {
            Some(tx) if !shared.is_sync() => tx,
            _ => {
                dispatch(shared, notification, &self.counters);
                return;
            }
        };

        let envelope = Envelope {
            shared: Arc::clone(shared),
            notification,
        };
        if let Err(mpsc::error::SendError(Message::Deliver(envelope))) =
            tx.send(Message::Deliver(envelope))
        {
            debug!(
                request_id = %shared.id(),
                "Callback task gone, delivering inline"
            );
            dispatch(&envelope.shared, envelope.notification, &self.counters);
        }
    }

    /// Waits until every notification queued so far has been delivered.
    pub(crate) async fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(Message::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub(crate) fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            canceled: self.counters.canceled.load(Ordering::Relaxed),
        }
    }
}

fn dispatch(shared: &RequestShared, notification: Notification, counters: &DeliveryCounters) {
    let id = shared.id();
    let _serial = shared.dispatch_lock();

    if shared.terminal_delivered() {
        trace!(request_id = %id, ?notification, "Dropping notification after terminal");
        return;
    }
    if let Notification::Terminal(outcome) = &notification {
        shared.mark_terminal_delivered();
        counters.record(outcome);
    }

    let Some(listener) = shared.consumer().listener() else {
        return;
    };

    let result = catch_unwind(AssertUnwindSafe(|| match &notification {
        Notification::Started => listener.on_started(id),
        Notification::Progress { completed, total } => {
            listener.on_progress(id, *completed, *total)
        }
        Notification::Terminal(Outcome::Completed(delivered)) => {
            listener.on_completed(id, delivered)
        }
        Notification::Terminal(Outcome::Failed(cause)) => listener.on_failed(id, cause),
        Notification::Terminal(Outcome::Canceled(cause)) => listener.on_canceled(id, *cause),
    }));

    if result.is_err() {
        warn!(request_id = %id, ?notification, "Listener panicked during callback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::test_support::request_with_listener;
    use crate::request::{LoadFrom, RequestOptions, SyncTerminal};
    use crate::traits::Artifact;
    use parking_lot::Mutex;
    use std::sync::Weak;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl RequestListener for Recorder {
        fn on_started(&self, _id: RequestId) {
            self.events.lock().push("started".into());
        }

        fn on_progress(&self, _id: RequestId, completed: u64, _total: Option<u64>) {
            self.events.lock().push(format!("progress:{}", completed));
        }

        fn on_completed(&self, _id: RequestId, delivered: &Delivered) {
            self.events.lock().push(format!("completed:{}", delivered.from));
        }

        fn on_failed(&self, _id: RequestId, _cause: &ErrorCause) {
            self.events.lock().push("failed".into());
        }

        fn on_canceled(&self, _id: RequestId, cause: CancelCause) {
            self.events.lock().push(format!("canceled:{}", cause));
        }
    }

    fn weak(recorder: &Arc<Recorder>) -> Option<Weak<dyn RequestListener>> {
        let weak: Weak<Recorder> = Arc::downgrade(recorder);
        Some(weak)
    }

    #[test]
    fn test_inline_order_and_single_started() {
        let recorder = Arc::new(Recorder::default());
        let req = request_with_listener(
            "https://example.com/a",
            RequestOptions::default(),
            weak(&recorder),
        );

        req.notify_started();
        req.notify_started();
        req.progress_sink().report(10, Some(20));
        req.complete(Artifact::new(vec![1u8]), LoadFrom::Network);
        req.progress_sink().report(20, Some(20));

        assert_eq!(
            *recorder.events.lock(),
            vec!["started", "progress:10", "completed:network"]
        );
    }

    #[test]
    fn test_canceled_callback_carries_cause() {
        let recorder = Arc::new(Recorder::default());
        let req = request_with_listener(
            "https://example.com/a",
            RequestOptions::default(),
            weak(&recorder),
        );

        req.cancel(CancelCause::LevelIsMemory);
        req.cancel(CancelCause::Caller);

        assert_eq!(
            *recorder.events.lock(),
            vec!["canceled:request level is memory"]
        );
    }

    #[tokio::test]
    async fn test_callback_task_preserves_order() {
        let (delivery, task) = ResultDelivery::spawn(&Handle::current());
        let recorder = Arc::new(Recorder::default());

        let shared = RequestShared::new(
            RequestId::new(42),
            crate::request::RequestKey::new("https://example.com/a", &RequestOptions::default()),
            false,
            crate::request::ConsumerHandle::new(weak(&recorder)),
            delivery.clone(),
        );

        shared.notify_started();
        for i in 1..=5 {
            shared.notify_progress(i, None);
        }
        shared.finish(Outcome::Failed(ErrorCause::PipelineShutdown));
        shared.notify_progress(6, None);

        drop(shared);
        drop(delivery);
        task.await.unwrap();

        let events = recorder.events.lock().clone();
        assert_eq!(events.first().map(String::as_str), Some("started"));
        assert_eq!(events.last().map(String::as_str), Some("failed"));
        assert_eq!(events.len(), 7);
    }

    #[test]
    fn test_panicking_listener_does_not_escape() {
        struct Panics;
        impl RequestListener for Panics {
            fn on_completed(&self, _id: RequestId, _delivered: &Delivered) {
                panic!("listener bug");
            }
            fn on_failed(&self, _id: RequestId, _cause: &ErrorCause) {}
        }

        let listener = Arc::new(Panics);
        let weak: Weak<Panics> = Arc::downgrade(&listener);
        let req = request_with_listener(
            "https://example.com/a",
            RequestOptions::default(),
            Some(weak),
        );

        assert!(req.complete(Artifact::new(vec![1u8]), LoadFrom::Network));
    }

    fn sync_shared(recorder: &Arc<Recorder>) -> Arc<RequestShared> {
        RequestShared::new(
            RequestId::new(7),
            crate::request::RequestKey::new("https://example.com/a", &RequestOptions::default()),
            true,
            crate::request::ConsumerHandle::new(weak(recorder)),
            ResultDelivery::inline_only(),
        )
    }

    #[test]
    fn test_sync_cancel_from_other_thread_is_delivered_by_executor() {
        struct ThreadRecorder {
            inner: Recorder,
            threads: Mutex<Vec<std::thread::ThreadId>>,
        }
        impl RequestListener for ThreadRecorder {
            fn on_progress(&self, id: RequestId, completed: u64, total: Option<u64>) {
                self.threads.lock().push(std::thread::current().id());
                self.inner.on_progress(id, completed, total);
            }
            fn on_completed(&self, id: RequestId, delivered: &Delivered) {
                self.threads.lock().push(std::thread::current().id());
                self.inner.on_completed(id, delivered);
            }
            fn on_failed(&self, id: RequestId, cause: &ErrorCause) {
                self.threads.lock().push(std::thread::current().id());
                self.inner.on_failed(id, cause);
            }
            fn on_canceled(&self, id: RequestId, cause: CancelCause) {
                self.threads.lock().push(std::thread::current().id());
                self.inner.on_canceled(id, cause);
            }
        }

        let listener = Arc::new(ThreadRecorder {
            inner: Recorder::default(),
            threads: Mutex::new(Vec::new()),
        });
        let weak_listener: Weak<ThreadRecorder> = Arc::downgrade(&listener);
        let shared = RequestShared::new(
            RequestId::new(8),
            crate::request::RequestKey::new("https://example.com/a", &RequestOptions::default()),
            true,
            crate::request::ConsumerHandle::new(Some(weak_listener)),
            ResultDelivery::inline_only(),
        );
        let terminal = SyncTerminal::new(Arc::clone(&shared));

        shared.notify_progress(1, None);

        let canceler = Arc::clone(&shared);
        std::thread::spawn(move || {
            assert!(canceler.finish(Outcome::Canceled(CancelCause::Caller)));
        })
        .join()
        .unwrap();

        // Nothing ran on the canceling thread, and late progress is dropped.
        assert_eq!(*listener.inner.events.lock(), vec!["progress:1"]);
        shared.notify_progress(2, None);

        drop(terminal);
        shared.notify_progress(3, None);

        assert_eq!(
            *listener.inner.events.lock(),
            vec!["progress:1", "canceled:canceled by caller"]
        );
        let here = std::thread::current().id();
        assert!(listener.threads.lock().iter().all(|id| *id == here));
    }

    #[test]
    fn test_abandoned_sync_request_is_reported_lost() {
        let recorder = Arc::new(Recorder::default());
        let shared = sync_shared(&recorder);

        drop(SyncTerminal::new(Arc::clone(&shared)));

        assert!(matches!(
            shared.outcome(),
            Some(Outcome::Failed(ErrorCause::ResultLost(_)))
        ));
        assert_eq!(*recorder.events.lock(), vec!["failed"]);
    }

    #[test]
    fn test_sync_terminal_delivers_once() {
        let recorder = Arc::new(Recorder::default());
        let shared = sync_shared(&recorder);

        shared.finish(Outcome::Failed(ErrorCause::PipelineShutdown));
        assert!(recorder.events.lock().is_empty());

        drop(SyncTerminal::new(Arc::clone(&shared)));
        drop(SyncTerminal::new(Arc::clone(&shared)));
        assert_eq!(*recorder.events.lock(), vec!["failed"]);
    }
}
