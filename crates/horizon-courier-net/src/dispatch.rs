//! Listener dispatch and the cancellation protocol.
//!
//! All coordination between caller threads and the worker goes through one
//! lock held by [`Dispatcher`]. The lock protects a cancellation *epoch*:
//!
//! - every operation is stamped with the epoch current when it is enqueued;
//! - every listener post (progress or completion) re-checks, under the lock,
//!   that the operation's epoch is still current before handing the
//!   invocation to its context;
//! - [`Dispatcher::cancel_all`] advances the epoch under the same lock.
//!
//! So once `cancel_all` returns, no listener of an operation enqueued before
//! the call can be posted again, whether the operation was still queued,
//! already taken by the worker, or in the middle of completing. Invocations
//! posted before the call are stripped from their contexts by tag.

use std::sync::{Arc, Weak};

use horizon_courier_core::logging::targets;
use horizon_courier_core::{
    CancellationToken, DispatchTag, ExecutionContext, OperationQueue, QueuedInvocation,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::client::ClientStatus;
use crate::operation::{Operation, OperationId, Queued, Request};

/// What a call to [`RestClient::cancel_all`](crate::RestClient::cancel_all) removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CancelSummary {
    /// Queued operations that will never start.
    pub dropped_operations: usize,
    /// Posted listener invocations removed from their contexts.
    pub removed_invocations: usize,
    /// The operation that was running and has been interrupted, if any.
    pub interrupted: Option<OperationId>,
}

struct RunningOperation {
    id: OperationId,
    interrupt: CancellationToken,
}

struct DispatchState {
    epoch: u64,
    contexts: Vec<Weak<dyn ExecutionContext>>,
    running: Option<RunningOperation>,
    quit_requested: bool,
    status: ClientStatus,
}

impl DispatchState {
    fn remember_context(&mut self, context: &Arc<dyn ExecutionContext>) {
        self.contexts.retain(|known| known.strong_count() > 0);
        let known = self
            .contexts
            .iter()
            .any(|weak| std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(context)));
        if !known {
            self.contexts.push(Arc::downgrade(context));
        }
    }
}

/// Shared between the client facade and the worker thread.
pub(crate) struct Dispatcher {
    tag: DispatchTag,
    state: Mutex<DispatchState>,
    queue: OperationQueue<Queued>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            tag: DispatchTag::unique(),
            state: Mutex::new(DispatchState {
                epoch: 0,
                contexts: Vec::new(),
                running: None,
                quit_requested: false,
                status: ClientStatus::Ok,
            }),
            queue: OperationQueue::new(),
        }
    }

    pub(crate) fn tag(&self) -> DispatchTag {
        self.tag
    }

    /// Stamp and enqueue a request. Returns `None` once quit has been requested.
    pub(crate) fn submit(
        &self,
        context: Arc<dyn ExecutionContext>,
        request: Request,
    ) -> Option<OperationId> {
        let mut state = self.state.lock();
        let kind = request.kind();
        if state.quit_requested {
            warn!(target: targets::DISPATCH, %kind, "operation refused after quit");
            return None;
        }

        state.remember_context(&context);
        let id = OperationId::next();
        let operation = Operation {
            id,
            epoch: state.epoch,
            context,
            request,
        };
        match self.queue.enqueue(Queued::Operation(operation)) {
            Ok(()) => {
                debug!(target: targets::DISPATCH, %id, %kind, "operation enqueued");
                Some(id)
            }
            Err(err) => {
                warn!(target: targets::DISPATCH, %kind, error = %err, "operation refused");
                None
            }
        }
    }

    /// Enqueue the quit marker. Returns `false` if quit was already requested.
    pub(crate) fn request_quit(&self) -> bool {
        let mut state = self.state.lock();
        if state.quit_requested {
            return false;
        }
        state.quit_requested = true;
        // A closed queue means the worker is already gone.
        let _ = self.queue.enqueue(Queued::Quit);
        info!(target: targets::DISPATCH, "quit requested");
        true
    }

    /// Block until the next queue entry, or `None` when interrupted or closed.
    pub(crate) fn take_next(&self) -> Option<Queued> {
        self.queue.take_or_block()
    }

    pub(crate) fn queue_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub(crate) fn close_queue(&self) {
        self.queue.close();
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Mark `operation` as running and hand out its interrupt token.
    ///
    /// Returns `None` if the operation was cancelled between being taken
    /// from the queue and this call; it must then be discarded unrun.
    pub(crate) fn begin(&self, operation: &Operation) -> Option<CancellationToken> {
        let mut state = self.state.lock();
        if operation.epoch != state.epoch {
            return None;
        }
        let interrupt = CancellationToken::new();
        state.running = Some(RunningOperation {
            id: operation.id,
            interrupt: interrupt.clone(),
        });
        Some(interrupt)
    }

    /// Post a listener invocation unless the operation has been cancelled.
    pub(crate) fn post(
        &self,
        epoch: u64,
        context: &Arc<dyn ExecutionContext>,
        invocation: QueuedInvocation,
    ) -> bool {
        let state = self.state.lock();
        if epoch != state.epoch {
            drop(state);
            drop(invocation);
            return false;
        }
        context.post(self.tag, invocation);
        true
    }

    /// Post the completion invocation and record the outcome.
    ///
    /// A cancelled operation neither posts nor touches the status flag.
    pub(crate) fn complete(
        &self,
        epoch: u64,
        context: &Arc<dyn ExecutionContext>,
        succeeded: bool,
        invocation: QueuedInvocation,
    ) -> bool {
        let mut state = self.state.lock();
        if epoch != state.epoch {
            drop(state);
            drop(invocation);
            return false;
        }
        state.status = if succeeded {
            ClientStatus::Ok
        } else {
            ClientStatus::Error
        };
        context.post(self.tag, invocation);
        true
    }

    /// Clear the running marker.
    pub(crate) fn finish(&self) {
        self.state.lock().running = None;
    }

    /// Drop every queued operation and detach every pending listener.
    pub(crate) fn cancel_all(&self) -> CancelSummary {
        let mut state = self.state.lock();

        // Dropped after the lock is released: listeners and contexts may run
        // arbitrary drop code.
        let dropped = self.queue.drain();
        let mut dropped_operations = dropped.len();
        if state.quit_requested {
            // The quit marker survives so shutdown still completes.
            if self.queue.enqueue(Queued::Quit).is_ok() {
                dropped_operations = dropped_operations.saturating_sub(1);
            }
        }

        state.epoch += 1;

        let removed_invocations = state
            .contexts
            .iter()
            .filter_map(Weak::upgrade)
            .map(|context| context.remove_tagged(self.tag))
            .sum::<usize>();
        state.contexts.retain(|known| known.strong_count() > 0);

        let interrupted = state.running.as_ref().map(|running| {
            running.interrupt.cancel();
            running.id
        });
        self.queue.interrupt();

        drop(state);
        drop(dropped);

        let summary = CancelSummary {
            dropped_operations,
            removed_invocations,
            interrupted,
        };
        info!(
            target: targets::DISPATCH,
            dropped = summary.dropped_operations,
            removed = summary.removed_invocations,
            interrupted = ?summary.interrupted,
            "all operations cancelled"
        );
        summary
    }

    pub(crate) fn status(&self) -> ClientStatus {
        self.state.lock().status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horizon_courier_core::InvocationQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn text_request(url: &str, hits: &Arc<AtomicUsize>) -> Request {
        let hits = hits.clone();
        Request::GetString {
            url: url.to_string(),
            on_complete: Box::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        }
    }

    fn take_operation(dispatcher: &Dispatcher) -> Operation {
        match dispatcher.take_next() {
            Some(Queued::Operation(op)) => op,
            _ => panic!("expected an operation"),
        }
    }

    #[test]
    fn test_post_after_cancel_is_dropped() {
        let dispatcher = Dispatcher::new();
        let context: Arc<dyn ExecutionContext> = Arc::new(InvocationQueue::new());
        let hits = Arc::new(AtomicUsize::new(0));

        dispatcher.submit(context.clone(), text_request("http://a/", &hits));
        let op = take_operation(&dispatcher);
        assert!(dispatcher.begin(&op).is_some());

        dispatcher.cancel_all();
        let hits_for_post = hits.clone();
        let posted = dispatcher.complete(
            op.epoch,
            &op.context,
            true,
            QueuedInvocation::new(move || {
                hits_for_post.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(!posted);
        assert_eq!(dispatcher.status(), ClientStatus::Ok);
    }

    #[test]
    fn test_cancel_strips_posted_invocations_and_interrupts() {
        let dispatcher = Dispatcher::new();
        let queue = Arc::new(InvocationQueue::new());
        let context: Arc<dyn ExecutionContext> = queue.clone();
        let hits = Arc::new(AtomicUsize::new(0));

        dispatcher.submit(context.clone(), text_request("http://a/", &hits));
        dispatcher.submit(context.clone(), text_request("http://b/", &hits));
        let op = take_operation(&dispatcher);
        let interrupt = dispatcher.begin(&op).unwrap();

        let hits_for_post = hits.clone();
        assert!(dispatcher.post(
            op.epoch,
            &op.context,
            QueuedInvocation::new(move || {
                hits_for_post.fetch_add(1, Ordering::SeqCst);
            }),
        ));
        // Unrelated work on the same context must survive.
        queue.post(DispatchTag::unique(), QueuedInvocation::new(|| {}));

        let summary = dispatcher.cancel_all();
        assert_eq!(summary.dropped_operations, 1);
        assert_eq!(summary.removed_invocations, 1);
        assert_eq!(summary.interrupted, Some(op.id));
        assert!(interrupt.is_cancelled());

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_operation_taken_before_cancel_is_skipped() {
        let dispatcher = Dispatcher::new();
        let context: Arc<dyn ExecutionContext> = Arc::new(InvocationQueue::new());
        let hits = Arc::new(AtomicUsize::new(0));

        dispatcher.submit(context, text_request("http://a/", &hits));
        let op = take_operation(&dispatcher);
        dispatcher.cancel_all();
        assert!(dispatcher.begin(&op).is_none());
    }

    #[test]
    fn test_quit_survives_cancel_and_blocks_new_work() {
        let dispatcher = Dispatcher::new();
        let context: Arc<dyn ExecutionContext> = Arc::new(InvocationQueue::new());
        let hits = Arc::new(AtomicUsize::new(0));

        dispatcher.submit(context.clone(), text_request("http://a/", &hits));
        assert!(dispatcher.request_quit());
        assert!(!dispatcher.request_quit());
        assert!(dispatcher.submit(context, text_request("http://b/", &hits)).is_none());

        let summary = dispatcher.cancel_all();
        assert_eq!(summary.dropped_operations, 1);

        // The interrupt left by cancel_all is consumed first.
        assert!(dispatcher.take_next().is_none());
        assert!(matches!(dispatcher.take_next(), Some(Queued::Quit)));
    }

    #[test]
    fn test_completion_updates_status() {
        let dispatcher = Dispatcher::new();
        let context: Arc<dyn ExecutionContext> = Arc::new(InvocationQueue::new());

        assert!(dispatcher.complete(0, &context, false, QueuedInvocation::new(|| {})));
        assert_eq!(dispatcher.status(), ClientStatus::Error);
        assert!(dispatcher.complete(0, &context, true, QueuedInvocation::new(|| {})));
        assert_eq!(dispatcher.status(), ClientStatus::Ok);
    }

    #[test]
    fn test_dropped_contexts_are_forgotten() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let context: Arc<dyn ExecutionContext> = Arc::new(InvocationQueue::new());
            dispatcher.submit(context, text_request("http://a/", &hits));
        }
        // The queued operation still owns its context.
        assert_eq!(dispatcher.state.lock().contexts.len(), 1);
        dispatcher.cancel_all();

        let other: Arc<dyn ExecutionContext> = Arc::new(InvocationQueue::new());
        dispatcher.submit(other.clone(), text_request("http://b/", &hits));
        let state = dispatcher.state.lock();
        assert_eq!(state.contexts.len(), 1);
        assert!(std::ptr::addr_eq(state.contexts[0].as_ptr(), Arc::as_ptr(&other)));
    }
}
