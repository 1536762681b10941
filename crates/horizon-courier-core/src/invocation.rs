//! Posted invocations and the execution contexts that run them.
//!
//! The worker never calls a listener directly. Instead it wraps the call in a
//! [`QueuedInvocation`] and posts it to the [`ExecutionContext`] the caller
//! chose when enqueuing the operation. The context runs posted invocations
//! later, in the order they were posted, on its own timeline.
//!
//! Every post carries a [`DispatchTag`] identifying the client that produced
//! it, so a bulk cancel can strip exactly that client's pending invocations
//! while leaving unrelated work on the same context alone.
//!
//! Two contexts are provided:
//!
//! - [`InvocationQueue`]: a passive FIFO that the owning thread pumps with
//!   [`run_pending`](InvocationQueue::run_pending) from its own event loop.
//! - [`ContextThread`]: a dedicated named thread that pumps an
//!   `InvocationQueue` until dropped, for applications without an event loop.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::error::{CoreError, Result};
use crate::logging::targets;

/// Global tag counter for unique IDs.
static NEXT_DISPATCH_TAG: AtomicU64 = AtomicU64::new(1);

/// Poll interval used by [`ContextThread`] to notice a stop request.
const CONTEXT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Identifies the producer of posted invocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DispatchTag(u64);

impl DispatchTag {
    /// Allocate a tag that no other producer in this process shares.
    pub fn unique() -> Self {
        Self(NEXT_DISPATCH_TAG.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw tag value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A type-erased listener call that can be executed later.
pub struct QueuedInvocation {
    invoke: Box<dyn FnOnce() + Send>,
}

impl QueuedInvocation {
    /// Create a new queued invocation.
    pub fn new<F>(invoke: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
        }
    }

    /// Execute the invocation.
    pub fn execute(self) {
        (self.invoke)();
    }
}

impl std::fmt::Debug for QueuedInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedInvocation").finish_non_exhaustive()
    }
}

/// A destination that accepts posted invocations and runs them in FIFO order.
///
/// Implementations must be safe to post to from any thread. The invocation
/// must not run inside `post` itself; it runs later on the context's own
/// timeline.
pub trait ExecutionContext: Send + Sync {
    /// Schedule `invocation` to run after everything already posted.
    fn post(&self, tag: DispatchTag, invocation: QueuedInvocation);

    /// Drop every not-yet-run invocation carrying `tag`.
    ///
    /// Returns the number of invocations removed.
    fn remove_tagged(&self, tag: DispatchTag) -> usize;
}

/// A FIFO of posted invocations pumped by its owner.
///
/// Invocations are executed with no internal lock held, so a listener may
/// post further work or call back into the client that produced it.
#[derive(Default)]
pub struct InvocationQueue {
    pending: Mutex<VecDeque<(DispatchTag, QueuedInvocation)>>,
    posted: Condvar,
}

impl InvocationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invocations waiting to run.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of waiting invocations carrying `tag`.
    pub fn pending_for(&self, tag: DispatchTag) -> usize {
        self.pending.lock().iter().filter(|(t, _)| *t == tag).count()
    }

    /// Run the oldest pending invocation, if any.
    ///
    /// Returns `true` if an invocation was executed.
    pub fn run_next(&self) -> bool {
        let next = self.pending.lock().pop_front();
        match next {
            Some((_, invocation)) => {
                invocation.execute();
                true
            }
            None => false,
        }
    }

    /// Run the invocations that were pending when the call started.
    ///
    /// Work posted by those invocations waits for the next pump. Returns the
    /// number of invocations executed.
    pub fn run_pending(&self) -> usize {
        let budget = self.pending_count();
        let mut executed = 0;
        while executed < budget && self.run_next() {
            executed += 1;
        }
        executed
    }

    /// Block until an invocation is available, then run it.
    ///
    /// Returns `false` if `timeout` elapsed with nothing to run.
    pub fn wait_and_run(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let next = {
            let mut pending = self.pending.lock();
            loop {
                if let Some(entry) = pending.pop_front() {
                    break Some(entry);
                }
                if self.posted.wait_until(&mut pending, deadline).timed_out() {
                    break pending.pop_front();
                }
            }
        };
        match next {
            Some((_, invocation)) => {
                invocation.execute();
                true
            }
            None => false,
        }
    }
}

impl ExecutionContext for InvocationQueue {
    fn post(&self, tag: DispatchTag, invocation: QueuedInvocation) {
        let mut pending = self.pending.lock();
        pending.push_back((tag, invocation));
        self.posted.notify_one();
    }

    fn remove_tagged(&self, tag: DispatchTag) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|(t, _)| *t != tag);
        let removed = before - pending.len();
        if removed > 0 {
            trace!(
                target: targets::INVOCATION,
                tag = tag.as_u64(),
                removed,
                "removed tagged invocations"
            );
        }
        removed
    }
}

impl std::fmt::Debug for InvocationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationQueue")
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// An execution context backed by a dedicated thread.
///
/// The thread runs posted invocations one at a time until the handle is
/// dropped. A panicking invocation is logged and does not stop the thread.
pub struct ContextThread {
    queue: Arc<InvocationQueue>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ContextThread {
    /// Start a context thread with the given name.
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let queue = Arc::new(InvocationQueue::new());
        let stop = Arc::new(AtomicBool::new(false));

        let thread_queue = queue.clone();
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || context_loop(&thread_queue, &thread_stop))
            .map_err(|source| CoreError::ThreadSpawn {
                name: name.clone(),
                source,
            })?;

        debug!(target: targets::INVOCATION, thread = %name, "context thread started");

        Ok(Self {
            queue,
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Number of invocations waiting to run.
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// Stop the thread after the invocation currently running, then join it.
    ///
    /// Invocations still pending are discarded. Returns `false` if the
    /// thread was already joined or is the calling thread.
    pub fn shutdown(&self) -> bool {
        self.stop.store(true, Ordering::Release);
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) if handle.thread().id() != thread::current().id() => {
                handle.join().is_ok()
            }
            _ => false,
        }
    }
}

impl ExecutionContext for ContextThread {
    fn post(&self, tag: DispatchTag, invocation: QueuedInvocation) {
        self.queue.post(tag, invocation);
    }

    fn remove_tagged(&self, tag: DispatchTag) -> usize {
        self.queue.remove_tagged(tag)
    }
}

impl Drop for ContextThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ContextThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextThread")
            .field("pending", &self.queue.pending_count())
            .field("stopping", &self.stop.load(Ordering::Acquire))
            .finish()
    }
}

fn context_loop(queue: &InvocationQueue, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        let ran = panic::catch_unwind(AssertUnwindSafe(|| {
            queue.wait_and_run(CONTEXT_POLL_INTERVAL)
        }));
        if ran.is_err() {
            error!(target: targets::INVOCATION, "posted invocation panicked");
        }
    }
}

static_assertions::assert_impl_all!(InvocationQueue: Send, Sync);
static_assertions::assert_impl_all!(ContextThread: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> QueuedInvocation) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_factory = log.clone();
        let make = move |value: u32| {
            let log = log_for_factory.clone();
            QueuedInvocation::new(move || log.lock().push(value))
        };
        (log, make)
    }

    #[test]
    fn test_tags_are_unique() {
        let a = DispatchTag::unique();
        let b = DispatchTag::unique();
        assert_ne!(a, b);
    }

    #[test]
    fn test_post_does_not_execute_inline() {
        let queue = InvocationQueue::new();
        let (log, make) = recorder();
        queue.post(DispatchTag::unique(), make(1));
        assert!(log.lock().is_empty());
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn test_run_pending_preserves_post_order() {
        let queue = InvocationQueue::new();
        let tag = DispatchTag::unique();
        let (log, make) = recorder();
        for i in 0..4 {
            queue.post(tag, make(i));
        }
        assert_eq!(queue.run_pending(), 4);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_remove_tagged_leaves_other_work() {
        let queue = InvocationQueue::new();
        let mine = DispatchTag::unique();
        let theirs = DispatchTag::unique();
        let (log, make) = recorder();

        queue.post(mine, make(1));
        queue.post(theirs, make(2));
        queue.post(mine, make(3));

        assert_eq!(queue.pending_for(mine), 2);
        assert_eq!(queue.remove_tagged(mine), 2);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*log.lock(), vec![2]);
    }

    #[test]
    fn test_run_pending_defers_reposted_work() {
        let queue = Arc::new(InvocationQueue::new());
        let tag = DispatchTag::unique();
        let count = Arc::new(AtomicUsize::new(0));

        let inner_queue = queue.clone();
        let inner_count = count.clone();
        queue.post(
            tag,
            QueuedInvocation::new(move || {
                inner_count.fetch_add(1, Ordering::SeqCst);
                let again = inner_count.clone();
                inner_queue.post(
                    tag,
                    QueuedInvocation::new(move || {
                        again.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_and_run_times_out() {
        let queue = InvocationQueue::new();
        assert!(!queue.wait_and_run(Duration::from_millis(20)));
    }

    #[test]
    fn test_context_thread_runs_posts() {
        let context = ContextThread::spawn("test-context").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let tag = DispatchTag::unique();

        for i in 0..3 {
            let tx = tx.clone();
            context.post(
                tag,
                QueuedInvocation::new(move || {
                    assert_eq!(thread::current().name(), Some("test-context"));
                    tx.send(i).unwrap();
                }),
            );
        }

        let received: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(received, vec![0, 1, 2]);
        assert!(context.shutdown());
    }

    #[test]
    fn test_context_thread_survives_panicking_invocation() {
        let context = ContextThread::spawn("test-context-panic").unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let tag = DispatchTag::unique();

        context.post(tag, QueuedInvocation::new(|| panic!("listener failure")));
        context.post(
            tag,
            QueuedInvocation::new(move || {
                tx.send("still running").unwrap();
            }),
        );

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            "still running"
        );
    }
}
