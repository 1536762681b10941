//! The worker thread.
//!
//! One dedicated thread owns the [`Session`] and runs operations strictly in
//! submission order:
//!
//! ```text
//! Idle ──take──> Dispatching ──begin──> Running ──result──> Completing ──> Idle
//!   │                 │
//!   │                 └── cancelled since enqueue: discarded unrun
//!   └── Quit taken: Terminating (queue closed, thread exits)
//! ```
//!
//! Executors report failures as errors, and a panicking executor is caught.
//! Either way the operation resolves to its kind's failure value and the loop
//! moves on to the next operation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use horizon_courier_core::logging::{span_names, targets};
use horizon_courier_core::{CancellationToken, ExecutionContext, QueuedInvocation};
use tracing::{debug, error, info, trace, warn};

use crate::dispatch::Dispatcher;
use crate::error::{NetworkError, Result};
use crate::exec::download::{self, DownloadPolicy};
use crate::exec::{fetch, size, submit};
use crate::operation::{
    DownloadProgress, Operation, OperationId, OperationKind, Queued, Request, SIZE_ERROR,
};
use crate::session::Session;

/// Settings the worker applies to every operation.
#[derive(Clone, Debug)]
pub(crate) struct WorkerSettings {
    pub(crate) thread_name: String,
    pub(crate) download: DownloadPolicy,
    pub(crate) release_idle_connections: bool,
}

/// Start the worker thread.
pub(crate) fn spawn(
    settings: WorkerSettings,
    session: Session,
    dispatcher: Arc<Dispatcher>,
) -> Result<JoinHandle<()>> {
    let name = settings.thread_name.clone();
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            info!(target: targets::WORKER, "worker started");
            worker_loop(&settings, session, &dispatcher);
            info!(target: targets::WORKER, "worker stopped");
        })
        .map_err(|e| NetworkError::Worker(format!("failed to spawn worker thread '{name}': {e}")))
}

fn worker_loop(settings: &WorkerSettings, mut session: Session, dispatcher: &Arc<Dispatcher>) {
    loop {
        match dispatcher.take_next() {
            Some(Queued::Operation(operation)) => {
                run_operation(settings, &mut session, dispatcher, operation);
            }
            Some(Queued::Quit) => {
                debug!(target: targets::WORKER, "quit reached, draining complete");
                break;
            }
            None if dispatcher.queue_closed() => break,
            None => trace!(target: targets::WORKER, "queue wait interrupted"),
        }
    }
    dispatcher.close_queue();
}

/// The worker's view of one operation while it runs.
struct Completion<'a> {
    dispatcher: &'a Arc<Dispatcher>,
    epoch: u64,
    context: Arc<dyn ExecutionContext>,
}

impl Completion<'_> {
    fn deliver<T, F>(&self, outcome: Option<T>, listener: F)
    where
        T: Send + 'static,
        F: FnOnce(Option<T>) + Send + 'static,
    {
        let succeeded = outcome.is_some();
        self.dispatcher.complete(
            self.epoch,
            &self.context,
            succeeded,
            QueuedInvocation::new(move || listener(outcome)),
        );
    }

    /// A progress reporter that posts through the dispatcher.
    fn reporter<T, L>(&self, listener: Option<Arc<L>>) -> Arc<dyn Fn(T) + Send + Sync>
    where
        T: Send + 'static,
        L: Fn(T) + Send + Sync + ?Sized + 'static,
    {
        let Some(listener) = listener else {
            return Arc::new(|_: T| {});
        };
        let dispatcher = self.dispatcher.clone();
        let context = self.context.clone();
        let epoch = self.epoch;
        Arc::new(move |progress: T| {
            let listener = listener.clone();
            dispatcher.post(
                epoch,
                &context,
                QueuedInvocation::new(move || (*listener)(progress)),
            );
        })
    }
}

fn run_operation(
    settings: &WorkerSettings,
    session: &mut Session,
    dispatcher: &Arc<Dispatcher>,
    operation: Operation,
) {
    let Some(interrupt) = dispatcher.begin(&operation) else {
        debug!(
            target: targets::WORKER,
            id = %operation.id,
            "operation cancelled before start"
        );
        return;
    };

    let Operation {
        id,
        epoch,
        context,
        request,
    } = operation;
    let kind = request.kind();
    let span = tracing::debug_span!(
        target: targets::WORKER,
        span_names::OPERATION,
        id = %id,
        kind = %kind,
        url = %request.target()
    );
    let _entered = span.enter();

    session.log_cookies();
    let completion = Completion {
        dispatcher,
        epoch,
        context,
    };

    let transport_failed = execute(settings, session, &completion, request, &interrupt, id, kind);

    dispatcher.finish();
    if settings.release_idle_connections || transport_failed {
        session.transport().close_idle_connections();
    }
}

/// Run the executor for `request` and deliver its outcome.
///
/// Returns `true` when the failure suggests pooled connections are stale.
fn execute(
    settings: &WorkerSettings,
    session: &mut Session,
    completion: &Completion<'_>,
    request: Request,
    interrupt: &CancellationToken,
    id: OperationId,
    kind: OperationKind,
) -> bool {
    let transport = session.transport();
    let mut outcomes = Outcomes {
        id,
        kind,
        stale_connections: false,
    };

    match request {
        Request::GetString { url, on_complete } => {
            let outcome = outcomes.settle(guard(|| fetch::text(transport, &url, interrupt)));
            completion.deliver(outcome, on_complete);
        }
        Request::GetJson { url, on_complete } => {
            let outcome = outcomes.settle(guard(|| fetch::json(transport, &url, interrupt)));
            completion.deliver(outcome, on_complete);
        }
        Request::GetRawData { url, on_complete } => {
            let outcome = outcomes.settle(guard(|| fetch::raw(transport, &url, interrupt)));
            completion.deliver(outcome, on_complete);
        }
        Request::GetFile {
            url,
            destination,
            on_progress,
            on_complete,
        } => {
            let report = completion.reporter::<DownloadProgress, _>(on_progress);
            let outcome = outcomes.settle(guard(|| {
                download::download(
                    transport,
                    &url,
                    &destination,
                    settings.download,
                    report.as_ref(),
                    interrupt,
                )
            }));
            completion.deliver(outcome, on_complete);
        }
        Request::PostJson {
            url,
            payload,
            on_complete,
        } => {
            let outcome = outcomes.settle(guard(|| {
                submit::post_json(transport, &url, payload?, interrupt)
            }));
            completion.deliver(outcome, on_complete);
        }
        Request::PostMultipart {
            url,
            parts,
            on_progress,
            on_complete,
        } => {
            let report = completion.reporter::<u64, _>(on_progress);
            let outcome = outcomes.settle(guard(|| {
                submit::post_multipart(transport, &url, parts, report, interrupt)
            }));
            completion.deliver(outcome, on_complete);
        }
        Request::GetSize { urls, on_complete } => {
            let total = outcomes.settle(guard(|| size::total(transport, &urls, interrupt)));
            completion.dispatcher.complete(
                completion.epoch,
                &completion.context,
                total.is_some(),
                QueuedInvocation::new(move || on_complete(total.unwrap_or(SIZE_ERROR))),
            );
        }
    }
    outcomes.stale_connections
}

fn guard<T>(executor: impl FnOnce() -> Result<T>) -> std::thread::Result<Result<T>> {
    panic::catch_unwind(AssertUnwindSafe(executor))
}

/// Reduces executor results to `Option`s, logging every failure.
struct Outcomes {
    id: OperationId,
    kind: OperationKind,
    /// Set by failures after which pooled connections should be dropped.
    stale_connections: bool,
}

impl Outcomes {
    fn settle<T>(&mut self, result: std::thread::Result<Result<T>>) -> Option<T> {
        let (id, kind) = (self.id, self.kind);
        match result {
            Ok(Ok(value)) => {
                debug!(target: targets::WORKER, %id, %kind, "operation succeeded");
                Some(value)
            }
            Ok(Err(NetworkError::Cancelled)) => {
                debug!(target: targets::WORKER, %id, %kind, "operation interrupted");
                None
            }
            Ok(Err(NetworkError::HttpStatus { status, message })) => {
                error!(
                    target: targets::WORKER,
                    %id,
                    %kind,
                    status,
                    reason = message.as_deref().unwrap_or("server did not give reason"),
                    "request rejected"
                );
                None
            }
            Ok(Err(err)) => {
                self.stale_connections |= matches!(
                    err,
                    NetworkError::Timeout | NetworkError::Connection(_) | NetworkError::Request(_)
                );
                warn!(target: targets::WORKER, %id, %kind, error = %err, "operation failed");
                None
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(target: targets::WORKER, %id, %kind, panic = %message, "operation panicked");
                None
            }
        }
    }
}
