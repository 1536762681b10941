//! Core primitives for Horizon Courier.
//!
//! This crate holds the pieces of the operation engine that know nothing
//! about HTTP:
//!
//! - **Operation queue**: an unbounded FIFO with a blocking, interruptible take
//! - **Execution contexts**: destinations that run posted listener calls in order
//! - **Cancellation tokens**: one-way flags checked by long-running work
//! - **Logging**: tracing targets shared by every Horizon Courier crate
//!
//! # Example
//!
//! ```
//! use horizon_courier_core::{DispatchTag, ExecutionContext, InvocationQueue, QueuedInvocation};
//!
//! let context = InvocationQueue::new();
//! let tag = DispatchTag::unique();
//!
//! context.post(tag, QueuedInvocation::new(|| println!("runs on the pumping thread")));
//! assert_eq!(context.run_pending(), 1);
//! ```

pub mod cancellation;
pub mod error;
pub mod invocation;
pub mod logging;
pub mod queue;

pub use cancellation::CancellationToken;
pub use error::{CoreError, Result};
pub use invocation::{
    ContextThread, DispatchTag, ExecutionContext, InvocationQueue, QueuedInvocation,
};
pub use queue::OperationQueue;
