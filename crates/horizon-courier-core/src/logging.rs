//! Tracing targets and span names for Horizon Courier.
//!
//! Horizon Courier is instrumented with the `tracing` crate. Nothing is
//! printed unless the application installs a subscriber:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_courier_net=debug")
//!     .init();
//! ```
//!
//! The constants below are the exact strings used by both crates, so they
//! can be used to build filter directives for a single subsystem.

/// Span names used throughout Horizon Courier.
pub mod span_names {
    /// One executed operation, from dequeue to completion.
    pub const OPERATION: &str = "horizon_courier::operation";
    /// One transport round trip.
    pub const REQUEST: &str = "horizon_courier::request";
}

/// Target names for log filtering.
pub mod targets {
    /// Operation queue target.
    pub const QUEUE: &str = "horizon_courier_core::queue";
    /// Execution context and posted invocation target.
    pub const INVOCATION: &str = "horizon_courier_core::invocation";
    /// Worker thread target.
    pub const WORKER: &str = "horizon_courier_net::worker";
    /// Listener dispatch and cancellation target.
    pub const DISPATCH: &str = "horizon_courier_net::dispatch";
    /// HTTP transport target.
    pub const TRANSPORT: &str = "horizon_courier_net::transport";
    /// Session and cookie jar target.
    pub const SESSION: &str = "horizon_courier_net::session";
    /// Client facade target.
    pub const CLIENT: &str = "horizon_courier_net::client";
}
