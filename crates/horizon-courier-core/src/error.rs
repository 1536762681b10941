//! Error types for the courier core.

use thiserror::Error;

/// Errors raised by the core engine primitives.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The operating system refused to start a thread.
    #[error("failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        /// Name requested for the thread.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The queue has been closed and accepts no further items.
    #[error("queue is closed")]
    QueueClosed,
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
