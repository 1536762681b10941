//! Cooperative cancellation tokens.
//!
//! A [`CancellationToken`] is a shared flag that one side sets and the other
//! polls. Synchronous code checks [`is_cancelled`](CancellationToken::is_cancelled)
//! at convenient boundaries (between chunks, between retries). With the
//! `tokio` feature enabled, async code can additionally race any future
//! against [`cancelled`](CancellationToken::cancelled):
//!
//! ```ignore
//! tokio::select! {
//!     response = request => response,
//!     _ = token.cancelled() => return Err(Cancelled),
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cloneable handle to a one-way cancellation flag.
///
/// Cancellation cannot be undone; create a fresh token for each unit of work.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancellationState>,
}

#[derive(Default)]
struct CancellationState {
    cancelled: AtomicBool,
    #[cfg(feature = "tokio")]
    notify: tokio::sync::Notify,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation and wake every pending [`cancelled`](Self::cancelled) future.
    ///
    /// Calling this more than once has no further effect.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            #[cfg(feature = "tokio")]
            self.inner.notify.notify_waiters();
        }
    }

    /// Resolve once the token is cancelled.
    #[cfg(feature = "tokio")]
    pub async fn cancelled(&self) {
        // A Notified future receives notify_waiters() from the moment it is
        // created, so it must exist before the flag is checked.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_fresh_tokens_are_independent() {
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        first.cancel();
        assert!(!second.is_cancelled());
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("cancelled() did not resolve")
            .unwrap();
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_cancelled_after_cancel_is_immediate() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
    }
}
