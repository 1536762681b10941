//! FIFO operation queue with a blocking, interruptible take.
//!
//! The queue is the hand-off point between any number of producer threads
//! and a single consumer (the worker). Every state change happens under one
//! mutex, and the condition variable the consumer waits on is only ever
//! notified while that mutex is held, so an enqueue can never slip between
//! the consumer's emptiness check and its wait.
//!
//! ```
//! use horizon_courier_core::queue::OperationQueue;
//!
//! let queue = OperationQueue::new();
//! queue.enqueue("first").unwrap();
//! queue.enqueue("second").unwrap();
//!
//! assert_eq!(queue.take_or_block(), Some("first"));
//! assert_eq!(queue.len(), 1);
//! ```

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::{CoreError, Result};
use crate::logging::targets;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    interrupt_pending: bool,
}

/// An unbounded FIFO queue consumed by a single blocking taker.
pub struct OperationQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for OperationQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OperationQueue<T> {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
                interrupt_pending: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item and wake a blocked taker.
    ///
    /// Fails with [`CoreError::QueueClosed`] once [`close`](Self::close) has
    /// been called; the item is dropped in that case.
    pub fn enqueue(&self, item: T) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(CoreError::QueueClosed);
        }
        state.items.push_back(item);
        trace!(target: targets::QUEUE, depth = state.items.len(), "item enqueued");
        self.available.notify_one();
        Ok(())
    }

    /// Remove and return the head item, blocking while the queue is empty.
    ///
    /// Returns `None` when the wait was cut short by [`interrupt`](Self::interrupt),
    /// or when the queue is closed and fully drained.
    pub fn take_or_block(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.interrupt_pending {
                state.interrupt_pending = false;
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Remove and return the head item without blocking.
    pub fn try_take(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Drop every queued item and return how many were removed.
    ///
    /// A blocked taker is not woken; it keeps waiting for the next enqueue.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.items.len();
        state.items.clear();
        if removed > 0 {
            trace!(target: targets::QUEUE, removed, "queue cleared");
        }
        removed
    }

    /// Remove and return every queued item, oldest first.
    ///
    /// Like [`clear`](Self::clear), this does not wake a blocked taker. The
    /// caller decides where the items are dropped.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let drained: Vec<T> = state.items.drain(..).collect();
        if !drained.is_empty() {
            trace!(target: targets::QUEUE, removed = drained.len(), "queue drained");
        }
        drained
    }

    /// Wake the taker once without handing it an item.
    ///
    /// If nobody is waiting, the next [`take_or_block`](Self::take_or_block)
    /// returns `None` immediately.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupt_pending = true;
        self.available.notify_all();
    }

    /// Refuse further items and wake every waiter.
    ///
    /// Items already queued can still be taken.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl<T> std::fmt::Debug for OperationQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OperationQueue")
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

static_assertions::assert_impl_all!(OperationQueue<Box<dyn FnOnce() + Send>>: Send, Sync);
