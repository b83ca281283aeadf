//! Bounded blocking handoff queue with last-in-first-out drain order.
//!
//! This is the inter-thread handoff primitive used for the single global
//! outbound-command path and for per-add-on-service inbound buffering.
//!
//! The drain order is deliberately LIFO, not FIFO: an item pushed later can
//! be popped before older items. That inverted order is an observable,
//! tested contract of the outbound dispatch path, so callers that need
//! ordered delivery to a single destination must not rely on enqueue order.

use std::sync::{Condvar, Mutex};

/// Default capacity of a handoff queue
pub const DEFAULT_CAPACITY: usize = 20;

struct Inner<T> {
    items: Vec<T>,
    closed: bool,
}

/// A fixed-capacity, mutually exclusive, last-in-first-out handoff store
///
/// `push` blocks while the queue is full, `pop` blocks while it is empty.
/// Each completed operation signals at most one waiter on the opposite side.
/// Closing the queue wakes every waiter; a closed queue rejects pushes and
/// drains remaining items before `pop` starts returning `None`.
pub struct HandoffQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> HandoffQueue<T> {
    /// Creates a queue with the default capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a queue with the given capacity
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; a zero-capacity handoff can never
    /// transfer an item.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "handoff queue capacity must be non-zero");
        Self {
            inner: Mutex::new(Inner {
                items: Vec::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Returns the fixed capacity of the queue
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pushes an item, blocking while the queue is full
    ///
    /// Returns the item back to the caller if the queue has been closed.
    pub fn push(&self, item: T) -> std::result::Result<(), T> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while inner.items.len() >= self.capacity && !inner.closed {
            inner = match self.not_full.wait(inner) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        if inner.closed {
            return Err(item);
        }
        inner.items.push(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pops the most recently pushed item, blocking while the queue is empty
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while inner.items.is_empty() && !inner.closed {
            inner = match self.not_empty.wait(inner) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        let item = inner.items.pop();
        drop(inner);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Pops without blocking; `None` when empty
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let item = inner.items.pop();
        drop(inner);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Returns the number of buffered items
    #[must_use]
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.items.len(),
            Err(poisoned) => poisoned.into_inner().items.len(),
        }
    }

    /// Returns true if no items are buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the queue, waking every blocked pusher and popper
    ///
    /// Items already buffered remain poppable; once drained, `pop` returns
    /// `None`.
    pub fn close(&self) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Returns true if the queue has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self.inner.lock() {
            Ok(guard) => guard.closed,
            Err(poisoned) => poisoned.into_inner().closed,
        }
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
