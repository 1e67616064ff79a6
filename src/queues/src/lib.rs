// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Bounded queues for sending work into an event-loop thread.
//!
//! Each receiving loop registers a `mio::Waker` with its poll instance; the
//! sender half pairs a lock-free bounded queue with that waker so a send
//! interrupts the receiver's poll. Senders are cheap to clone, which lets
//! any thread (listener, task pool, sibling workers) push items toward a
//! given loop.

pub use net::Waker;

use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

/// Create a bounded waking queue delivering into the loop that owns `waker`.
pub fn waking_queue<T>(waker: Arc<Waker>, capacity: usize) -> (WakingSender<T>, WakingReceiver<T>) {
    let queue = Arc::new(ArrayQueue::new(capacity));
    (
        WakingSender {
            inner: queue.clone(),
            waker,
        },
        WakingReceiver { inner: queue },
    )
}

/// The sending half. Cloneable; a successful send wakes the receiving loop.
pub struct WakingSender<T> {
    inner: Arc<ArrayQueue<T>>,
    waker: Arc<Waker>,
}

impl<T> Clone for WakingSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            waker: self.waker.clone(),
        }
    }
}

impl<T> WakingSender<T> {
    /// Push an item and wake the receiver. When the queue is full the item
    /// is handed back to the caller.
    pub fn try_send(&self, item: T) -> Result<(), T> {
        self.inner.push(item)?;
        // a failed wakeup is recovered by the receiver's poll timeout
        let _ = self.waker.wake();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// The receiving half, drained from within the owning loop.
pub struct WakingReceiver<T> {
    inner: Arc<ArrayQueue<T>>,
}

impl<T> WakingReceiver<T> {
    pub fn try_recv(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Drain everything currently pending into `buf`.
    pub fn try_recv_all(&self, buf: &mut Vec<T>) {
        let pending = self.inner.len();
        for _ in 0..pending {
            if let Some(item) = self.inner.pop() {
                buf.push(item);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
