// SPDX-License-Identifier: Apache-2.0

//! The task queue's optional cross-thread "global" queue: a bounded MPMC
//! channel any producer thread can offer into, drained only by the owning
//! loop thread.
//!
//! Built on `flume`, the one genuinely cross-thread bounded queue this
//! workspace needs — everything else is owned exclusively by its loop
//! thread.

use crate::error::{RecvError, SendError};

/// The producer half. `Clone`, `Send`, `Sync` — callable from any thread.
#[derive(Clone)]
pub struct ConcurrentSender<T> {
    inner: flume::Sender<T>,
}

/// The consumer half. Must only be polled from the owning loop thread —
/// nothing in the type system prevents otherwise, same as the local queue.
pub struct ConcurrentReceiver<T> {
    inner: flume::Receiver<T>,
}

/// Creates a bounded concurrent queue of the given capacity.
#[must_use]
pub fn bounded<T>(capacity: usize) -> (ConcurrentSender<T>, ConcurrentReceiver<T>) {
    let (tx, rx) = flume::bounded(capacity);
    (ConcurrentSender { inner: tx }, ConcurrentReceiver { inner: rx })
}

impl<T> ConcurrentSender<T> {
    /// Non-blocking offer; fails with [`SendError::Full`] or
    /// [`SendError::Closed`] instead of blocking the caller's thread.
    pub fn offer(&self, item: T) -> Result<(), SendError<T>> {
        self.inner.try_send(item).map_err(|e| match e {
            flume::TrySendError::Full(v) => SendError::Full(v),
            flume::TrySendError::Disconnected(v) => SendError::Closed(v),
        })
    }
}

impl<T> ConcurrentReceiver<T> {
    /// Non-blocking poll.
    pub fn try_recv(&self) -> Result<T, RecvError> {
        self.inner.try_recv().map_err(|e| match e {
            flume::TryRecvError::Empty => RecvError::Empty,
            flume::TryRecvError::Disconnected => RecvError::Closed,
        })
    }

    /// `true` when no items are currently queued (does not distinguish
    /// "empty" from "closed and empty" — callers needing that distinction
    /// should use `try_recv`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn cross_thread_offer_is_observed() {
        let (tx, rx) = bounded::<i32>(4);
        let handle = thread::spawn(move || {
            tx.offer(42).unwrap();
        });
        handle.join().unwrap();
        assert_eq!(rx.try_recv(), Ok(42));
    }

    #[test]
    fn offer_fails_when_full() {
        let (tx, _rx) = bounded::<i32>(1);
        tx.offer(1).unwrap();
        assert!(matches!(tx.offer(2), Err(SendError::Full(2))));
    }

    #[test]
    fn offer_fails_after_receiver_dropped() {
        let (tx, rx) = bounded::<i32>(1);
        drop(rx);
        assert!(matches!(tx.offer(1), Err(SendError::Closed(1))));
    }

    #[test]
    fn sender_is_send_and_clone() {
        fn assert_send<T: Send>() {}
        assert_send::<ConcurrentSender<i32>>();
        let (tx, _rx) = bounded::<i32>(1);
        let _tx2 = tx.clone();
    }
}
