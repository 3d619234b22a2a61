// SPDX-License-Identifier: Apache-2.0

//! I/O back-end adapter: an abstract `poll`/`wake`/`register` interface,
//! with three concrete drivers an event loop can be configured to drive —
//! a portable readiness-based selector, an edge-triggered notifier with
//! one-shot rearm, and a submission/completion ring.

mod edge_triggered;
mod error;
mod readiness;
#[cfg(target_os = "linux")]
mod ring;

pub use edge_triggered::EdgeTriggeredBackend;
pub use error::IoError;
pub use readiness::ReadinessBackend;
#[cfg(target_os = "linux")]
pub use ring::RingBackend;

use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// A cheap, cloneable, cross-thread handle that wakes a specific backend's
/// blocked `poll` without touching the backend itself — unlike the
/// backend, this handle is `Send + Sync` and never contends with `poll`'s
/// internal state.
#[derive(Clone)]
pub enum LoopWaker {
    Mio(Arc<mio::Waker>),
    #[cfg(target_os = "linux")]
    Ring(Arc<ring::RingWakeHandle>),
}

impl LoopWaker {
    pub fn wake(&self) -> Result<(), IoError> {
        match self {
            Self::Mio(waker) => {
                waker.wake()?;
                Ok(())
            }
            #[cfg(target_os = "linux")]
            Self::Ring(handle) => handle.wake(),
        }
    }
}

/// A registered interest's readiness direction(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    /// Readable only.
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };
    /// Writable only.
    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };
    /// Both directions.
    pub const READABLE_WRITABLE: Self = Self {
        readable: true,
        writable: true,
    };
}

/// A stable identifier for one registration, returned by `register` and
/// used by `modify`/`unregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoToken(usize);

impl IoToken {
    fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Raw index, for logging.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// One readiness notification delivered to a registration's handler.
#[derive(Debug, Clone, Copy)]
pub struct IoEvent {
    pub token: IoToken,
    pub readable: bool,
    pub writable: bool,
    /// The backend observed an error or hang-up condition on this
    /// registration; the handler should treat the fd as no longer usable.
    pub error: bool,
}

/// A per-registration readiness callback. Invoked directly from `poll`'s
/// dispatch loop, never queued — the loop thread that calls `poll` is the
/// same thread that runs the handler.
pub type Handler = Box<dyn FnMut(IoEvent) + Send>;

/// Abstract interface every I/O back-end driver implements. An event loop
/// is configured with exactly one implementation for its lifetime.
pub trait IoBackend {
    /// Drains ready events (blocking up to `timeout`; `None` means block
    /// indefinitely, `Some(Duration::ZERO)` means a non-blocking poll) and
    /// invokes each ready registration's handler. Returns the number of
    /// events dispatched.
    fn poll(&mut self, timeout: Option<Duration>) -> Result<usize, IoError>;

    /// Cross-thread, idempotent: makes a concurrently-blocked `poll`
    /// return as soon as possible. Safe to call whether or not `poll` is
    /// currently blocked.
    fn wake(&self) -> Result<(), IoError>;

    /// Registers `fd` for `interest`, storing `handler` as its attachment.
    /// Returns the token `modify`/`unregister` address it by.
    fn register(&mut self, fd: RawFd, interest: Interest, handler: Handler)
        -> Result<IoToken, IoError>;

    /// Changes the interest set for an existing registration.
    fn modify(&mut self, token: IoToken, interest: Interest) -> Result<(), IoError>;

    /// Removes a registration; its handler is dropped.
    fn unregister(&mut self, token: IoToken) -> Result<(), IoError>;

    /// Returns a cheap, `Send + Sync` handle another thread can call
    /// `wake()` through without reaching into the backend's own state.
    fn waker(&self) -> LoopWaker;
}
