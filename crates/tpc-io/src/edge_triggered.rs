// SPDX-License-Identifier: Apache-2.0

//! Edge-triggered notifier with a one-shot rearm policy: once a
//! registration fires, it is deregistered from the selector until the
//! caller explicitly rearms it via `modify`.
//!
//! `mio` does not expose a portable `EPOLLONESHOT` equivalent across every
//! backend it supports, so one-shot semantics are emulated here by
//! deregistering on dispatch and requiring an explicit `modify` call to
//! reregister — the handler is retained across that gap so rearming
//! doesn't need the caller to resupply it.

use crate::{Handler, IoBackend, IoError, IoEvent, IoToken, Interest, LoopWaker};
use mio::unix::SourceFd;
use mio::{Events, Poll, Token, Waker};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

const WAKE_TOKEN: Token = Token(usize::MAX);

struct Registration {
    fd: RawFd,
    interest: Interest,
    handler: Handler,
    armed: bool,
}

/// Edge-triggered backend, backed by `mio::Poll`, with one-shot rearm.
pub struct EdgeTriggeredBackend {
    poll: Poll,
    waker: Arc<Waker>,
    events: Events,
    registrations: Vec<Option<Registration>>,
    free_slots: Vec<usize>,
}

impl EdgeTriggeredBackend {
    /// Creates a backend with an `Events` buffer sized for up to
    /// `events_capacity` readiness notifications per `poll` call.
    pub fn new(events_capacity: usize) -> Result<Self, IoError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll,
            waker,
            events: Events::with_capacity(events_capacity),
            registrations: Vec::new(),
            free_slots: Vec::new(),
        })
    }

    fn to_mio_interest(interest: Interest) -> mio::Interest {
        match (interest.readable, interest.writable) {
            (true, true) => mio::Interest::READABLE | mio::Interest::WRITABLE,
            (true, false) => mio::Interest::READABLE,
            (false, true) => mio::Interest::WRITABLE,
            (false, false) => mio::Interest::READABLE,
        }
    }
}

impl IoBackend for EdgeTriggeredBackend {
    fn poll(&mut self, timeout: Option<Duration>) -> Result<usize, IoError> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut dispatched = 0;
        let mut to_disarm = Vec::new();
        for event in &self.events {
            if event.token() == WAKE_TOKEN {
                continue;
            }
            let index = event.token().0;
            if let Some(Some(registration)) = self.registrations.get_mut(index) {
                (registration.handler)(IoEvent {
                    token: IoToken::new(index),
                    readable: event.is_readable(),
                    writable: event.is_writable(),
                    error: event.is_error() || event.is_read_closed() || event.is_write_closed(),
                });
                dispatched += 1;
                to_disarm.push((index, registration.fd));
            }
        }
        for (index, fd) in to_disarm {
            if self.poll.registry().deregister(&mut SourceFd(&fd)).is_ok() {
                if let Some(Some(registration)) = self.registrations.get_mut(index) {
                    registration.armed = false;
                }
            }
        }
        Ok(dispatched)
    }

    fn wake(&self) -> Result<(), IoError> {
        self.waker.wake()?;
        Ok(())
    }

    fn register(
        &mut self,
        fd: RawFd,
        interest: Interest,
        handler: Handler,
    ) -> Result<IoToken, IoError> {
        let index = self.free_slots.pop().unwrap_or(self.registrations.len());
        if index == self.registrations.len() {
            self.registrations.push(None);
        }
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(index), Self::to_mio_interest(interest))?;
        self.registrations[index] = Some(Registration {
            fd,
            interest,
            handler,
            armed: true,
        });
        Ok(IoToken::new(index))
    }

    /// Rearms the registration (with a possibly updated interest set) if
    /// it was disarmed by a prior dispatch, or simply updates its
    /// interest if it is still armed.
    fn modify(&mut self, token: IoToken, interest: Interest) -> Result<(), IoError> {
        let index = token.index();
        let registration = self
            .registrations
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(IoError::UnknownToken)?;
        registration.interest = interest;
        let mio_interest = Self::to_mio_interest(interest);
        if registration.armed {
            self.poll
                .registry()
                .reregister(&mut SourceFd(&registration.fd), Token(index), mio_interest)?;
        } else {
            self.poll
                .registry()
                .register(&mut SourceFd(&registration.fd), Token(index), mio_interest)?;
            registration.armed = true;
        }
        Ok(())
    }

    fn unregister(&mut self, token: IoToken) -> Result<(), IoError> {
        let index = token.index();
        let registration = self
            .registrations
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(IoError::UnknownToken)?;
        if registration.armed {
            self.poll.registry().deregister(&mut SourceFd(&registration.fd))?;
        }
        self.free_slots.push(index);
        Ok(())
    }

    fn waker(&self) -> LoopWaker {
        LoopWaker::Mio(self.waker.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;

    #[test]
    fn fired_registration_does_not_refire_until_rearmed() {
        let mut backend = EdgeTriggeredBackend::new(16).unwrap();
        let (mut a, mut b) = mio::net::UnixStream::pair().unwrap();
        b.write_all(b"x").unwrap();

        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = count.clone();
        let token = backend
            .register(
                a.as_raw_fd(),
                Interest::READABLE,
                Box::new(move |_| {
                    count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }),
            )
            .unwrap();

        backend.poll(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);

        // still readable (data wasn't drained) but disarmed — must not refire.
        let dispatched = backend.poll(Some(Duration::from_millis(50))).unwrap();
        assert_eq!(dispatched, 0);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);

        backend.modify(token, Interest::READABLE).unwrap();
        backend.poll(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
        let _ = a.flush();
    }
}
