// SPDX-License-Identifier: Apache-2.0

//! Portable readiness-based selector, backed by `mio::Poll`.

use crate::{Handler, IoBackend, IoError, IoEvent, IoToken, Interest, LoopWaker};
use mio::unix::SourceFd;
use mio::{Events, Poll, Token, Waker};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

const WAKE_TOKEN: Token = Token(usize::MAX);

struct Registration {
    fd: RawFd,
    handler: Handler,
}

/// Readiness selector. Each `poll` call drains whatever the OS selector
/// reports this cycle and invokes the matching handler directly; no
/// rearm step is needed between calls (level-triggered).
pub struct ReadinessBackend {
    poll: Poll,
    waker: Arc<Waker>,
    events: Events,
    registrations: Vec<Option<Registration>>,
    free_slots: Vec<usize>,
}

impl ReadinessBackend {
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

impl IoBackend for ReadinessBackend {
    fn poll(&mut self, timeout: Option<Duration>) -> Result<usize, IoError> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut dispatched = 0;
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
        self.registrations[index] = Some(Registration { fd, handler });
        Ok(IoToken::new(index))
    }

    fn modify(&mut self, token: IoToken, interest: Interest) -> Result<(), IoError> {
        let index = token.index();
        let fd = self
            .registrations
            .get(index)
            .and_then(Option::as_ref)
            .map(|r| r.fd)
            .ok_or(IoError::UnknownToken)?;
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), Token(index), Self::to_mio_interest(interest))?;
        Ok(())
    }

    fn unregister(&mut self, token: IoToken) -> Result<(), IoError> {
        let index = token.index();
        let registration = self
            .registrations
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(IoError::UnknownToken)?;
        self.poll.registry().deregister(&mut SourceFd(&registration.fd))?;
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
    use std::os::fd::AsRawFd;

    #[test]
    fn wake_returns_from_a_blocking_poll() {
        let mut backend = ReadinessBackend::new(16).unwrap();
        let waker = backend.waker.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.wake().unwrap();
        });
        let dispatched = backend.poll(None).unwrap();
        assert_eq!(dispatched, 0);
        handle.join().unwrap();
    }

    #[test]
    fn register_then_unregister_then_modify_fails() {
        let mut backend = ReadinessBackend::new(16).unwrap();
        let (read_half, _write_half) = mio::net::UnixStream::pair().unwrap();
        let fd = read_half.as_raw_fd();
        let token = backend
            .register(fd, Interest::READABLE, Box::new(|_| {}))
            .unwrap();
        backend.unregister(token).unwrap();
        assert!(backend.modify(token, Interest::READABLE).is_err());
    }

    #[test]
    fn readable_pair_dispatches_handler() {
        let mut backend = ReadinessBackend::new(16).unwrap();
        let (mut a, mut b) = mio::net::UnixStream::pair().unwrap();
        use std::io::Write;
        b.write_all(b"x").unwrap();

        let fired = Arc::new(std::sync::Mutex::new(false));
        let fired_clone = fired.clone();
        backend
            .register(
                a.as_raw_fd(),
                Interest::READABLE,
                Box::new(move |event| {
                    if event.readable {
                        *fired_clone.lock().unwrap() = true;
                    }
                }),
            )
            .unwrap();

        let dispatched = backend.poll(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(dispatched, 1);
        assert!(*fired.lock().unwrap());
        let _ = a.flush();
    }
}
