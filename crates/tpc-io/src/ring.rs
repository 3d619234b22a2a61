// SPDX-License-Identifier: Apache-2.0

//! Submission-queue/completion-queue ring back-end, backed by `io_uring`.
//! Readiness is modelled with `PollAdd` submissions (the ring equivalent of
//! an epoll registration); each completion is resubmitted so the
//! registration keeps reporting readiness across cycles, the same
//! level-triggered contract the readiness backend offers. Submissions are
//! batched and only flushed to the kernel at the end of a `poll` call;
//! completions are drained at the start of the next one.

use crate::{Handler, IoBackend, IoError, IoEvent, IoToken, Interest, LoopWaker};
use io_uring::{opcode, types, IoUring};
use nix::sys::eventfd::{EventFd, EfdFlags};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

const WAKE_USER_DATA: u64 = u64::MAX;

struct Registration {
    fd: RawFd,
    interest: Interest,
    handler: Handler,
}

/// Cross-thread wake handle for a [`RingBackend`]: writes to the backend's
/// eventfd, which the ring keeps a standing `PollAdd` registration on.
pub struct RingWakeHandle(Arc<EventFd>);

impl RingWakeHandle {
    pub(crate) fn wake(&self) -> Result<(), IoError> {
        nix::unistd::write(&*self.0, &1u64.to_ne_bytes())
            .map_err(|errno| IoError::BackendFailure(std::io::Error::from(errno)))?;
        Ok(())
    }
}

/// Ring-based I/O back-end.
pub struct RingBackend {
    ring: IoUring,
    wake_fd: Arc<EventFd>,
    registrations: Vec<Option<Registration>>,
    free_slots: Vec<usize>,
}

impl RingBackend {
    /// Creates a ring with `entries` submission-queue slots and an
    /// eventfd registered for cross-thread wakeups.
    pub fn new(entries: u32) -> Result<Self, IoError> {
        let ring = IoUring::new(entries)?;
        let wake_fd = Arc::new(
            EventFd::from_flags(EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)
                .map_err(|errno| IoError::BackendFailure(std::io::Error::from(errno)))?,
        );
        let mut backend = Self {
            ring,
            wake_fd,
            registrations: Vec::new(),
            free_slots: Vec::new(),
        };
        backend.submit_poll(wake_fd_raw(&backend.wake_fd), libc::POLLIN as u32, WAKE_USER_DATA)?;
        Ok(backend)
    }

    fn submit_poll(&mut self, fd: RawFd, flags: u32, user_data: u64) -> Result<(), IoError> {
        let entry = opcode::PollAdd::new(types::Fd(fd), flags)
            .build()
            .user_data(user_data);
        // Safety: `fd` stays valid for the lifetime of the registration
        // it belongs to; the ring does not outlive this backend.
        unsafe {
            self.ring
                .submission()
                .push(&entry)
                .map_err(|_| IoError::BackendFailure(std::io::Error::other("submission queue full")))?;
        }
        Ok(())
    }

    fn interest_to_poll_flags(interest: Interest) -> u32 {
        let mut flags = 0;
        if interest.readable {
            flags |= libc::POLLIN as u32;
        }
        if interest.writable {
            flags |= libc::POLLOUT as u32;
        }
        flags
    }
}

fn wake_fd_raw(fd: &Arc<EventFd>) -> RawFd {
    fd.as_raw_fd()
}

impl IoBackend for RingBackend {
    fn poll(&mut self, timeout: Option<Duration>) -> Result<usize, IoError> {
        match timeout {
            None => {
                self.ring.submit_and_wait(1)?;
            }
            Some(duration) if duration.is_zero() => {
                self.ring.submit()?;
            }
            Some(duration) => {
                let timespec = types::Timespec::new()
                    .sec(duration.as_secs())
                    .nsec(duration.subsec_nanos());
                let args = types::SubmitArgs::new().timespec(&timespec);
                match self.ring.submitter().submit_with_args(1, &args) {
                    Ok(_) => {}
                    Err(ref e) if e.raw_os_error() == Some(libc::ETIME) => {}
                    Err(e) => return Err(IoError::BackendFailure(e)),
                }
            }
        }

        let mut dispatched = 0;
        let mut resubmits = Vec::new();
        for completion in self.ring.completion() {
            let user_data = completion.user_data();
            if user_data == WAKE_USER_DATA {
                let _ = nix::unistd::read(wake_fd_raw(&self.wake_fd), &mut [0u8; 8]);
                resubmits.push((wake_fd_raw(&self.wake_fd), libc::POLLIN as u32, WAKE_USER_DATA));
                continue;
            }
            let index = user_data as usize;
            let result = completion.result();
            if let Some(Some(registration)) = self.registrations.get_mut(index) {
                let poll_flags = result as u32;
                (registration.handler)(IoEvent {
                    token: IoToken::new(index),
                    readable: poll_flags & (libc::POLLIN as u32) != 0,
                    writable: poll_flags & (libc::POLLOUT as u32) != 0,
                    error: result < 0 || poll_flags & (libc::POLLERR as u32 | libc::POLLHUP as u32) != 0,
                });
                dispatched += 1;
                resubmits.push((
                    registration.fd,
                    Self::interest_to_poll_flags(registration.interest),
                    user_data,
                ));
            }
        }

        for (fd, flags, user_data) in resubmits {
            self.submit_poll(fd, flags, user_data)?;
        }
        Ok(dispatched)
    }

    fn wake(&self) -> Result<(), IoError> {
        nix::unistd::write(&*self.wake_fd, &1u64.to_ne_bytes())
            .map_err(|errno| IoError::BackendFailure(std::io::Error::from(errno)))?;
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
        self.submit_poll(fd, Self::interest_to_poll_flags(interest), index as u64)?;
        self.registrations[index] = Some(Registration { fd, interest, handler });
        Ok(IoToken::new(index))
    }

    fn modify(&mut self, token: IoToken, interest: Interest) -> Result<(), IoError> {
        let index = token.index();
        let registration = self
            .registrations
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(IoError::UnknownToken)?;
        registration.interest = interest;
        Ok(())
    }

    fn unregister(&mut self, token: IoToken) -> Result<(), IoError> {
        let index = token.index();
        self.registrations
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(IoError::UnknownToken)?;
        self.free_slots.push(index);
        Ok(())
    }

    fn waker(&self) -> LoopWaker {
        LoopWaker::Ring(Arc::new(RingWakeHandle(self.wake_fd.clone())))
    }
}
