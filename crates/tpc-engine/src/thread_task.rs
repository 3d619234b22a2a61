// SPDX-License-Identifier: Apache-2.0

//! Spawns a plain OS thread running a synchronous task to completion, with
//! named-thread panic containment and a shared stop flag the task polls
//! instead of the async-runtime cancellation token an equivalent async
//! engine would use.

use crate::error::EngineError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Handle to a task running on a dedicated thread.
pub struct ThreadTaskHandle<T> {
    stop: Arc<AtomicBool>,
    join_handle: Option<thread::JoinHandle<T>>,
    name: String,
}

impl<T> ThreadTaskHandle<T> {
    /// Requests the task stop by flipping the shared flag. Idempotent,
    /// best-effort — the task observes this on its own schedule (typically
    /// the top of its next run-cycle).
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Waits for the thread to finish, mapping a panic into
    /// [`EngineError::ThreadPanic`].
    pub fn join(mut self) -> Result<T, EngineError> {
        match self.join_handle.take().expect("join handle missing").join() {
            Ok(value) => Ok(value),
            Err(panic) => Err(EngineError::ThreadPanic {
                thread_name: self.name,
                panic_message: panic_message(&panic),
            }),
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Spawns `body` on a dedicated, named OS thread. `stop` is the flag the
/// returned handle's [`ThreadTaskHandle::request_stop`] will set — callers
/// that need `body` to observe it should clone it in before moving `stop`
/// into this call.
pub fn spawn<T, F>(
    thread_name: impl Into<String>,
    stop: Arc<AtomicBool>,
    body: F,
) -> Result<ThreadTaskHandle<T>, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let name = thread_name.into();
    let name_for_thread = name.clone();

    let join_handle = thread::Builder::new()
        .name(name_for_thread)
        .spawn(body)
        .map_err(|source| EngineError::ThreadSpawnError {
            thread_name: name.clone(),
            source,
        })?;

    Ok(ThreadTaskHandle {
        stop,
        join_handle: Some(join_handle),
        name,
    })
}
