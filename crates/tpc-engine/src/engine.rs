// SPDX-License-Identifier: Apache-2.0

//! The reactor group: a fixed array of event loops, the lifecycle state
//! machine, partition hashing, and cross-thread task submission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tpc_config::{EngineConfig, ThreadAffinity};
use tpc_io::LoopWaker;
use tpc_scheduler::{Periodicity, Task};
use tpc_telemetry::EngineMetrics;

use crate::error::EngineError;
use crate::event_loop::{offer_global_and_wake, wake_if_needed, EventLoop, LoopIngress, ScheduleRequest};
use crate::state::{AtomicEngineState, EngineState};
use crate::thread_task::{self, ThreadTaskHandle};

/// The engine's view of one running loop: what's needed to reach it from
/// outside its thread, plus the handle to stop and join it.
struct LoopCell {
    sender: tpc_channel::ConcurrentSender<Task>,
    schedule_sender: tpc_channel::ConcurrentSender<ScheduleRequest>,
    wakeup_needed: Arc<AtomicBool>,
    waker: LoopWaker,
    thread: ThreadTaskHandle<()>,
    /// Set by the loop itself if its I/O back-end fails unrecoverably;
    /// the loop terminates on its own, and the rest of the engine
    /// proceeds. Read via [`Engine::loop_failed`].
    failed: Arc<AtomicBool>,
}

/// A countdown latch every loop thread signals on exit; `awaitTermination`
/// blocks on it. Mirrors the teacher's thread-join bookkeeping without an
/// async runtime.
struct TerminationLatch {
    remaining: Mutex<usize>,
    condvar: Condvar,
}

impl TerminationLatch {
    fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            condvar: Condvar::new(),
        }
    }

    fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.condvar.notify_all();
        }
    }

    fn await_zero(&self, timeout: Option<Duration>) -> bool {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return true;
        }
        match timeout {
            None => {
                self.condvar.wait_while(&mut remaining, |r| *r != 0);
                true
            }
            Some(timeout) => {
                let result = self
                    .condvar
                    .wait_while_for(&mut remaining, |r| *r != 0, timeout);
                !result.timed_out()
            }
        }
    }
}

/// A fixed set of event loops, one per configured CPU, behind the
/// `NEW -> RUNNING -> SHUTDOWN -> TERMINATED` lifecycle.
pub struct Engine {
    config: EngineConfig,
    metrics: Arc<EngineMetrics>,
    state: AtomicEngineState,
    loops: Mutex<Vec<LoopCell>>,
    latch: Arc<TerminationLatch>,
}

impl Engine {
    /// Validates `config` and constructs an engine in the `NEW` state. No
    /// loop threads are spawned until [`start`](Self::start).
    pub fn new(config: EngineConfig, metrics: Arc<EngineMetrics>) -> Result<Self, EngineError> {
        config.validate()?;
        let eventloop_count = config.eventloop_count;
        Ok(Self {
            config,
            metrics,
            state: AtomicEngineState::new(),
            loops: Mutex::new(Vec::new()),
            latch: Arc::new(TerminationLatch::new(eventloop_count)),
        })
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state.load()
    }

    /// Number of configured loops.
    #[must_use]
    pub fn eventloop_count(&self) -> usize {
        self.config.eventloop_count
    }

    /// Spawns one OS thread per configured loop. Fails with
    /// [`EngineError::IllegalState`] if not called from `NEW`.
    pub fn start(&self) -> Result<(), EngineError> {
        if !self.state.transition(EngineState::New, EngineState::Running) {
            return Err(EngineError::IllegalState {
                message: format!("start() called from state {:?}, expected New", self.state.load()),
            });
        }

        let mut cells = Vec::with_capacity(self.config.eventloop_count);
        for index in 0..self.config.eventloop_count {
            let name = format!("tpc-loop-{index}");
            let config = self.config.clone();
            let metrics = self.metrics.clone();
            let affinity = self.config.affinity_for(index);
            let latch = self.latch.clone();
            let loop_name = name.clone();

            let stop = Arc::new(AtomicBool::new(false));
            let (event_loop, ingress) = EventLoop::new(name.clone(), &config, stop.clone(), metrics)?;
            let LoopIngress {
                default_queue_sender,
                schedule_sender,
                wakeup_needed,
                waker,
                failed,
            } = ingress;

            let thread = thread_task::spawn(name.clone(), stop, move || {
                apply_affinity(&loop_name, affinity);
                event_loop.run();
                latch.count_down();
            })?;

            cells.push(LoopCell {
                sender: default_queue_sender,
                schedule_sender,
                wakeup_needed,
                waker,
                thread,
                failed,
            });
        }
        *self.loops.lock() = cells;
        Ok(())
    }

    /// Requests shutdown. From `NEW`, jumps straight to `TERMINATED`. From
    /// `RUNNING`, wakes every loop so its next cycle observes `stop` and
    /// exits after draining; `awaitTermination` still must be called to
    /// block until every loop thread has joined.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        if self.state.transition(EngineState::New, EngineState::Terminated) {
            return Ok(());
        }
        if !self.state.transition(EngineState::Running, EngineState::Shutdown) {
            return Err(EngineError::IllegalState {
                message: format!(
                    "shutdown() called from state {:?}, expected New or Running",
                    self.state.load()
                ),
            });
        }
        for cell in self.loops.lock().iter() {
            cell.thread.request_stop();
            let _ = cell.waker.wake();
        }
        Ok(())
    }

    /// Blocks until every loop thread has joined, or `timeout` elapses
    /// (`None` blocks indefinitely). Returns whether termination was
    /// observed.
    pub fn await_termination(&self, timeout: Option<Duration>) -> bool {
        let reached = self.latch.await_zero(timeout);
        if reached {
            self.state.store(EngineState::Terminated);
        }
        reached
    }

    /// Cross-thread submission into loop `loop_index`'s default queue.
    /// Returns `false` if the queue is at capacity or the engine isn't
    /// running.
    pub fn offer(&self, loop_index: usize, task: Task) -> bool {
        let loops = self.loops.lock();
        let Some(cell) = loops.get(loop_index) else {
            return false;
        };
        offer_global_and_wake(&cell.sender, &cell.wakeup_needed, &cell.waker, task).is_ok()
    }

    /// Cross-thread deadline scheduling into loop `loop_index`'s default
    /// queue. The request is queued for the loop thread to apply to its
    /// own (loop-owned) deadline heap on its next cycle; `false` means the
    /// loop index is out of range or its request queue is at capacity.
    pub fn schedule(
        &self,
        loop_index: usize,
        delay_nanos: u64,
        periodicity: Periodicity,
        make_task: impl Fn() -> Task + Send + 'static,
    ) -> bool {
        let loops = self.loops.lock();
        let Some(cell) = loops.get(loop_index) else {
            return false;
        };
        let request = ScheduleRequest {
            delay_nanos,
            periodicity,
            make_task: Box::new(make_task),
        };
        if cell.schedule_sender.offer(request).is_err() {
            return false;
        }
        wake_if_needed(&cell.wakeup_needed, &cell.waker);
        true
    }

    /// Whether loop `loop_index` terminated abnormally due to an
    /// unrecoverable I/O back-end failure. The loop's thread exits on its
    /// own once this is set; the rest of the engine is unaffected.
    /// `false` for an out-of-range index.
    #[must_use]
    pub fn loop_failed(&self, loop_index: usize) -> bool {
        let loops = self.loops.lock();
        loops
            .get(loop_index)
            .is_some_and(|cell| cell.failed.load(Ordering::Acquire))
    }

    /// Hashes `partition_key` onto one of the configured loops. The same
    /// key always maps to the same loop for the lifetime of this engine.
    #[must_use]
    pub fn partition_loop(&self, partition_key: u64) -> usize {
        (partition_key % self.config.eventloop_count as u64) as usize
    }

    /// Convenience: hash `partition_key` and offer `task` onto the loop it
    /// maps to.
    pub fn offer_partitioned(&self, partition_key: u64, task: Task) -> bool {
        self.offer(self.partition_loop(partition_key), task)
    }
}

fn apply_affinity(loop_name: &str, affinity: ThreadAffinity) {
    let ThreadAffinity::Pinned(core_id) = affinity else {
        return;
    };
    let applied = core_affinity::set_for_current(core_affinity::CoreId { id: core_id });
    if !applied {
        tracing::warn!(loop_name, core_id, "failed to apply requested CPU affinity; proceeding unpinned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    fn metrics() -> Arc<EngineMetrics> {
        Arc::new(EngineMetrics::new(&Registry::new()).unwrap())
    }

    #[test]
    fn starting_twice_is_illegal_state() {
        let engine = Engine::new(EngineConfig::default(), metrics()).unwrap();
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(EngineError::IllegalState { .. })));
        engine.shutdown().unwrap();
        engine.await_termination(Some(Duration::from_secs(5)));
    }

    #[test]
    fn shutdown_from_new_reaches_terminated_directly() {
        let engine = Engine::new(EngineConfig::default(), metrics()).unwrap();
        engine.shutdown().unwrap();
        assert_eq!(engine.state(), EngineState::Terminated);
    }

    #[test]
    fn shutdown_from_running_eventually_terminates() {
        let engine = Engine::new(EngineConfig::default(), metrics()).unwrap();
        engine.start().unwrap();
        engine.shutdown().unwrap();
        assert!(engine.await_termination(Some(Duration::from_secs(5))));
        assert_eq!(engine.state(), EngineState::Terminated);
    }

    #[test]
    fn partition_loop_is_stable_modulo_count() {
        let mut config = EngineConfig::default();
        config.eventloop_count = 4;
        let engine = Engine::new(config, metrics()).unwrap();
        assert_eq!(engine.partition_loop(9), 1);
        assert_eq!(engine.partition_loop(9), engine.partition_loop(9));
    }
}
