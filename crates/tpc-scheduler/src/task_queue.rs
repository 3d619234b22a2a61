// SPDX-License-Identifier: Apache-2.0

//! Task queue: a name, a shares weight, a local (owner-only) queue and
//! optionally a concurrent (multi-producer) queue, run-state, and
//! accounting.

use std::time::Instant;
use tpc_channel::{ConcurrentReceiver, ConcurrentSender, RingQueue};

/// A unit of work. Boxed as `FnOnce` because a task runs exactly once to
/// (voluntary) completion; `Send` because the same `Task` alias is used
/// for both local and cross-thread-submitted work (a task built on another
/// thread and pushed through the global queue must cross the thread
/// boundary).
pub type Task = Box<dyn FnOnce(&TaskContext) + Send>;

/// Context handed to a running task so it can cooperatively check whether
/// it has overrun its horizon.
///
/// The horizon is `task_start_nanos + min_granularity_nanos` — deliberately
/// shorter than the queue's whole slice, so a single task cannot silently
/// monopolise it.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext {
    epoch: Instant,
    horizon_nanos: u64,
}

impl TaskContext {
    /// Builds a context whose horizon is `min_granularity_nanos` past
    /// `start_nanos` (both measured from `epoch`).
    #[must_use]
    pub fn new(epoch: Instant, start_nanos: u64, min_granularity_nanos: u64) -> Self {
        Self {
            epoch,
            horizon_nanos: tpc_clock::saturating_deadline(start_nanos, min_granularity_nanos),
        }
    }

    /// `true` once the calling task has run past its cooperative horizon.
    /// Takes an independent fresh time sample — it does not rely on the
    /// loop's once-per-cycle cached clock.
    #[must_use]
    pub fn should_yield(&self) -> bool {
        tpc_clock::now_nanos_since(self.epoch) > self.horizon_nanos
    }
}

/// A task queue's run-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Neither `local` nor `global` holds work.
    Blocked,
    /// Present in the task-queue scheduler's runnable set (or currently
    /// active).
    Running,
}

/// A schedulable unit: its own FIFO of tasks, a fairness weight, and
/// accounting fields.
#[derive(Debug)]
pub struct TaskQueue {
    name: String,
    shares: u32,
    run_state: RunState,
    local: RingQueue<Task>,
    global: Option<(ConcurrentSender<Task>, ConcurrentReceiver<Task>)>,
    /// Virtual runtime, nanoseconds; monotonically increasing (CFS only —
    /// the FCFS scheduler never reads it).
    pub vruntime: u64,
    /// Sum of CPU time this queue has consumed, nanoseconds.
    pub actual_runtime_nanos: u64,
    /// How many tasks to run between `now()` samples inside this queue's
    /// slice.
    pub clock_sample_interval: u32,
    /// Number of times this queue has transitioned to BLOCKED.
    pub blocked_count: u64,
    /// Intrusive blocked-concurrent list links, as arena handles — plain
    /// indices, never refcounted.
    pub prev: Option<crate::arena::QueueHandle>,
    pub next: Option<crate::arena::QueueHandle>,
}

impl TaskQueue {
    /// Creates a new queue with a purely local FIFO (no cross-thread
    /// ingress).
    #[must_use]
    pub fn new_local(name: impl Into<String>, shares: u32, local_capacity: usize) -> Self {
        Self {
            name: name.into(),
            shares,
            run_state: RunState::Blocked,
            local: RingQueue::new(local_capacity),
            global: None,
            vruntime: 0,
            actual_runtime_nanos: 0,
            clock_sample_interval: 16,
            blocked_count: 0,
            prev: None,
            next: None,
        }
    }

    /// Creates a new queue that additionally accepts cross-thread
    /// (`offerGlobal`) submissions, bounded at `concurrent_capacity`.
    #[must_use]
    pub fn new_with_global(
        name: impl Into<String>,
        shares: u32,
        local_capacity: usize,
        concurrent_capacity: usize,
    ) -> Self {
        let mut queue = Self::new_local(name, shares, local_capacity);
        queue.global = Some(tpc_channel::concurrent::bounded(concurrent_capacity));
        queue
    }

    /// Queue name, for logging/metrics labels.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fairness weight, must stay positive for the lifetime of the queue.
    #[must_use]
    pub fn shares(&self) -> u32 {
        self.shares
    }

    /// Current run-state.
    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// A clone of the sender half, for handing to other threads so they
    /// can `offerGlobal`. `None` if this queue has no concurrent ingress.
    #[must_use]
    pub fn global_sender(&self) -> Option<ConcurrentSender<Task>> {
        self.global.as_ref().map(|(tx, _)| tx.clone())
    }

    /// Callable only by the owning loop thread. Enqueues `task` into the
    /// local FIFO. Returns `true` if the queue transitioned BLOCKED ->
    /// RUNNING as a result (the caller must then enqueue this queue's
    /// handle into the task-queue scheduler). Returns `Err(task)` if the
    /// local queue is full.
    pub fn offer_local(&mut self, task: Task) -> Result<bool, Task> {
        let was_blocked = self.run_state == RunState::Blocked;
        self.local.offer(task)?;
        if was_blocked {
            self.run_state = RunState::Running;
        }
        Ok(was_blocked)
    }

    /// Callable by any thread, only present when this queue has a global
    /// queue. The caller must invoke the loop's `wakeup()` afterwards; this
    /// method alone does not flip `run_state` because a cross-thread caller
    /// cannot observe or mutate loop-thread-owned state — the loop reaps
    /// the transition on its next cycle.
    pub fn offer_global(&self, task: Task) -> Result<(), tpc_channel::SendError<Task>> {
        match &self.global {
            Some((tx, _)) => tx.offer(task),
            None => Err(tpc_channel::SendError::Closed(task)),
        }
    }

    /// `true` when this queue has a concurrent (global) queue with pending
    /// work — used by the loop's blocked-concurrent reaping pass.
    #[must_use]
    pub fn has_pending_global(&self) -> bool {
        self.global
            .as_ref()
            .is_some_and(|(_, rx)| !rx.is_empty())
    }

    /// Pulls one task, preferring local then global. Returns `None` if
    /// both are empty.
    pub fn next(&mut self) -> Option<Task> {
        if let Some(task) = self.local.poll() {
            return Some(task);
        }
        self.global.as_ref().and_then(|(_, rx)| rx.try_recv().ok())
    }

    /// `true` when both the local and global queues are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.global.as_ref().is_none_or(|(_, rx)| rx.is_empty())
    }

    /// Transitions this queue to BLOCKED (called by the loop once it has
    /// drained both queues and the scheduler has yielded it).
    pub fn mark_blocked(&mut self) {
        self.run_state = RunState::Blocked;
        self.blocked_count += 1;
    }

    /// Transitions this queue to RUNNING (called when the loop reaps it
    /// off the blocked-concurrent list, or re-enqueues it).
    pub fn mark_running(&mut self) {
        self.run_state = RunState::Running;
    }

    /// `true` if this queue was constructed with a global (concurrent)
    /// queue.
    #[must_use]
    pub fn has_global(&self) -> bool {
        self.global.is_some()
    }
}
