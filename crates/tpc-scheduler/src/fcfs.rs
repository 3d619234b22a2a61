// SPDX-License-Identifier: Apache-2.0

//! First-come-first-served task-queue scheduler: a plain circular run
//! queue. Every runnable queue gets an equal-length slice, independent of
//! its shares.

use crate::arena::{QueueHandle, TaskQueueArena};
use crate::TaskQueueScheduler;
use std::collections::VecDeque;

/// Lower bound on the time slice handed to any queue, regardless of how
/// many queues are currently runnable.
pub const DEFAULT_MIN_GRANULARITY_NANOS: u64 = 1_000_000;

/// Nominal total latency a full rotation through every runnable queue
/// should take; divided evenly among them.
pub const DEFAULT_TARGET_LATENCY_NANOS: u64 = 20_000_000;

/// Default cap on the number of queues this scheduler holds runnable at
/// once, used when no explicit capacity is given.
pub const DEFAULT_RUN_QUEUE_CAPACITY: usize = 256;

/// Circular run queue over task-queue handles. The head of `runnable` is
/// the queue selected by the last [`pick_next`](TaskQueueScheduler::pick_next)
/// call, held there (not removed) until [`dequeue_active`] or
/// [`yield_active`] settles it.
#[derive(Debug)]
pub struct FcfsScheduler {
    runnable: VecDeque<QueueHandle>,
    active: Option<QueueHandle>,
    min_granularity_nanos: u64,
    target_latency_nanos: u64,
    capacity: usize,
}

impl FcfsScheduler {
    /// Creates an empty scheduler using the default granularity/latency/
    /// capacity constants.
    #[must_use]
    pub fn new() -> Self {
        Self::with_granularity(
            DEFAULT_MIN_GRANULARITY_NANOS,
            DEFAULT_TARGET_LATENCY_NANOS,
            DEFAULT_RUN_QUEUE_CAPACITY,
        )
    }

    /// Creates an empty scheduler with explicit granularity/latency
    /// constants and run-queue capacity. `capacity` bounds the runnable
    /// set only, not the active slot.
    #[must_use]
    pub fn with_granularity(min_granularity_nanos: u64, target_latency_nanos: u64, capacity: usize) -> Self {
        Self {
            runnable: VecDeque::new(),
            active: None,
            min_granularity_nanos,
            target_latency_nanos,
            capacity,
        }
    }
}

impl Default for FcfsScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueueScheduler for FcfsScheduler {
    fn pick_next(&mut self, _arena: &TaskQueueArena) -> Option<QueueHandle> {
        if self.active.is_some() {
            return self.active;
        }
        let handle = self.runnable.pop_front()?;
        self.active = Some(handle);
        Some(handle)
    }

    fn enqueue(&mut self, handle: QueueHandle, _arena: &TaskQueueArena) -> bool {
        if self.runnable.len() >= self.capacity {
            return false;
        }
        self.runnable.push_back(handle);
        true
    }

    fn dequeue_active(&mut self) -> Option<QueueHandle> {
        self.active.take()
    }

    fn yield_active(&mut self, _arena: &mut TaskQueueArena) {
        if let Some(handle) = self.active.take() {
            self.runnable.push_back(handle);
        }
    }

    fn update_active(&mut self, arena: &mut TaskQueueArena, cpu_time_nanos: u64) {
        if let Some(handle) = self.active {
            arena.get_mut(handle).actual_runtime_nanos += cpu_time_nanos;
        }
    }

    fn time_slice_nanos_active(&self, _arena: &TaskQueueArena) -> u64 {
        let nr_running = self.nr_running().max(1) as u64;
        self.min_granularity_nanos
            .max(self.target_latency_nanos / nr_running)
    }

    fn nr_running(&self) -> usize {
        self.runnable.len() + usize::from(self.active.is_some())
    }
}
