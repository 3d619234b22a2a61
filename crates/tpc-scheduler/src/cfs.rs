// SPDX-License-Identifier: Apache-2.0

//! Weighted-fair task-queue scheduler modelled on the Completely Fair
//! Scheduler: queues are ordered by virtual runtime, and a queue's slice
//! scales with its share of the total runnable weight.

use crate::arena::{QueueHandle, TaskQueueArena};
use crate::fcfs::{DEFAULT_MIN_GRANULARITY_NANOS, DEFAULT_RUN_QUEUE_CAPACITY, DEFAULT_TARGET_LATENCY_NANOS};
use crate::TaskQueueScheduler;
use std::collections::BTreeMap;

/// The shares value a queue with "normal" weight is defined to have.
/// `vruntime` accrues in units normalized against this reference.
pub const REFERENCE_SHARES: u32 = 1024;

/// How far behind the current minimum vruntime a re-entering queue is
/// allowed to start, in nanoseconds. Prevents a queue that was blocked for
/// a long time from being starved of CPU immediately upon waking, while
/// still not letting it leapfrog everyone else with a stale (very low)
/// vruntime.
pub const VRUNTIME_REENTRY_LEEWAY_NANOS: u64 = 20_000_000;

/// Ordered-set scheduler keyed by `(vruntime, insertion sequence)`. The
/// `BTreeMap` key tuple gives deterministic FIFO tie-breaking among equal
/// vruntimes while keeping `pick_next` an O(log n) "take the minimum" op.
#[derive(Debug)]
pub struct CfsScheduler {
    runnable: BTreeMap<(u64, u64), QueueHandle>,
    active: Option<(QueueHandle, u64)>,
    next_sequence: u64,
    min_granularity_nanos: u64,
    target_latency_nanos: u64,
    min_vruntime: u64,
    capacity: usize,
}

impl CfsScheduler {
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
            runnable: BTreeMap::new(),
            active: None,
            next_sequence: 0,
            min_granularity_nanos,
            target_latency_nanos,
            min_vruntime: 0,
            capacity,
        }
    }

    fn total_shares(&self, arena: &TaskQueueArena) -> u64 {
        let running: u64 = self
            .runnable
            .values()
            .chain(self.active.as_ref().map(|(h, _)| h))
            .map(|h| u64::from(arena.get(*h).shares()))
            .sum();
        running.max(1)
    }
}

impl Default for CfsScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueueScheduler for CfsScheduler {
    fn pick_next(&mut self, _arena: &TaskQueueArena) -> Option<QueueHandle> {
        if let Some((handle, _)) = self.active {
            return Some(handle);
        }
        let (&key, &handle) = self.runnable.iter().next()?;
        self.runnable.remove(&key);
        self.min_vruntime = self.min_vruntime.max(key.0);
        self.active = Some((handle, key.0));
        Some(handle)
    }

    fn enqueue(&mut self, handle: QueueHandle, arena: &TaskQueueArena) -> bool {
        if self.runnable.len() >= self.capacity {
            return false;
        }
        let floor = self.min_vruntime.saturating_sub(VRUNTIME_REENTRY_LEEWAY_NANOS);
        let queue = arena.get(handle);
        let vruntime = queue.vruntime.max(floor);
        let seq = self.next_sequence;
        self.next_sequence += 1;
        self.runnable.insert((vruntime, seq), handle);
        true
    }

    fn dequeue_active(&mut self) -> Option<QueueHandle> {
        self.active.take().map(|(handle, _)| handle)
    }

    fn yield_active(&mut self, arena: &mut TaskQueueArena) {
        if let Some((handle, _)) = self.active.take() {
            let vruntime = arena.get(handle).vruntime;
            self.min_vruntime = self.min_vruntime.max(vruntime);
            let seq = self.next_sequence;
            self.next_sequence += 1;
            self.runnable.insert((vruntime, seq), handle);
        }
    }

    fn update_active(&mut self, arena: &mut TaskQueueArena, cpu_time_nanos: u64) {
        let Some((handle, _)) = self.active else {
            return;
        };
        let queue = arena.get_mut(handle);
        queue.actual_runtime_nanos += cpu_time_nanos;
        let shares = u64::from(queue.shares()).max(1);
        let delta = (u128::from(cpu_time_nanos) * u128::from(REFERENCE_SHARES) / u128::from(shares))
            .min(u128::from(u64::MAX)) as u64;
        queue.vruntime = queue.vruntime.saturating_add(delta);
    }

    fn time_slice_nanos_active(&self, arena: &TaskQueueArena) -> u64 {
        let Some((handle, _)) = self.active else {
            return self.min_granularity_nanos;
        };
        let shares = u64::from(arena.get(handle).shares()).max(1);
        let total = self.total_shares(arena);
        let fair_share = u128::from(self.target_latency_nanos) * u128::from(shares)
            / u128::from(total);
        self.min_granularity_nanos
            .max(fair_share.min(u128::from(u64::MAX)) as u64)
    }

    fn nr_running(&self) -> usize {
        self.runnable.len() + usize::from(self.active.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_queue::TaskQueue;

    fn arena_with(shares: &[u32]) -> (TaskQueueArena, Vec<QueueHandle>) {
        let mut arena = TaskQueueArena::new();
        let handles = shares
            .iter()
            .map(|&s| arena.insert(TaskQueue::new_local("q", s, 8)))
            .collect();
        (arena, handles)
    }

    #[test]
    fn lowest_vruntime_runs_first() {
        let (mut arena, handles) = arena_with(&[1024, 1024]);
        arena.get_mut(handles[0]).vruntime = 500;
        arena.get_mut(handles[1]).vruntime = 100;
        let mut sched = CfsScheduler::new();
        sched.enqueue(handles[0], &arena);
        sched.enqueue(handles[1], &arena);
        assert_eq!(sched.pick_next(&arena), Some(handles[1]));
    }

    #[test]
    fn equal_vruntime_breaks_tie_fifo() {
        let (mut arena, handles) = arena_with(&[1024, 1024]);
        arena.get_mut(handles[0]).vruntime = 0;
        arena.get_mut(handles[1]).vruntime = 0;
        let mut sched = CfsScheduler::new();
        sched.enqueue(handles[0], &arena);
        sched.enqueue(handles[1], &arena);
        assert_eq!(sched.pick_next(&arena), Some(handles[0]));
    }

    #[test]
    fn update_active_advances_vruntime_inversely_to_shares() {
        let (mut arena, handles) = arena_with(&[REFERENCE_SHARES, REFERENCE_SHARES * 2]);
        let mut sched = CfsScheduler::new();
        sched.enqueue(handles[0], &arena);
        sched.pick_next(&arena);
        sched.update_active(&mut arena, 1_000_000);
        assert_eq!(arena.get(handles[0]).vruntime, 1_000_000);

        sched.dequeue_active();
        sched.enqueue(handles[1], &arena);
        sched.pick_next(&arena);
        sched.update_active(&mut arena, 1_000_000);
        assert_eq!(arena.get(handles[1]).vruntime, 500_000);
    }

    #[test]
    fn time_slice_scales_with_share_of_total() {
        let (mut arena, handles) = arena_with(&[REFERENCE_SHARES, REFERENCE_SHARES * 3]);
        let mut sched = CfsScheduler::with_granularity(1_000, 40_000, DEFAULT_RUN_QUEUE_CAPACITY);
        sched.enqueue(handles[0], &arena);
        sched.enqueue(handles[1], &arena);
        sched.pick_next(&arena);
        // active queue has 1/4 of total shares (1024 of 4096).
        assert_eq!(sched.time_slice_nanos_active(&arena), 10_000);
    }

    #[test]
    fn reentry_after_long_block_is_floored_not_reset() {
        let (mut arena, handles) = arena_with(&[1024, 1024]);
        arena.get_mut(handles[0]).vruntime = 100_000_000;
        let mut sched = CfsScheduler::new();
        sched.enqueue(handles[0], &arena);
        sched.pick_next(&arena);
        sched.update_active(&mut arena, 1);
        sched.dequeue_active();

        // queue reenters with a vruntime far below the observed minimum.
        arena.get_mut(handles[1]).vruntime = 0;
        sched.enqueue(handles[1], &arena);
        let (&(key, _), _) = sched
            .runnable
            .iter()
            .find(|(_, &h)| h == handles[1])
            .unwrap();
        assert!(key >= 100_000_000u64.saturating_sub(VRUNTIME_REENTRY_LEEWAY_NANOS));
    }

    #[test]
    fn enqueue_rejects_once_run_queue_is_full() {
        let (arena, handles) = arena_with(&[1024, 1024, 1024]);
        let mut sched = CfsScheduler::with_granularity(1_000, 20_000, 2);
        assert!(sched.enqueue(handles[0], &arena));
        assert!(sched.enqueue(handles[1], &arena));
        assert!(!sched.enqueue(handles[2], &arena));
        assert_eq!(sched.nr_running(), 2);
    }
}
