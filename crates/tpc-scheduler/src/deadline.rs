// SPDX-License-Identifier: Apache-2.0

//! Deadline (timer) scheduler: a bounded min-heap of tasks keyed by
//! absolute deadline, supporting one-shot, fixed-delay, and fixed-rate
//! periodic firing. Dispatch hands a task into a target task queue by
//! handle, never runs it directly.

use crate::arena::{QueueHandle, TaskQueueArena};
use tpc_channel::BoundedPriorityQueue;
use tpc_clock::saturating_deadline;

/// Identifies a scheduled deadline task so it can be cancelled before it
/// fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeadlineTaskId(u64);

/// How a deadline task repeats after it first fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Periodicity {
    /// Fires exactly once.
    OneShot,
    /// Next deadline is `now + period` at the moment this firing
    /// completes — period measured from completion, so runs never
    /// overlap and a slow firing pushes later ones out.
    FixedDelay { period_nanos: u64 },
    /// Next deadline is `previous deadline + period`, independent of how
    /// long firing took — catches up by firing back-to-back (without
    /// sleeping) if a firing overran its period, rather than drifting.
    FixedRate { period_nanos: u64 },
}

/// An entry in the deadline scheduler: which task queue to deliver into,
/// the closure to enqueue there, its repeat policy, and whether it has
/// been cancelled.
pub struct DeadlineTask {
    id: DeadlineTaskId,
    target: QueueHandle,
    periodicity: Periodicity,
    cancelled: std::sync::Arc<std::sync::atomic::AtomicBool>,
    make_task: Box<dyn Fn() -> crate::task_queue::Task + Send>,
}

impl std::fmt::Debug for DeadlineTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineTask")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("periodicity", &self.periodicity)
            .finish_non_exhaustive()
    }
}

/// A handle that cancels its associated deadline task when told to. Kept
/// separate from [`DeadlineTaskId`] so cancellation doesn't need a lookup
/// into the scheduler itself — cancellation only needs to be observed
/// before the next dispatch, not applied synchronously.
#[derive(Debug, Clone)]
pub struct Cancellation(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl Cancellation {
    /// Marks the associated task cancelled. If it already fired, this has
    /// no effect; if it is periodic and currently pending, it will not
    /// fire again.
    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

/// Bounded min-heap of [`DeadlineTask`]s keyed by absolute nanosecond
/// deadline.
#[derive(Debug)]
pub struct DeadlineScheduler {
    heap: BoundedPriorityQueue<DeadlineTask>,
    next_id: u64,
}

impl DeadlineScheduler {
    /// Creates a scheduler that rejects offers once `capacity` tasks are
    /// pending.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BoundedPriorityQueue::new(capacity),
            next_id: 0,
        }
    }

    /// Schedules `make_task` to fire at `deadline_nanos`, delivering the
    /// task it produces into `target`'s local queue, repeating per
    /// `periodicity`. Returns the task's id and a handle that can cancel
    /// it, or gives back nothing but drops the closure if the scheduler
    /// is at capacity (`rejected`).
    pub fn offer(
        &mut self,
        deadline_nanos: u64,
        target: QueueHandle,
        periodicity: Periodicity,
        make_task: impl Fn() -> crate::task_queue::Task + Send + 'static,
    ) -> Result<(DeadlineTaskId, Cancellation), ()> {
        let id = DeadlineTaskId(self.next_id);
        self.next_id += 1;
        let cancelled = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let task = DeadlineTask {
            id,
            target,
            periodicity,
            cancelled: cancelled.clone(),
            make_task: Box::new(make_task),
        };
        self.heap
            .offer(deadline_nanos, task)
            .map(|()| (id, Cancellation(cancelled)))
            .map_err(|_| ())
    }

    /// Earliest pending deadline, used by the loop to bound its next
    /// `poll(timeout)` call.
    #[must_use]
    pub fn earliest_deadline_nanos(&self) -> Option<u64> {
        self.heap.earliest_deadline_nanos()
    }

    /// Dispatches every task whose deadline is `<= now_nanos`, delivering
    /// each into its target queue's local FIFO. A target whose local
    /// queue is full or whose handle has gone stale is logged and the
    /// firing is dropped rather than retried; a periodic task is still
    /// rescheduled regardless. Returns the handles that transitioned
    /// BLOCKED -> RUNNING as a result, so the caller can re-enqueue them
    /// into the active task-queue scheduler.
    pub fn tick(&mut self, now_nanos: u64, arena: &mut TaskQueueArena) -> Vec<QueueHandle> {
        let mut woken = Vec::new();
        while let Some(deadline) = self.heap.earliest_deadline_nanos() {
            if deadline > now_nanos {
                break;
            }
            let Some((_, mut task)) = self.heap.pop() else {
                break;
            };

            if task.cancelled.load(std::sync::atomic::Ordering::Relaxed) {
                continue;
            }

            if task.target.index() < arena.len() {
                let queue = arena.get_mut(task.target);
                match queue.offer_local((task.make_task)()) {
                    Ok(true) => woken.push(task.target),
                    Ok(false) => {}
                    Err(_) => {
                        tracing::warn!(
                            task_id = task.id.0,
                            queue = queue.name(),
                            "dropped deadline firing: local queue at capacity"
                        );
                    }
                }
            } else {
                tracing::warn!(task_id = task.id.0, "dropped deadline firing: target queue gone");
            }

            match &mut task.periodicity {
                Periodicity::OneShot => {}
                Periodicity::FixedDelay { period_nanos } => {
                    let next = saturating_deadline(now_nanos, *period_nanos);
                    if self.heap.offer(next, task).is_err() {
                        tracing::warn!("dropped periodic reschedule: scheduler at capacity");
                    }
                }
                Periodicity::FixedRate { period_nanos } => {
                    // No catch-up coalescing: always step from the deadline
                    // that just fired, even if the result is still <=
                    // now_nanos. A prolonged stall burst-fires — the
                    // enclosing while loop immediately pops it again next
                    // iteration — rather than silently dropping the backlog
                    // or collapsing it onto a single "now" firing.
                    let next = saturating_deadline(deadline, *period_nanos);
                    if self.heap.offer(next, task).is_err() {
                        tracing::warn!("dropped periodic reschedule: scheduler at capacity");
                    }
                }
            }
        }
        woken
    }

    /// Number of tasks currently pending.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// `true` if no tasks are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_queue::TaskQueue;

    fn arena_with_one_queue() -> (TaskQueueArena, QueueHandle) {
        let mut arena = TaskQueueArena::new();
        let handle = arena.insert(TaskQueue::new_local("q", 1024, 16));
        (arena, handle)
    }

    #[test]
    fn one_shot_fires_once_and_is_dropped() {
        let (mut arena, handle) = arena_with_one_queue();
        let mut sched = DeadlineScheduler::new(8);
        sched
            .offer(100, handle, Periodicity::OneShot, || Box::new(|_| {}))
            .unwrap();

        let woken = sched.tick(100, &mut arena);
        assert_eq!(woken, vec![handle]);
        assert!(sched.is_empty());
    }

    #[test]
    fn does_not_fire_before_deadline() {
        let (mut arena, handle) = arena_with_one_queue();
        let mut sched = DeadlineScheduler::new(8);
        sched
            .offer(1_000, handle, Periodicity::OneShot, || Box::new(|_| {}))
            .unwrap();

        assert!(sched.tick(999, &mut arena).is_empty());
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn fixed_rate_reschedules_from_previous_deadline() {
        let (mut arena, handle) = arena_with_one_queue();
        let mut sched = DeadlineScheduler::new(8);
        sched
            .offer(
                100,
                handle,
                Periodicity::FixedRate { period_nanos: 50 },
                || Box::new(|_| {}),
            )
            .unwrap();

        sched.tick(100, &mut arena);
        assert_eq!(sched.earliest_deadline_nanos(), Some(150));
    }

    #[test]
    fn fixed_rate_burst_fires_through_a_stall_without_coalescing() {
        let (mut arena, handle) = arena_with_one_queue();
        let mut sched = DeadlineScheduler::new(8);
        sched
            .offer(
                100,
                handle,
                Periodicity::FixedRate { period_nanos: 50 },
                || Box::new(|_| {}),
            )
            .unwrap();

        // A tick at 400 is 7 deadlines past (and including) the first one
        // -- 100, 150, 200, 250, 300, 350, 400, all <= 400 -- and every one
        // of them fires in this single tick call, not just the first.
        // `woken` only reports the BLOCKED->RUNNING transition (it fires
        // once, on the first delivery), but every firing still enqueues
        // its own task.
        let woken = sched.tick(400, &mut arena);
        assert_eq!(woken, vec![handle]);
        let mut fired = 0;
        while arena.get_mut(handle).next().is_some() {
            fired += 1;
        }
        assert_eq!(fired, 7);
        // Rescheduled strictly from the last fired deadline (400 + 50),
        // not clamped to `now`.
        assert_eq!(sched.earliest_deadline_nanos(), Some(450));
    }

    #[test]
    fn fixed_delay_reschedules_from_now() {
        let (mut arena, handle) = arena_with_one_queue();
        let mut sched = DeadlineScheduler::new(8);
        sched
            .offer(
                100,
                handle,
                Periodicity::FixedDelay { period_nanos: 50 },
                || Box::new(|_| {}),
            )
            .unwrap();

        // fires late, at 400 instead of 100.
        sched.tick(400, &mut arena);
        assert_eq!(sched.earliest_deadline_nanos(), Some(450));
    }

    #[test]
    fn cancelled_task_does_not_fire() {
        let (mut arena, handle) = arena_with_one_queue();
        let mut sched = DeadlineScheduler::new(8);
        let (_, cancellation) = sched
            .offer(100, handle, Periodicity::OneShot, || Box::new(|_| {}))
            .unwrap();
        cancellation.cancel();

        assert!(sched.tick(100, &mut arena).is_empty());
    }

    #[test]
    fn capacity_rejects_extra_offers() {
        let (_, handle) = arena_with_one_queue();
        let mut sched = DeadlineScheduler::new(1);
        sched
            .offer(100, handle, Periodicity::OneShot, || Box::new(|_| {}))
            .unwrap();
        assert!(sched
            .offer(200, handle, Periodicity::OneShot, || Box::new(|_| {}))
            .is_err());
    }
}
