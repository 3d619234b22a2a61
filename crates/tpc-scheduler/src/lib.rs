// SPDX-License-Identifier: Apache-2.0

//! Task queues, the two task-queue scheduler variants (FCFS and CFS), and
//! the deadline scheduler that dispatches timed tasks into them.

pub mod arena;
pub mod cfs;
pub mod deadline;
pub mod error;
pub mod fcfs;
pub mod task_queue;

pub use arena::{QueueHandle, TaskQueueArena};
pub use cfs::CfsScheduler;
pub use deadline::{DeadlineScheduler, DeadlineTask, DeadlineTaskId, Periodicity};
pub use error::SchedulerError;
pub use fcfs::FcfsScheduler;
pub use task_queue::{RunState, Task, TaskContext, TaskQueue};

/// Common interface both task-queue scheduler variants implement.
///
/// At most one queue is "active" between a call to [`pick_next`] and the
/// matching [`dequeue_active`]/[`yield_active`] call; the active queue must
/// be simultaneously absent from the runnable set the rest of the time.
///
/// [`pick_next`]: TaskQueueScheduler::pick_next
/// [`dequeue_active`]: TaskQueueScheduler::dequeue_active
/// [`yield_active`]: TaskQueueScheduler::yield_active
pub trait TaskQueueScheduler {
    /// Removes the next queue to run from the runnable set and holds it as
    /// "active". Returns `None` when nothing is runnable.
    fn pick_next(&mut self, arena: &TaskQueueArena) -> Option<QueueHandle>;

    /// Inserts a newly-runnable queue (one that was BLOCKED and just
    /// received work) into the runnable set. Returns `false` without
    /// inserting it if the run queue is at capacity — the caller is
    /// responsible for retrying or dropping the queue's pending work.
    fn enqueue(&mut self, handle: QueueHandle, arena: &TaskQueueArena) -> bool;

    /// Drops the active queue from scheduling entirely (it has no more
    /// work and becomes BLOCKED). Returns the handle that was active.
    fn dequeue_active(&mut self) -> Option<QueueHandle>;

    /// Reinserts the active queue into the runnable set (it still has
    /// work left after its slice expired).
    fn yield_active(&mut self, arena: &mut TaskQueueArena);

    /// Accounts `cpu_time_nanos` of CPU time against the active queue.
    fn update_active(&mut self, arena: &mut TaskQueueArena, cpu_time_nanos: u64);

    /// Time slice, in nanoseconds, granted to the active queue.
    fn time_slice_nanos_active(&self, arena: &TaskQueueArena) -> u64;

    /// Number of queues currently runnable (including the active one, if
    /// any).
    fn nr_running(&self) -> usize;
}
