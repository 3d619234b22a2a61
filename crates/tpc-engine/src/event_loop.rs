// SPDX-License-Identifier: Apache-2.0

//! One worker's event loop: the run-cycle described by steps 1-7 — clock
//! sample, deadline tick, reap concurrent producers, pick active queue,
//! run its time slice, account, repeat.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tpc_channel::{ConcurrentSender, SendError};
use tpc_clock::Clock;
use tpc_config::{EngineConfig, EventLoopType, SchedulerKind};
use tpc_io::{EdgeTriggeredBackend, IoBackend, LoopWaker, ReadinessBackend};
#[cfg(target_os = "linux")]
use tpc_io::RingBackend;
use tpc_scheduler::cfs::REFERENCE_SHARES;
use tpc_scheduler::{
    CfsScheduler, DeadlineScheduler, FcfsScheduler, Periodicity, QueueHandle, Task, TaskContext,
    TaskQueue, TaskQueueArena, TaskQueueScheduler,
};
use tpc_telemetry::EngineMetrics;

use crate::error::EngineError;
use crate::stall::{LoggingStallHandler, StallEvent, StallHandler};
use crate::thread_task::panic_message;

const IO_EVENTS_CAPACITY: usize = 256;
const RING_ENTRIES: u32 = 256;

/// What a single run-cycle did — whether the loop should keep iterating or
/// is clear to exit (stop requested and no more work left).
pub(crate) enum CycleOutcome {
    Continue,
    Stop,
}

/// One worker's complete owned state: its task queues, its scheduler, its
/// deadline heap, and its I/O back-end. Never shared; only `wakeup_needed`
/// and the shared stop flag cross a thread boundary.
pub struct EventLoop {
    name: String,
    clock: Clock,
    arena: TaskQueueArena,
    scheduler: Box<dyn TaskQueueScheduler + Send>,
    deadline_scheduler: DeadlineScheduler,
    io_backend: Box<dyn IoBackend + Send>,
    default_queue: QueueHandle,
    blocked_concurrent_head: Option<QueueHandle>,
    /// Queues whose last `scheduler.enqueue` was rejected for lack of run
    /// queue capacity; retried once per cycle until accepted.
    pending_runnable: VecDeque<QueueHandle>,
    min_granularity_nanos: u64,
    stall_threshold_nanos: u64,
    io_interval_nanos: u64,
    io_deadline_nanos: u64,
    spin: bool,
    wakeup_needed: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    metrics: Arc<EngineMetrics>,
    stall_handler: Box<dyn StallHandler>,
    schedule_receiver: tpc_channel::ConcurrentReceiver<ScheduleRequest>,
}

/// A cross-thread request to schedule a deadline task into a loop's
/// default queue, queued up for the owning loop thread to apply — the
/// deadline heap itself is loop-owned and never touched off-thread.
pub struct ScheduleRequest {
    pub delay_nanos: u64,
    pub periodicity: Periodicity,
    pub make_task: Box<dyn Fn() -> Task + Send + 'static>,
}

/// Everything an external ([`crate::engine::Engine`]-held) handle needs to
/// reach a loop without touching its loop-thread-only state.
pub struct LoopIngress {
    pub default_queue_sender: ConcurrentSender<Task>,
    pub schedule_sender: ConcurrentSender<ScheduleRequest>,
    pub wakeup_needed: Arc<AtomicBool>,
    pub waker: LoopWaker,
    /// Set once this loop observes an unrecoverable I/O back-end failure.
    /// The loop terminates itself; this flag is how the engine notices.
    pub failed: Arc<AtomicBool>,
}

impl EventLoop {
    /// Builds a loop's full owned state. Must be called on the thread that
    /// will run it — the I/O back-end and scheduler are constructed here,
    /// not moved in, since neither is required to be `Send`.
    pub fn new(
        name: impl Into<String>,
        config: &EngineConfig,
        stop: Arc<AtomicBool>,
        metrics: Arc<EngineMetrics>,
    ) -> Result<(Self, LoopIngress), EngineError> {
        let name = name.into();
        let mut arena = TaskQueueArena::new();
        let default_queue = arena.insert(TaskQueue::new_with_global(
            "default",
            REFERENCE_SHARES,
            config.local_task_queue_capacity,
            config.concurrent_task_queue_capacity,
        ));
        let default_queue_sender = arena
            .get(default_queue)
            .global_sender()
            .expect("default queue always has a global channel");

        let io_backend: Box<dyn IoBackend + Send> = match config.eventloop_type {
            EventLoopType::Readiness => {
                Box::new(ReadinessBackend::new(IO_EVENTS_CAPACITY).map_err(|source| {
                    EngineError::BackendFailure {
                        loop_id: name.clone(),
                        source,
                    }
                })?)
            }
            EventLoopType::EdgeTriggered => {
                Box::new(EdgeTriggeredBackend::new(IO_EVENTS_CAPACITY).map_err(|source| {
                    EngineError::BackendFailure {
                        loop_id: name.clone(),
                        source,
                    }
                })?)
            }
            EventLoopType::Ring => {
                #[cfg(target_os = "linux")]
                {
                    Box::new(RingBackend::new(RING_ENTRIES).map_err(|source| {
                        EngineError::BackendFailure {
                            loop_id: name.clone(),
                            source,
                        }
                    })?)
                }
                #[cfg(not(target_os = "linux"))]
                {
                    return Err(EngineError::IllegalState {
                        message: "ring event loop type is only available on linux".to_string(),
                    });
                }
            }
        };
        let waker = io_backend.waker();

        let min_granularity_nanos = config.min_granularity.as_nanos().min(u128::from(u64::MAX)) as u64;
        let target_latency_nanos = config.target_latency.as_nanos().min(u128::from(u64::MAX)) as u64;
        let scheduler: Box<dyn TaskQueueScheduler + Send> = match config.scheduler {
            SchedulerKind::Fcfs => Box::new(FcfsScheduler::with_granularity(
                min_granularity_nanos,
                target_latency_nanos,
                config.run_queue_capacity,
            )),
            SchedulerKind::Cfs => Box::new(CfsScheduler::with_granularity(
                min_granularity_nanos,
                target_latency_nanos,
                config.run_queue_capacity,
            )),
        };

        let wakeup_needed = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let (schedule_sender, schedule_receiver) =
            tpc_channel::concurrent::bounded(config.deadline_run_queue_capacity);
        let ingress = LoopIngress {
            default_queue_sender,
            schedule_sender,
            wakeup_needed: wakeup_needed.clone(),
            waker: waker.clone(),
            failed: failed.clone(),
        };

        let event_loop = Self {
            name,
            clock: Clock::new(),
            arena,
            scheduler,
            deadline_scheduler: DeadlineScheduler::new(config.deadline_run_queue_capacity),
            io_backend,
            default_queue,
            blocked_concurrent_head: None,
            pending_runnable: VecDeque::new(),
            min_granularity_nanos,
            stall_threshold_nanos: config.stall_threshold.as_nanos().min(u128::from(u64::MAX)) as u64,
            io_interval_nanos: config.io_interval.as_nanos().min(u128::from(u64::MAX)) as u64,
            io_deadline_nanos: 0,
            spin: config.spin,
            wakeup_needed,
            stop,
            failed,
            metrics,
            stall_handler: Box::new(LoggingStallHandler),
            schedule_receiver,
        };
        Ok((event_loop, ingress))
    }

    /// The default task queue every loop carries, used for cross-thread
    /// submissions that don't target a specific queue.
    #[must_use]
    pub fn default_queue(&self) -> QueueHandle {
        self.default_queue
    }

    /// Loop-thread-only submission into an arbitrary queue's local FIFO.
    /// Returns `false` if the queue is at capacity.
    pub fn offer_local(&mut self, handle: QueueHandle, task: Task) -> bool {
        match self.arena.get_mut(handle).offer_local(task) {
            Ok(became_runnable) => {
                if became_runnable {
                    self.try_enqueue(handle);
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Attempts to move `handle` into the scheduler's runnable set now. If
    /// the run queue is at capacity, parks it on a retry list instead of
    /// dropping it — its run-state is already `Running`, so losing it here
    /// would strand it outside the scheduler forever.
    fn try_enqueue(&mut self, handle: QueueHandle) {
        if !self.scheduler.enqueue(handle, &self.arena) {
            self.pending_runnable.push_back(handle);
        }
    }

    /// Retries every queue parked by [`Self::try_enqueue`], once each, so a
    /// queue that lost out to a full run queue gets another chance on the
    /// next cycle rather than waiting for new work to re-trigger it.
    fn retry_pending_runnable(&mut self) {
        for _ in 0..self.pending_runnable.len() {
            let Some(handle) = self.pending_runnable.pop_front() else {
                break;
            };
            self.try_enqueue(handle);
        }
    }

    /// Registers a new task queue with the given fairness weight, returning
    /// its handle. Callable only from the loop thread (arena mutation).
    pub fn create_queue(&mut self, name: impl Into<String>, shares: u32, local_capacity: usize) -> QueueHandle {
        self.arena.insert(TaskQueue::new_local(name, shares, local_capacity))
    }

    /// Schedules a one-shot/periodic deadline task targeting `handle`.
    /// Loop-thread-only (the deadline heap is not `Send`).
    pub fn schedule(
        &mut self,
        delay_nanos: u64,
        target: QueueHandle,
        periodicity: Periodicity,
        make_task: impl Fn() -> Task + Send + 'static,
    ) -> bool {
        let deadline = tpc_clock::saturating_deadline(self.clock.cached(), delay_nanos);
        self.deadline_scheduler
            .offer(deadline, target, periodicity, make_task)
            .is_ok()
    }

    fn link_blocked_concurrent(&mut self, handle: QueueHandle) {
        self.arena.get_mut(handle).next = self.blocked_concurrent_head;
        self.blocked_concurrent_head = Some(handle);
    }

    /// Step 3: walk the blocked-concurrent list, reaping any queue whose
    /// global channel has gone non-empty back into the scheduler.
    fn reap_concurrent_producers(&mut self) {
        let mut still_blocked = None;
        let mut cursor = self.blocked_concurrent_head.take();
        while let Some(handle) = cursor {
            let next = self.arena.get(handle).next;
            if self.arena.get(handle).has_pending_global() {
                self.arena.get_mut(handle).mark_running();
                self.arena.get_mut(handle).next = None;
                self.try_enqueue(handle);
            } else {
                self.arena.get_mut(handle).next = still_blocked;
                still_blocked = Some(handle);
            }
            cursor = next;
        }
        self.blocked_concurrent_head = still_blocked;
    }

    /// Marks this loop's I/O back-end as unrecoverably failed: the engine
    /// observes this via its own handle to the same flag and treats the
    /// loop as terminated once its thread joins, while the rest of the
    /// engine keeps running.
    fn fail(&mut self, source: tpc_io::IoError) {
        tracing::error!(loop_id = %self.name, error = %source, "I/O back-end failure; terminating loop");
        self.failed.store(true, Ordering::Release);
    }

    fn maybe_tick_io(&mut self, now: u64, blocking: bool) {
        let timeout = if blocking { None } else { Some(Duration::ZERO) };
        if let Err(source) = self.io_backend.poll(timeout) {
            self.fail(source);
        }
        self.io_deadline_nanos = tpc_clock::saturating_deadline(now, self.io_interval_nanos);
    }

    /// Blocks (or, in spin mode, non-blocking-polls) until I/O activity,
    /// the computed deadline, or an external `wake()`.
    fn park(&mut self, timeout: Option<Duration>) {
        if self.spin {
            if let Err(source) = self.io_backend.poll(Some(Duration::ZERO)) {
                self.fail(source);
            }
            return;
        }
        self.wakeup_needed.store(true, Ordering::Release);
        if let Err(source) = self.io_backend.poll(timeout) {
            self.fail(source);
        }
        self.wakeup_needed.store(false, Ordering::Release);
    }

    /// Runs exactly one pass of the event loop (spec.md §4.7 steps 1-6).
    pub(crate) fn run_cycle(&mut self) -> CycleOutcome {
        // Checked unconditionally once per cycle, regardless of which
        // branch below ends up picking (or not picking) an active queue --
        // a loop with continuously runnable work must still observe `stop`
        // and exit, not just one that happens to go idle.
        if self.stop.load(Ordering::Acquire) || self.failed.load(Ordering::Acquire) {
            return CycleOutcome::Stop;
        }

        // 1. Clock sample.
        let now = self.clock.sample();

        // Drain cross-thread schedule requests into the (loop-owned)
        // deadline heap before ticking it.
        while let Ok(request) = self.schedule_receiver.try_recv() {
            let deadline = tpc_clock::saturating_deadline(now, request.delay_nanos);
            if self
                .deadline_scheduler
                .offer(deadline, self.default_queue, request.periodicity, request.make_task)
                .is_err()
            {
                tracing::warn!(loop_id = %self.name, "dropped cross-thread schedule request: deadline heap at capacity");
            }
        }

        // Retry any queue a previous cycle's full run queue turned away.
        self.retry_pending_runnable();

        // 2. Deadline tick.
        for handle in self.deadline_scheduler.tick(now, &mut self.arena) {
            self.try_enqueue(handle);
        }

        // 3. Reap concurrent producers.
        self.reap_concurrent_producers();

        // 4. Pick active queue.
        let Some(active) = self.scheduler.pick_next(&self.arena) else {
            let timeout = match self.deadline_scheduler.earliest_deadline_nanos() {
                Some(deadline) => Some(Duration::from_nanos(deadline.saturating_sub(now))),
                None => None,
            };
            self.park(timeout);
            if self.failed.load(Ordering::Acquire) {
                return CycleOutcome::Stop;
            }
            return CycleOutcome::Continue;
        };

        // 5. Time-slice loop.
        let slice = self.scheduler.time_slice_nanos_active(&self.arena);
        let queue_deadline = tpc_clock::saturating_deadline(now, slice);
        let mut now = now;
        let mut tasks_run_this_slice: u32 = 0;
        let mut total_slice_nanos: u64 = 0;
        let mut drained = false;

        loop {
            let Some(task) = self.arena.get_mut(active).next() else {
                drained = true;
                break;
            };
            let task_start_nanos = now;
            let ctx = TaskContext::new(self.clock.epoch(), task_start_nanos, self.min_granularity_nanos);
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task(&ctx)));
            if let Err(panic) = outcome {
                tracing::error!(
                    loop_id = %self.name,
                    queue = self.arena.get(active).name(),
                    panic = %panic_message(&*panic),
                    "task panicked; loop continues"
                );
            }

            tasks_run_this_slice += 1;
            let clock_sample_interval = self.arena.get(active).clock_sample_interval;
            if tasks_run_this_slice % clock_sample_interval.max(1) == 0 {
                now = self.clock.sample();
            }
            let task_exec_nanos = now.saturating_sub(task_start_nanos).max(1);
            total_slice_nanos = total_slice_nanos.saturating_add(task_exec_nanos);
            self.metrics.record_task_run(&self.name);

            if task_exec_nanos > self.stall_threshold_nanos {
                self.metrics.record_stall(&self.name);
                self.stall_handler.on_stall(&StallEvent {
                    loop_id: &self.name,
                    queue: self.arena.get(active).name(),
                    start_nanos: task_start_nanos,
                    exec_nanos: task_exec_nanos,
                });
            }

            if now >= self.io_deadline_nanos {
                self.maybe_tick_io(now, false);
                if self.failed.load(Ordering::Acquire) {
                    break;
                }
            }

            if now > queue_deadline {
                break;
            }
        }

        if total_slice_nanos > slice {
            self.metrics.record_slice_overrun(&self.name);
        }

        // 6. Account & disposition.
        self.scheduler.update_active(&mut self.arena, total_slice_nanos);
        self.metrics.set_queue_vruntime(&self.name, self.arena.get(active).name(), self.arena.get(active).vruntime);
        self.metrics.set_queue_actual_runtime(
            &self.name,
            self.arena.get(active).name(),
            self.arena.get(active).actual_runtime_nanos,
        );

        if drained && self.arena.get(active).is_empty() {
            self.scheduler.dequeue_active();
            self.arena.get_mut(active).mark_blocked();
            if self.arena.get(active).has_global() {
                self.link_blocked_concurrent(active);
            }
        } else {
            self.scheduler.yield_active(&mut self.arena);
        }

        if self.failed.load(Ordering::Acquire) {
            return CycleOutcome::Stop;
        }

        CycleOutcome::Continue
    }

    /// Runs cycles until `stop` is observed with no work left.
    pub(crate) fn run(mut self) {
        loop {
            match self.run_cycle() {
                CycleOutcome::Continue => {}
                CycleOutcome::Stop => break,
            }
        }
    }
}

/// Wakes a parked loop exactly once on the `true -> false` transition of
/// its `wakeupNeeded` flag (spec.md §8 invariant 9) — a no-op if the loop
/// wasn't parked or another producer already flipped it.
pub fn wake_if_needed(wakeup_needed: &AtomicBool, waker: &LoopWaker) {
    if wakeup_needed
        .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        let _ = waker.wake();
    }
}

/// Cross-thread submission into a queue's global channel, plus the wakeup
/// described by [`wake_if_needed`].
pub fn offer_global_and_wake(
    sender: &ConcurrentSender<Task>,
    wakeup_needed: &AtomicBool,
    waker: &LoopWaker,
    task: Task,
) -> Result<(), SendError<Task>> {
    sender.offer(task)?;
    wake_if_needed(wakeup_needed, waker);
    Ok(())
}
