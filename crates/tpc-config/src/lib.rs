// SPDX-License-Identifier: Apache-2.0

//! Engine configuration: the recognised option set, defaults, and
//! validation ahead of construction.

mod error;

pub use error::ConfigError;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which task-queue scheduler the engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// Plain circular run queue, equal slices.
    Fcfs,
    /// Weighted-fair, vruntime-ordered.
    Cfs,
}

/// Which I/O back-end an event loop drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventLoopType {
    /// Portable readiness-based selector.
    Readiness,
    /// Edge-triggered, one-shot rearm.
    EdgeTriggered,
    /// Submission/completion ring.
    Ring,
}

/// Per-loop CPU affinity: either unconstrained or pinned to one core id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadAffinity {
    /// No affinity is applied.
    Unconstrained,
    /// Pin the loop thread to this core id.
    Pinned(usize),
}

/// The full recognised configuration surface for an engine instance.
///
/// Deserializable from YAML via `serde_yaml`; durations are accepted in
/// human-readable form (`"500us"`, `"2ms"`) via `humantime_serde`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of event loops (and pinned CPUs, if affinity is set).
    pub eventloop_count: usize,
    /// Back-end driven by every loop.
    pub eventloop_type: EventLoopType,
    /// Busy-poll instead of parking.
    pub spin: bool,
    /// Task-queue scheduler variant.
    pub scheduler: SchedulerKind,
    /// Denominator for slice computation.
    #[serde(with = "humantime_serde")]
    pub target_latency: Duration,
    /// Minimum slice and per-task cooperative horizon.
    #[serde(with = "humantime_serde")]
    pub min_granularity: Duration,
    /// Capacity of the task-queue scheduler's runnable set.
    pub run_queue_capacity: usize,
    /// Capacity of the deadline heap.
    pub deadline_run_queue_capacity: usize,
    /// Threshold past which a single task's runtime is reported as a
    /// stall.
    #[serde(with = "humantime_serde")]
    pub stall_threshold: Duration,
    /// Maximum interval between intra-slice I/O ticks.
    #[serde(with = "humantime_serde")]
    pub io_interval: Duration,
    /// Per-loop CPU affinity, one entry per loop (or one entry applied to
    /// all loops if only one is given).
    pub thread_affinity: Vec<ThreadAffinity>,
    /// Capacity of each task queue's local (owner-thread) FIFO.
    pub local_task_queue_capacity: usize,
    /// Capacity of each task queue's optional concurrent (cross-thread)
    /// queue.
    pub concurrent_task_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            eventloop_count: 1,
            eventloop_type: EventLoopType::Readiness,
            spin: false,
            scheduler: SchedulerKind::Fcfs,
            target_latency: Duration::from_millis(20),
            min_granularity: Duration::from_micros(1_000),
            run_queue_capacity: 256,
            deadline_run_queue_capacity: 1_024,
            stall_threshold: Duration::from_millis(1),
            io_interval: Duration::from_micros(500),
            thread_affinity: Vec::new(),
            local_task_queue_capacity: 1_024,
            concurrent_task_queue_capacity: 1_024,
        }
    }
}

impl EngineConfig {
    /// Parses an `EngineConfig` from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects obviously-inconsistent option combinations before the
    /// engine is constructed from this config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.eventloop_count == 0 {
            return Err(ConfigError::Inconsistent {
                reason: "eventloop_count must be at least 1".into(),
            });
        }
        if self.min_granularity > self.target_latency {
            return Err(ConfigError::Inconsistent {
                reason: format!(
                    "min_granularity ({:?}) must not exceed target_latency ({:?})",
                    self.min_granularity, self.target_latency
                ),
            });
        }
        if self.run_queue_capacity == 0 {
            return Err(ConfigError::Inconsistent {
                reason: "run_queue_capacity must be at least 1".into(),
            });
        }
        if self.deadline_run_queue_capacity == 0 {
            return Err(ConfigError::Inconsistent {
                reason: "deadline_run_queue_capacity must be at least 1".into(),
            });
        }
        if self.local_task_queue_capacity == 0 {
            return Err(ConfigError::Inconsistent {
                reason: "local_task_queue_capacity must be at least 1".into(),
            });
        }
        if !self.thread_affinity.is_empty()
            && self.thread_affinity.len() != 1
            && self.thread_affinity.len() != self.eventloop_count
        {
            return Err(ConfigError::Inconsistent {
                reason: format!(
                    "thread_affinity has {} entries but eventloop_count is {}; provide exactly one entry (applied to all loops) or one per loop",
                    self.thread_affinity.len(),
                    self.eventloop_count
                ),
            });
        }
        Ok(())
    }

    /// Resolves the affinity to apply to loop index `loop_index`, given
    /// the (already-validated) `thread_affinity` list.
    #[must_use]
    pub fn affinity_for(&self, loop_index: usize) -> ThreadAffinity {
        match self.thread_affinity.as_slice() {
            [] => ThreadAffinity::Unconstrained,
            [single] => *single,
            many => many[loop_index],
        }
    }
}
