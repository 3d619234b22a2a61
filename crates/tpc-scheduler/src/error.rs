// SPDX-License-Identifier: Apache-2.0

//! Errors for the scheduler crate.

/// Errors the scheduler surfaces. Bounded-queue rejections are reported as
/// plain booleans at the call sites instead; this enum covers the cases
/// that are genuinely exceptional.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A deadline task referenced a task-queue handle that does not exist
    /// in the caller's arena.
    #[error("unknown task queue handle")]
    UnknownQueue,

    /// An operation that requires an active queue was called with none
    /// active (a scheduler/engine bug, not a runtime condition).
    #[error("no active task queue")]
    NoActiveQueue,
}
