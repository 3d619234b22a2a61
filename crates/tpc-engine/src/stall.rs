// SPDX-License-Identifier: Apache-2.0

//! Stall detection: a single task whose observed runtime exceeds the
//! configured threshold is reported, never treated as an error.

/// One observed stall, handed to a [`StallHandler`].
#[derive(Debug, Clone)]
pub struct StallEvent<'a> {
    /// Name of the loop the stall occurred on.
    pub loop_id: &'a str,
    /// Name of the task queue the stalling task ran on.
    pub queue: &'a str,
    /// When the task started, nanoseconds since the loop's clock epoch.
    pub start_nanos: u64,
    /// Observed execution time, nanoseconds.
    pub exec_nanos: u64,
}

/// Receives stall notifications. Never called for anything but a single
/// task's overrun; never expected to panic.
pub trait StallHandler: Send {
    fn on_stall(&mut self, event: &StallEvent<'_>);
}

/// Default handler: logs at `warn` and otherwise does nothing.
#[derive(Debug, Default)]
pub struct LoggingStallHandler;

impl StallHandler for LoggingStallHandler {
    fn on_stall(&mut self, event: &StallEvent<'_>) {
        tracing::warn!(
            loop_id = event.loop_id,
            queue = event.queue,
            start_nanos = event.start_nanos,
            exec_nanos = event.exec_nanos,
            "task stalled"
        );
    }
}
