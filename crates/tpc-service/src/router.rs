// SPDX-License-Identifier: Apache-2.0

//! Routes inbound requests to the engine loop owning their partition.

use std::sync::Arc;

use tpc_buffer::Frame;
use tpc_engine::Engine;

use crate::error::ServiceError;
use crate::request::RequestOp;

/// Dispatches [`RequestOp`]s onto the engine, partitioned by a caller-
/// supplied key (e.g. connection id, shard key). Holds no state of its
/// own beyond the engine handle — multiplexing and request bookkeeping
/// live with the connection and caller respectively.
pub struct RequestRouter {
    engine: Arc<Engine>,
}

impl RequestRouter {
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Which loop index `partition_key` would route to, without
    /// submitting anything. Useful for callers that want to pre-bind a
    /// connection to a loop for its lifetime.
    #[must_use]
    pub fn loop_for(&self, partition_key: u64) -> usize {
        self.engine.partition_loop(partition_key)
    }

    /// Dispatches `op` against `frame` onto the loop owning `partition_key`.
    pub fn dispatch<Op: RequestOp>(
        &self,
        partition_key: u64,
        op: Op,
        frame: Frame,
    ) -> Result<(), ServiceError> {
        let task: tpc_scheduler::Task = Box::new(move |_ctx| {
            Box::new(op).execute(frame);
        });
        if self.engine.offer_partitioned(partition_key, task) {
            Ok(())
        } else {
            Err(ServiceError::Rejected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tpc_buffer::SerialPool;
    use tpc_config::EngineConfig;
    use tpc_telemetry::EngineMetrics;
    use prometheus::Registry;

    struct RecordingOp {
        ran: Arc<AtomicBool>,
    }

    impl RequestOp for RecordingOp {
        fn execute(self: Box<Self>, _frame: Frame) {
            self.ran.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn dispatch_runs_the_op_on_the_partitioned_loop() {
        let metrics = Arc::new(EngineMetrics::new(&Registry::new()).unwrap());
        let engine = Arc::new(Engine::new(EngineConfig::default(), metrics).unwrap());
        engine.start().unwrap();
        let router = RequestRouter::new(engine.clone());
        let pool = SerialPool::new(16);
        let ran = Arc::new(AtomicBool::new(false));

        router
            .dispatch(7, RecordingOp { ran: ran.clone() }, pool.allocate())
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while !ran.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(ran.load(Ordering::SeqCst));

        engine.shutdown().unwrap();
        engine.await_termination(Some(Duration::from_secs(1)));
    }
}
