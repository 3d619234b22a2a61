// SPDX-License-Identifier: Apache-2.0

//! Engine-level metrics: per-loop task counts, stall counts, slice-overrun
//! counts, and per-queue vruntime/actual-runtime gauges.

use crate::error::TelemetryError;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

/// Prometheus metrics for one engine instance. Labels every series by
/// `loop_id` (and, for per-queue series, `queue`), so one registry can
/// back an engine with any number of loops.
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    tasks_run: IntCounterVec,
    stalls: IntCounterVec,
    slice_overruns: IntCounterVec,
    queue_vruntime: IntGaugeVec,
    queue_actual_runtime_nanos: IntGaugeVec,
}

impl EngineMetrics {
    /// Creates and registers every series against `registry`.
    pub fn new(registry: &Registry) -> Result<Self, TelemetryError> {
        let tasks_run = register(
            registry,
            "tpc_engine_tasks_run_total",
            "Total number of tasks run to completion, per loop.",
            &["loop_id"],
        )?;
        let stalls = register(
            registry,
            "tpc_engine_stalls_total",
            "Total number of tasks whose runtime exceeded the stall threshold, per loop.",
            &["loop_id"],
        )?;
        let slice_overruns = register(
            registry,
            "tpc_engine_slice_overruns_total",
            "Total number of task-queue slices that ran past their computed deadline, per loop.",
            &["loop_id"],
        )?;

        let queue_vruntime = register_gauge(
            registry,
            "tpc_engine_queue_vruntime_nanos",
            "Current vruntime of a task queue (CFS scheduler only).",
            &["loop_id", "queue"],
        )?;
        let queue_actual_runtime_nanos = register_gauge(
            registry,
            "tpc_engine_queue_actual_runtime_nanos",
            "Cumulative CPU time consumed by a task queue.",
            &["loop_id", "queue"],
        )?;

        Ok(Self {
            tasks_run,
            stalls,
            slice_overruns,
            queue_vruntime,
            queue_actual_runtime_nanos,
        })
    }

    /// Records one task having run to completion on `loop_id`.
    pub fn record_task_run(&self, loop_id: &str) {
        self.tasks_run.with_label_values(&[loop_id]).inc();
    }

    /// Records a stall observed on `loop_id`.
    pub fn record_stall(&self, loop_id: &str) {
        self.stalls.with_label_values(&[loop_id]).inc();
    }

    /// Records a slice overrun observed on `loop_id`.
    pub fn record_slice_overrun(&self, loop_id: &str) {
        self.slice_overruns.with_label_values(&[loop_id]).inc();
    }

    /// Updates the vruntime gauge for `queue` on `loop_id`.
    pub fn set_queue_vruntime(&self, loop_id: &str, queue: &str, vruntime_nanos: u64) {
        self.queue_vruntime
            .with_label_values(&[loop_id, queue])
            .set(vruntime_nanos.min(i64::MAX as u64) as i64);
    }

    /// Updates the actual-runtime gauge for `queue` on `loop_id`.
    pub fn set_queue_actual_runtime(&self, loop_id: &str, queue: &str, nanos: u64) {
        self.queue_actual_runtime_nanos
            .with_label_values(&[loop_id, queue])
            .set(nanos.min(i64::MAX as u64) as i64);
    }
}

fn register(
    registry: &Registry,
    name: &'static str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, TelemetryError> {
    let metric = IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricRegistration { name, source })?;
    registry
        .register(Box::new(metric.clone()))
        .map_err(|source| TelemetryError::MetricRegistration { name, source })?;
    Ok(metric)
}

fn register_gauge(
    registry: &Registry,
    name: &'static str,
    help: &str,
    labels: &[&str],
) -> Result<IntGaugeVec, TelemetryError> {
    let metric = IntGaugeVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricRegistration { name, source })?;
    registry
        .register(Box::new(metric.clone()))
        .map_err(|source| TelemetryError::MetricRegistration { name, source })?;
    Ok(metric)
}
