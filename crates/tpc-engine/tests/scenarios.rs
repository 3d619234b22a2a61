// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios exercising the engine through its public surface
//! only: construct, start, submit/schedule cross-thread, observe effects,
//! shut down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use prometheus::Registry;
use tpc_config::{EngineConfig, SchedulerKind};
use tpc_engine::engine::Engine;
use tpc_engine::event_loop::EventLoop;
use tpc_engine::thread_task;
use tpc_scheduler::Periodicity;
use tpc_telemetry::EngineMetrics;

fn metrics() -> Arc<EngineMetrics> {
    Arc::new(EngineMetrics::new(&Registry::new()).unwrap())
}

fn poll_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
}

/// S1: single-loop echo — a cross-thread-offered task writes into a shared
/// slot, observed within 10ms.
#[test]
fn single_loop_echo() {
    let mut config = EngineConfig::default();
    config.eventloop_count = 1;
    config.scheduler = SchedulerKind::Fcfs;
    config.target_latency = Duration::from_millis(1);
    config.min_granularity = Duration::from_micros(50);

    let engine = Engine::new(config, metrics()).unwrap();
    engine.start().unwrap();

    let slot: Arc<Mutex<Option<&'static str>>> = Arc::new(Mutex::new(None));
    let slot_for_task = slot.clone();
    assert!(engine.offer(
        0,
        Box::new(move |_ctx| {
            *slot_for_task.lock().unwrap() = Some("ok");
        })
    ));

    assert!(poll_until(Duration::from_millis(10), || slot
        .lock()
        .unwrap()
        .is_some()));
    assert_eq!(*slot.lock().unwrap(), Some("ok"));

    engine.shutdown().unwrap();
    assert!(engine.await_termination(Some(Duration::from_secs(5))));
}

/// S2: deadline ordering — tasks scheduled at +10ms, +5ms, +20ms fire in
/// order +5, +10, +20.
#[test]
fn deadline_ordering() {
    let mut config = EngineConfig::default();
    config.eventloop_count = 1;
    let engine = Engine::new(config, metrics()).unwrap();
    engine.start().unwrap();

    let fired: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let record = |label: &'static str, fired: Arc<Mutex<Vec<&'static str>>>| {
        move || -> tpc_scheduler::Task {
            let fired = fired.clone();
            Box::new(move |_ctx| {
                fired.lock().unwrap().push(label);
            })
        }
    };

    assert!(engine.schedule(0, 10_000_000, Periodicity::OneShot, record("ten", fired.clone())));
    assert!(engine.schedule(0, 5_000_000, Periodicity::OneShot, record("five", fired.clone())));
    assert!(engine.schedule(0, 20_000_000, Periodicity::OneShot, record("twenty", fired.clone())));

    assert!(poll_until(Duration::from_millis(200), || fired
        .lock()
        .unwrap()
        .len()
        == 3));

    assert_eq!(*fired.lock().unwrap(), vec!["five", "ten", "twenty"]);

    engine.shutdown().unwrap();
    assert!(engine.await_termination(Some(Duration::from_secs(5))));
}

/// S4: stall detection — a task that busy-waits past `stall_threshold` is
/// recorded as exactly one stall.
#[test]
fn stall_is_recorded_once() {
    let mut config = EngineConfig::default();
    config.eventloop_count = 1;
    config.stall_threshold = Duration::from_millis(1);

    let registry = Registry::new();
    let metrics = Arc::new(EngineMetrics::new(&registry).unwrap());
    let engine = Engine::new(config, metrics).unwrap();
    engine.start().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let done_for_task = done.clone();
    assert!(engine.offer(
        0,
        Box::new(move |_ctx| {
            let start = Instant::now();
            while start.elapsed() < Duration::from_millis(5) {
                std::hint::spin_loop();
            }
            done_for_task.store(true, Ordering::Release);
        })
    ));

    assert!(poll_until(Duration::from_secs(1), || done.load(Ordering::Acquire)));
    // Give the loop one more cycle to finish its account-and-disposition step.
    std::thread::sleep(Duration::from_millis(20));

    engine.shutdown().unwrap();
    assert!(engine.await_termination(Some(Duration::from_secs(5))));

    let families = registry.gather();
    let stalls = families
        .iter()
        .find(|f| f.name() == "tpc_engine_stalls_total")
        .expect("stalls metric registered");
    assert_eq!(stalls.get_metric()[0].get_counter().value(), 1.0);
}

/// S6: bounded local-queue capacity — with capacity 4, a 5th local offer is
/// rejected and none of the first 4 are lost.
#[test]
fn bounded_local_queue_capacity() {
    let mut config = EngineConfig::default();
    config.eventloop_count = 1;
    config.local_task_queue_capacity = 4;

    let metrics = metrics();
    let stop = Arc::new(AtomicBool::new(false));
    let (mut event_loop, _ingress) =
        EventLoop::new("test-loop", &config, stop.clone(), metrics.clone()).unwrap();
    let default_queue = event_loop.default_queue();

    let ran = Arc::new(Mutex::new(Vec::new()));
    let mut accepted = 0;
    for i in 0..5 {
        let ran = ran.clone();
        let task: tpc_scheduler::Task = Box::new(move |_ctx| {
            ran.lock().unwrap().push(i);
        });
        if event_loop.offer_local(default_queue, task) {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 4);

    let handle = thread_task::spawn("test-loop", stop.clone(), move || {
        event_loop.run();
    })
    .unwrap();

    assert!(poll_until(Duration::from_secs(1), || ran.lock().unwrap().len() == 4));
    assert_eq!(*ran.lock().unwrap(), vec![0, 1, 2, 3]);

    handle.request_stop();
    handle.join().unwrap();
}

fn gauge_value(registry: &Registry, metric_name: &str, label: &str, label_value: &str) -> f64 {
    let families = registry.gather();
    let family = families.iter().find(|f| f.name() == metric_name).unwrap();
    let metric = family
        .get_metric()
        .iter()
        .find(|m| {
            m.get_label()
                .iter()
                .any(|l| l.name() == label && l.value() == label_value)
        })
        .unwrap();
    metric.get_gauge().value()
}

/// S3: CFS fairness — two differently-weighted queues, each pre-loaded
/// with enough 100us CPU-burn tasks to keep both runnable for the whole
/// run, should split CPU time roughly in proportion to their shares.
/// Gated behind `--ignored`: ~4s of real CPU burn on a single thread.
#[test]
#[ignore = "burns several seconds of CPU on one thread; run explicitly"]
fn cfs_fairness_ratio_approaches_shares_ratio() {
    const BURSTS_PER_QUEUE: usize = 8_000;
    const BURN: Duration = Duration::from_micros(100);

    let mut config = EngineConfig::default();
    config.eventloop_count = 1;
    config.scheduler = SchedulerKind::Cfs;
    config.local_task_queue_capacity = BURSTS_PER_QUEUE + 1;

    let registry = Registry::new();
    let metrics = Arc::new(EngineMetrics::new(&registry).unwrap());
    let stop = Arc::new(AtomicBool::new(false));
    let (mut event_loop, _ingress) =
        EventLoop::new("test-loop", &config, stop.clone(), metrics).unwrap();

    let queue_a = event_loop.create_queue("a", 1, BURSTS_PER_QUEUE + 1);
    let queue_b = event_loop.create_queue("b", 3, BURSTS_PER_QUEUE + 1);

    fn burn_task() -> tpc_scheduler::Task {
        Box::new(|_ctx| {
            let start = Instant::now();
            while start.elapsed() < BURN {
                std::hint::spin_loop();
            }
        })
    }

    for _ in 0..BURSTS_PER_QUEUE {
        assert!(event_loop.offer_local(queue_a, burn_task()));
        assert!(event_loop.offer_local(queue_b, burn_task()));
    }

    let handle = thread_task::spawn("test-loop", stop.clone(), move || {
        event_loop.run();
    })
    .unwrap();

    handle.request_stop();
    handle.join().unwrap();

    let runtime_a = gauge_value(&registry, "tpc_engine_queue_actual_runtime_nanos", "queue", "a");
    let runtime_b = gauge_value(&registry, "tpc_engine_queue_actual_runtime_nanos", "queue", "b");
    let ratio = runtime_b / runtime_a;
    assert!((2.7..=3.3).contains(&ratio), "B/A runtime ratio was {ratio}, want ~3.0");
}

/// S5: park+wake latency — with `spin=false`, an idle loop parks; each
/// cross-thread offer should wake it and have the task running within
/// about 1ms at p99. Gated behind `--ignored`: samples many iterations.
#[test]
#[ignore = "samples p99 wakeup latency over many iterations; run explicitly"]
fn park_wake_latency_p99_under_1ms() {
    const ITERATIONS: usize = 200;

    let mut config = EngineConfig::default();
    config.eventloop_count = 1;
    config.spin = false;

    let engine = Engine::new(config, metrics()).unwrap();
    engine.start().unwrap();

    let mut latencies = Vec::with_capacity(ITERATIONS);
    for _ in 0..ITERATIONS {
        let observed: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let observed_for_task = observed.clone();
        let offered_at = Instant::now();
        assert!(engine.offer(
            0,
            Box::new(move |_ctx| {
                *observed_for_task.lock().unwrap() = Some(Instant::now());
            })
        ));
        assert!(poll_until(Duration::from_millis(50), || observed
            .lock()
            .unwrap()
            .is_some()));
        let ran_at = observed.lock().unwrap().unwrap();
        latencies.push(ran_at.saturating_duration_since(offered_at));
        std::thread::sleep(Duration::from_millis(2));
    }

    engine.shutdown().unwrap();
    assert!(engine.await_termination(Some(Duration::from_secs(5))));

    latencies.sort();
    let p99 = latencies[(latencies.len() * 99 / 100).min(latencies.len() - 1)];
    assert!(p99 < Duration::from_millis(1), "p99 wakeup latency was {p99:?}");
}
