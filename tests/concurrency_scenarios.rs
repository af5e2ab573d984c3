//! End-to-end scenarios driving the concurrency manager against the
//! deterministic mock service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use medir::client::mock::{LatencyModel, MockClientFactory, MockSettings};
use medir::client::ClientFactory;
use medir::error::MedirError;
use medir::{ConcurrencyManager, PerfConfig};

fn manager_for(
    settings: MockSettings,
    config: PerfConfig,
) -> (ConcurrencyManager, Arc<MockClientFactory>, Arc<AtomicBool>) {
    let factory = Arc::new(MockClientFactory::new(settings));
    let dyn_factory: Arc<dyn ClientFactory> = Arc::clone(&factory) as Arc<dyn ClientFactory>;
    let early_exit = Arc::new(AtomicBool::new(false));
    let manager = ConcurrencyManager::new(config, dyn_factory, Arc::clone(&early_exit));
    (manager, factory, early_exit)
}

/// Fixed mode at concurrency 4 with a constant 10ms request latency:
/// the client should see about one request per 10ms per worker.
#[test]
fn fixed_mode_constant_latency_throughput() {
    let (mut manager, factory, _exit) = manager_for(
        MockSettings::default().with_latency(LatencyModel::Fixed(Duration::from_millis(10))),
        PerfConfig {
            measurement_window_ms: 200,
            ..PerfConfig::default()
        },
    );

    let summary = manager.step(4).expect("step succeeds");
    assert_eq!(summary.concurrency, 4);
    assert_eq!(summary.batch_size, 1);
    assert_eq!(manager.worker_count(), 4);
    assert_eq!(factory.infer_contexts_created(), 4);

    // 4 workers / 10ms each: ~400 infer/sec, allow generous scheduling
    // slack on either side.
    assert!(
        summary.client_infer_per_sec > 200 && summary.client_infer_per_sec < 500,
        "throughput {} infer/sec outside expected band",
        summary.client_infer_per_sec
    );
    // Constant latency: standard deviation stays within a few hundred usec.
    assert!(
        summary.std_us < 2_000,
        "std {} usec too large for constant latency",
        summary.std_us
    );
    assert!(summary.client_request_count > 0);
    assert!(summary.server_request_count > 0);
    assert!(summary.client_avg_latency_ns >= 10_000_000);
}

/// Dynamic sweep with latency threshold 20ms against a service whose
/// latency is ~5ms per in-flight request: the sweep stops at
/// concurrency 4 with four collected summaries.
#[test]
fn dynamic_mode_stops_at_latency_threshold() {
    let (mut manager, _factory, _exit) = manager_for(
        // A hair over 5ms per in-flight unit so the integer-millisecond
        // average at concurrency 4 cannot round below the threshold.
        MockSettings::default()
            .with_latency(LatencyModel::PerInflight(Duration::from_micros(5_100))),
        PerfConfig {
            measurement_window_ms: 120,
            ..PerfConfig::default()
        },
    );

    let latency_threshold_ms = 20;
    let mut summaries = Vec::new();
    for concurrency in 1.. {
        let summary = manager.step(concurrency).expect("step succeeds");
        let stop = summary.avg_latency_ms() >= latency_threshold_ms;
        summaries.push(summary);
        if stop {
            break;
        }
    }

    assert_eq!(summaries.len(), 4, "sweep should stop at concurrency 4");
    assert_eq!(summaries[3].concurrency, 4);
    assert!(summaries[3].avg_latency_ms() >= 20);
    assert!(summaries[2].avg_latency_ms() < 20);
}

/// An interrupt mid-window aborts the step with the exit-signal error
/// and every worker joins cleanly at teardown.
#[test]
fn interrupt_during_step_joins_workers() {
    let (mut manager, _factory, early_exit) = manager_for(
        MockSettings::default().with_latency(LatencyModel::Fixed(Duration::from_millis(10))),
        PerfConfig {
            measurement_window_ms: 1_000,
            ..PerfConfig::default()
        },
    );

    let trigger = {
        let early_exit = Arc::clone(&early_exit);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            early_exit.store(true, Ordering::SeqCst);
        })
    };

    let start = std::time::Instant::now();
    let err = manager.step(4).expect_err("interrupt fails the step");
    assert!(err.to_string().contains("Received exit signal"));
    trigger.join().expect("trigger thread");

    // Teardown joins all workers; the whole thing stays well within a
    // couple of window durations.
    drop(manager);
    assert!(start.elapsed() < Duration::from_secs(5));
}

/// A server whose status is missing the batch-size entry fails the
/// measurement with the missing-stats internal error, without a crash.
#[test]
fn missing_batch_stats_is_reported() {
    let (mut manager, _factory, _exit) = manager_for(
        MockSettings::default()
            .with_latency(LatencyModel::Fixed(Duration::from_millis(5)))
            .with_omitted_batch_stats(),
        PerfConfig {
            measurement_window_ms: 100,
            ..PerfConfig::default()
        },
    );

    let err = manager.step(2).expect_err("missing stats fail the step");
    assert_eq!(
        err,
        MedirError::Internal("missing inference stats".to_string())
    );
}

/// A latency that swings ±20% per measurement window never satisfies a
/// ±5% stability band: the step runs to the measurement cap and still
/// reports its last sample.
#[test]
fn unstable_measurement_reports_last_sample() {
    let (mut manager, factory, _exit) = manager_for(
        MockSettings::default().with_latency(LatencyModel::Oscillating {
            base: Duration::from_millis(10),
            swing: 0.2,
        }),
        PerfConfig {
            measurement_window_ms: 100,
            stable_offset: 0.05,
            max_measurement_count: 5,
            ..PerfConfig::default()
        },
    );

    let summary = manager.step(2).expect("unstable step still reports");
    assert!(summary.client_request_count > 0);
    // Two status reads per measurement: the cap of 5 windows was used up.
    assert_eq!(factory.status_calls(), 10);
}

/// Async mode drives the whole concurrency level from a single worker
/// whose in-flight count never exceeds the target.
#[test]
fn async_mode_single_worker_bounded_in_flight() {
    let (mut manager, factory, _exit) = manager_for(
        MockSettings::default().with_latency(LatencyModel::Fixed(Duration::from_millis(15))),
        PerfConfig {
            measurement_window_ms: 150,
            async_mode: true,
            ..PerfConfig::default()
        },
    );

    let summary = manager.step(8).expect("async step succeeds");
    assert_eq!(summary.concurrency, 8);
    assert_eq!(manager.worker_count(), 1, "exactly one async worker");
    assert_eq!(factory.infer_contexts_created(), 1);
    assert_eq!(
        factory.high_water_in_flight(),
        8,
        "pipelining should reach but never exceed the target depth"
    );
    assert!(summary.client_request_count > 0);
}

/// Profiling toggles bracket every measurement window when enabled.
#[test]
fn profiling_brackets_each_window() {
    let (mut manager, factory, _exit) = manager_for(
        MockSettings::default().with_latency(LatencyModel::Fixed(Duration::from_millis(5))),
        PerfConfig {
            measurement_window_ms: 80,
            profile: true,
            ..PerfConfig::default()
        },
    );

    manager.step(2).expect("step succeeds");
    let (starts, stops) = factory.profile_events();
    assert!(starts > 0);
    assert_eq!(starts, stops);
}

/// A worker that dies mid-step surfaces as the maintain-concurrency
/// failure on the next measurement iteration.
#[test]
fn dead_worker_fails_the_step() {
    let (mut manager, _factory, _exit) = manager_for(
        MockSettings::default()
            .with_latency(LatencyModel::Fixed(Duration::from_millis(2)))
            .with_fail_after(30),
        PerfConfig {
            measurement_window_ms: 60,
            max_measurement_count: 20,
            // A tight band keeps the loop sampling until the failure hits.
            stable_offset: 0.0,
            ..PerfConfig::default()
        },
    );

    let err = manager.step(2).expect_err("dying workers fail the step");
    assert!(matches!(err, MedirError::Internal(_)));
}
