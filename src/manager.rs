//! Closed-loop concurrency controller
//!
//! The manager holds the target number of in-flight requests by spawning
//! workers once and pausing them thereafter, repeatedly samples
//! fixed-duration measurement windows, and reports the first stable
//! sample per concurrency level. Workers are never destroyed while the
//! manager lives; teardown raises the pause index past every worker,
//! sets the early-exit flag, and joins them all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::client::ClientFactory;
use crate::error::{MedirError, Result};
use crate::pause::PauseGate;
use crate::summary::{summarize, PerfStatus, SummaryParams};
use crate::timestamp::StatusLedger;
use crate::worker::{run_async_worker, run_sync_worker, WorkerShared, WorkerStatus};

/// Trailing sample count of the stability test
const RECENT_K: usize = 3;

/// Measurement configuration of one manager
#[derive(Debug, Clone)]
pub struct PerfConfig {
    /// Print per-pass progress lines
    pub verbose: bool,
    /// Toggle server-side profiling around every window
    pub profile: bool,
    /// Batch entries per request
    pub batch_size: usize,
    /// Relative stability tolerance (0.10 = ±10%)
    pub stable_offset: f64,
    /// Measurement window length in milliseconds
    pub measurement_window_ms: u64,
    /// Samples taken before giving up on stability
    pub max_measurement_count: usize,
    /// Drive load from one pipelining worker instead of worker threads
    pub async_mode: bool,
    /// Requested model version; negative selects the latest
    pub model_version: i64,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            profile: false,
            batch_size: 1,
            stable_offset: 0.1,
            measurement_window_ms: 1000,
            max_measurement_count: 10,
            async_mode: false,
            model_version: -1,
        }
    }
}

/// Spawn-once/pause-forever load controller
pub struct ConcurrencyManager {
    config: PerfConfig,
    factory: Arc<dyn ClientFactory>,
    gate: Arc<PauseGate>,
    ledger: Arc<StatusLedger>,
    early_exit: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    worker_status: Vec<WorkerStatus>,
}

impl ConcurrencyManager {
    /// Create a manager driving load through the given client factory
    ///
    /// The early-exit flag is shared with the caller: the signal handler
    /// raises it, and every worker observes it once per iteration.
    #[must_use]
    pub fn new(
        config: PerfConfig,
        factory: Arc<dyn ClientFactory>,
        early_exit: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            factory,
            gate: Arc::new(PauseGate::new()),
            ledger: Arc::new(StatusLedger::new()),
            early_exit,
            threads: Vec::new(),
            worker_status: Vec::new(),
        }
    }

    /// Number of workers spawned so far
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.threads.len()
    }

    /// Adjust to `concurrent_request_count` in-flight requests and
    /// measure until stable
    ///
    /// Requests keep flowing between and during samples, so the server
    /// sees more requests than the client counts; the summarizer works
    /// on bracketed counter deltas for exactly this reason. When the
    /// sample never stabilizes a warning is printed and the last sample
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when a worker died ("failed to maintain
    /// concurrency") or the early-exit signal arrived, and any error
    /// from measurement itself.
    pub fn step(&mut self, concurrent_request_count: usize) -> Result<PerfStatus> {
        if concurrent_request_count == 0 {
            return Err(MedirError::InvalidArgument(
                "concurrent request count must be > 0".to_string(),
            ));
        }
        self.gate.set_active_count(concurrent_request_count);

        if self.config.async_mode {
            if self.threads.is_empty() {
                self.spawn_worker(true)?;
            }
        } else {
            while self.threads.len() < concurrent_request_count {
                self.spawn_worker(false)?;
            }
        }

        println!("Request concurrency: {concurrent_request_count}");

        let mut infer_per_sec: Vec<u64> = Vec::new();
        let mut latencies: Vec<u64> = Vec::new();
        // Only meaningful once RECENT_K samples exist; a run capped below
        // that is reported as-is without an instability warning.
        let mut stable = true;
        let mut last_summary = None;

        loop {
            self.check_workers()?;

            let summary = self.measure(concurrent_request_count)?;
            infer_per_sec.push(summary.client_infer_per_sec);
            latencies.push(summary.client_avg_latency_ns);
            if self.config.verbose {
                println!(
                    "  Pass [{}] throughput: {} infer/sec. Avg latency: {} usec (std {} usec)",
                    infer_per_sec.len(),
                    summary.client_infer_per_sec,
                    summary.client_avg_latency_ns / 1000,
                    summary.std_us
                );
            }
            last_summary = Some(summary);

            if infer_per_sec.len() >= RECENT_K {
                stable = is_stable(&infer_per_sec, self.config.stable_offset)
                    && is_stable(&latencies, self.config.stable_offset);
                if stable {
                    break;
                }
            }

            if self.early_exit.load(Ordering::SeqCst)
                || infer_per_sec.len() >= self.config.max_measurement_count
            {
                break;
            }
        }

        if self.early_exit.load(Ordering::SeqCst) {
            return Err(MedirError::Internal("Received exit signal.".to_string()));
        }
        if !stable {
            eprintln!(
                "Failed to obtain stable measurement within {} measurement windows \
                 for concurrency {}. Please try to increase the time window.",
                self.config.max_measurement_count, concurrent_request_count
            );
        }

        last_summary.ok_or_else(|| MedirError::Internal("no measurement taken".to_string()))
    }

    /// Take one measurement window
    ///
    /// Brackets the window sleep with server status reads and context
    /// stat snapshots, then summarizes the drained timestamps. The sleep
    /// overshoots the nominal window by 20% so the summarizer can center
    /// the window inside the drained span and trim the ramping edges.
    fn measure(&self, concurrency: usize) -> Result<PerfStatus> {
        let mut status_ctx = self.factory.status_context()?;

        let start_status = status_ctx.model_status()?;
        if self.config.profile {
            self.factory.profile_context()?.start_profile()?;
        }
        let start_stat = self.ledger.accumulated_stat();

        std::thread::sleep(Duration::from_millis(
            self.config.measurement_window_ms * 6 / 5,
        ));

        let end_stat = self.ledger.accumulated_stat();
        if self.config.profile {
            self.factory.profile_context()?.stop_profile()?;
        }
        let end_status = status_ctx.model_status()?;

        let timestamps = self.ledger.drain();
        summarize(
            &timestamps,
            &start_status,
            &end_status,
            &start_stat,
            &end_stat,
            &SummaryParams {
                concurrency,
                batch_size: self.config.batch_size,
                measurement_window_ms: self.config.measurement_window_ms,
                model_version: self.config.model_version,
            },
        )
    }

    fn spawn_worker(&mut self, async_mode: bool) -> Result<()> {
        let worker_index = self.threads.len();
        let slot = self.ledger.add_slot();
        debug_assert_eq!(slot, worker_index);

        let status: WorkerStatus = Arc::new(Mutex::new(None));
        self.worker_status.push(Arc::clone(&status));

        let shared = WorkerShared {
            ledger: Arc::clone(&self.ledger),
            gate: Arc::clone(&self.gate),
            early_exit: Arc::clone(&self.early_exit),
            batch_size: self.config.batch_size,
        };
        let factory = Arc::clone(&self.factory);
        let handle = std::thread::Builder::new()
            .name(format!("medir-worker-{worker_index}"))
            .spawn(move || {
                if async_mode {
                    run_async_worker(&shared, &factory, &status);
                } else {
                    run_sync_worker(&shared, &factory, &status, worker_index);
                }
            })
            .map_err(|e| MedirError::Internal(format!("failed to spawn worker: {e}")))?;
        self.threads.push(handle);
        Ok(())
    }

    /// Abort when any worker stored an error
    fn check_workers(&self) -> Result<()> {
        for status in &self.worker_status {
            let slot = status.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(MedirError::Internal(
                    "Failed to maintain concurrency level requested. \
                     Worker thread(s) failed to generate concurrent requests."
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Drop for ConcurrencyManager {
    fn drop(&mut self) {
        self.early_exit.store(true, Ordering::SeqCst);
        // Raise the pause index past every worker so the paused ones wake,
        // observe the exit flag, and return.
        self.gate.set_active_count(self.threads.len());

        for (index, handle) in self.threads.drain(..).enumerate() {
            if handle.join().is_err() {
                eprintln!("Thread [{index}] panicked");
                continue;
            }
            let slot = self.worker_status[index]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(error) = slot.as_ref() {
                eprintln!("Thread [{index}] had error: {error}");
            }
        }
    }
}

/// Trailing-window stability test over the last [`RECENT_K`] samples
///
/// Every one of the trailing samples must lie within ±`offset` of their
/// own mean. Requires `RECENT_K` or more samples.
fn is_stable(samples: &[u64], offset: f64) -> bool {
    let recent = &samples[samples.len() - RECENT_K..];
    let avg = recent.iter().map(|&v| v as f64).sum::<f64>() / RECENT_K as f64;
    recent
        .iter()
        .all(|&v| (v as f64) >= avg * (1.0 - offset) && (v as f64) <= avg * (1.0 + offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{LatencyModel, MockClientFactory, MockSettings};

    fn manager_with(settings: MockSettings, config: PerfConfig) -> ConcurrencyManager {
        ConcurrencyManager::new(
            config,
            Arc::new(MockClientFactory::new(settings)),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_is_stable_flat_series() {
        assert!(is_stable(&[100, 100, 100], 0.05));
        assert!(is_stable(&[95, 100, 105], 0.10));
    }

    #[test]
    fn test_is_stable_rejects_swing() {
        assert!(!is_stable(&[80, 100, 120], 0.10));
        // Only the trailing window counts: an early outlier is ignored.
        assert!(is_stable(&[500, 100, 100, 100], 0.05));
    }

    #[test]
    fn test_step_reports_worker_failure() {
        let mut manager = manager_with(
            MockSettings::default()
                .with_latency(LatencyModel::Fixed(std::time::Duration::from_millis(1)))
                .with_fail_after(0),
            PerfConfig {
                measurement_window_ms: 20,
                max_measurement_count: 2,
                ..PerfConfig::default()
            },
        );
        // The worker dies on its first request; either the first
        // measurement window sees no valid timestamps or the next
        // iteration sees the dead worker. Both are step failures.
        let err = manager.step(2).unwrap_err();
        assert!(matches!(err, MedirError::Internal(_)));
    }

    #[test]
    fn test_step_fixed_latency_is_stable() {
        let mut manager = manager_with(
            MockSettings::default()
                .with_latency(LatencyModel::Fixed(std::time::Duration::from_millis(5))),
            PerfConfig {
                measurement_window_ms: 100,
                ..PerfConfig::default()
            },
        );
        let summary = manager.step(2).unwrap();
        assert_eq!(summary.concurrency, 2);
        assert_eq!(manager.worker_count(), 2);
        assert!(summary.client_request_count > 0);
        // ~2 workers / 5ms each: in the hundreds per second.
        assert!(summary.client_infer_per_sec > 100);
    }

    #[test]
    fn test_lowering_concurrency_keeps_workers() {
        let mut manager = manager_with(
            MockSettings::default()
                .with_latency(LatencyModel::Fixed(std::time::Duration::from_millis(2))),
            PerfConfig {
                measurement_window_ms: 50,
                ..PerfConfig::default()
            },
        );
        manager.step(3).unwrap();
        assert_eq!(manager.worker_count(), 3);
        manager.step(1).unwrap();
        // Pausing, not destroying.
        assert_eq!(manager.worker_count(), 3);
    }
}
