//! Deterministic in-process client for tests
//!
//! Implements the full client surface against a simulated service: a
//! scripted latency model, a counter ledger feeding `ModelStatus`, and
//! failure injection. Integration scenarios drive the real concurrency
//! manager against this factory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::client::{
    ClientFactory, CompletionQueue, ContextStat, InferBatchStats, InferContext, ModelConfig,
    ModelStatus, ModelVersionStatus, ProfileContext, RequestTiming, RunOptions,
    ServerStatusContext, StatBucket, TensorConfig,
};
use crate::error::{MedirError, Result};

/// Latency script applied to every simulated request
#[derive(Debug, Clone, Copy)]
pub enum LatencyModel {
    /// Constant latency
    Fixed(Duration),
    /// Latency proportional to the number of requests in flight
    PerInflight(Duration),
    /// Latency alternating around a base value on every measurement
    /// window (phase flips with each pair of status reads)
    Oscillating {
        /// Midpoint latency
        base: Duration,
        /// Relative swing; 0.2 alternates between 0.8x and 1.2x
        swing: f64,
    },
}

/// Configuration of the simulated service
#[derive(Debug, Clone)]
pub struct MockSettings {
    /// Latency script
    pub latency: LatencyModel,
    /// Largest batch size the simulated model accepts
    pub max_batch_size: u32,
    /// Input tensor descriptions
    pub inputs: Vec<TensorConfig>,
    /// Serve an empty per-batch stats map (missing-entry scenarios)
    pub omit_batch_stats: bool,
    /// Fail every inference once this many requests completed
    pub fail_after: Option<u64>,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            latency: LatencyModel::Fixed(Duration::from_millis(10)),
            max_batch_size: 8,
            inputs: vec![TensorConfig {
                name: "input0".to_string(),
                dims: vec![16, 16],
                element_byte_size: 4,
            }],
            omit_batch_stats: false,
            fail_after: None,
        }
    }
}

impl MockSettings {
    /// Set the latency script
    #[must_use]
    pub fn with_latency(mut self, latency: LatencyModel) -> Self {
        self.latency = latency;
        self
    }

    /// Set the model's maximum batch size
    #[must_use]
    pub fn with_max_batch_size(mut self, max_batch_size: u32) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Replace the input tensor descriptions
    #[must_use]
    pub fn with_inputs(mut self, inputs: Vec<TensorConfig>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Serve an empty per-batch stats map
    #[must_use]
    pub fn with_omitted_batch_stats(mut self) -> Self {
        self.omit_batch_stats = true;
        self
    }

    /// Fail every inference once `count` requests completed
    #[must_use]
    pub fn with_fail_after(mut self, count: u64) -> Self {
        self.fail_after = Some(count);
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct BatchCounters {
    count: u64,
    cumm_ns: u64,
    queue_ns: u64,
    compute_ns: u64,
}

/// Shared state of the simulated service
struct MockService {
    settings: MockSettings,
    counters: Mutex<HashMap<u32, BatchCounters>>,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    completed: AtomicU64,
    contexts_created: AtomicUsize,
    status_calls: AtomicUsize,
    profile_starts: AtomicUsize,
    profile_stops: AtomicUsize,
}

impl MockService {
    fn begin_request(&self) -> usize {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now_in_flight, Ordering::SeqCst);
        now_in_flight
    }

    fn latency_for(&self, in_flight: usize) -> Duration {
        match self.settings.latency {
            LatencyModel::Fixed(latency) => latency,
            LatencyModel::PerInflight(unit) => unit.saturating_mul(
                u32::try_from(in_flight).unwrap_or(u32::MAX),
            ),
            LatencyModel::Oscillating { base, swing } => {
                // Two status reads bracket each measurement window, so
                // every window observes one side of the swing uniformly.
                let window = self.status_calls.load(Ordering::SeqCst) / 2;
                let factor = if window % 2 == 0 {
                    1.0 + swing
                } else {
                    1.0 - swing
                };
                base.mul_f64(factor.max(0.0))
            }
        }
    }

    /// Account one finished request; the server's view of its handling
    /// time is a fixed split of the observed latency.
    fn finish_request(&self, latency: Duration, batch_size: u32) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        let latency_ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = counters.entry(batch_size).or_default();
        entry.count += 1;
        entry.cumm_ns += latency_ns * 8 / 10;
        entry.queue_ns += latency_ns / 10;
        entry.compute_ns += latency_ns * 6 / 10;
    }

    fn model_status(&self) -> ModelStatus {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut infer_stats = HashMap::new();
        if !self.settings.omit_batch_stats {
            let counters = self
                .counters
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for (&batch, entry) in counters.iter() {
                infer_stats.insert(
                    batch,
                    InferBatchStats {
                        success: StatBucket {
                            count: entry.count,
                            total_time_ns: entry.cumm_ns,
                        },
                        queue: StatBucket {
                            count: entry.count,
                            total_time_ns: entry.queue_ns,
                        },
                        compute: StatBucket {
                            count: entry.count,
                            total_time_ns: entry.compute_ns,
                        },
                    },
                );
            }
        }
        let mut version_status = HashMap::new();
        version_status.insert(1, ModelVersionStatus { infer_stats });
        ModelStatus {
            config: ModelConfig {
                name: "mock".to_string(),
                max_batch_size: self.settings.max_batch_size,
                inputs: self.settings.inputs.clone(),
            },
            version_status,
        }
    }

    fn check_fail_injection(&self) -> Result<()> {
        if let Some(limit) = self.settings.fail_after {
            if self.completed.load(Ordering::SeqCst) >= limit {
                return Err(MedirError::Server(
                    "simulated inference failure".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Factory producing contexts against one simulated service
pub struct MockClientFactory {
    service: Arc<MockService>,
}

impl MockClientFactory {
    /// Create a factory with the given settings
    #[must_use]
    pub fn new(settings: MockSettings) -> Self {
        Self {
            service: Arc::new(MockService {
                settings,
                counters: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                contexts_created: AtomicUsize::new(0),
                status_calls: AtomicUsize::new(0),
                profile_starts: AtomicUsize::new(0),
                profile_stops: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of inference contexts handed out so far
    #[must_use]
    pub fn infer_contexts_created(&self) -> usize {
        self.service.contexts_created.load(Ordering::SeqCst)
    }

    /// Number of status reads served so far
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.service.status_calls.load(Ordering::SeqCst)
    }

    /// Number of profile start/stop commands served so far
    #[must_use]
    pub fn profile_events(&self) -> (usize, usize) {
        (
            self.service.profile_starts.load(Ordering::SeqCst),
            self.service.profile_stops.load(Ordering::SeqCst),
        )
    }

    /// Highest number of simultaneously in-flight requests observed
    #[must_use]
    pub fn high_water_in_flight(&self) -> usize {
        self.service.high_water.load(Ordering::SeqCst)
    }

    /// Total requests completed by the simulated service
    #[must_use]
    pub fn completed_requests(&self) -> u64 {
        self.service.completed.load(Ordering::SeqCst)
    }
}

impl Default for MockClientFactory {
    fn default() -> Self {
        Self::new(MockSettings::default())
    }
}

impl ClientFactory for MockClientFactory {
    fn infer_context(&self) -> Result<Box<dyn InferContext>> {
        self.service.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockInferContext {
            service: Arc::clone(&self.service),
            batch_size: 0,
            bound_entries: HashMap::new(),
            completions: CompletionQueue::new(),
            stat: ContextStat::default(),
        }))
    }

    fn status_context(&self) -> Result<Box<dyn ServerStatusContext>> {
        Ok(Box::new(MockStatusContext {
            service: Arc::clone(&self.service),
        }))
    }

    fn profile_context(&self) -> Result<Box<dyn ProfileContext>> {
        Ok(Box::new(MockProfileContext {
            service: Arc::clone(&self.service),
        }))
    }
}

/// Inference context against the simulated service
pub struct MockInferContext {
    service: Arc<MockService>,
    batch_size: usize,
    bound_entries: HashMap<String, usize>,
    completions: CompletionQueue,
    stat: ContextStat,
}

const MOCK_SEND_NS: u64 = 20_000;
const MOCK_RECEIVE_NS: u64 = 30_000;

impl MockInferContext {
    fn simulate_request(&self) -> Result<RequestTiming> {
        self.service.check_fail_injection()?;
        let in_flight = self.service.begin_request();
        let latency = self.service.latency_for(in_flight);
        std::thread::sleep(latency);
        self.service
            .finish_request(latency, u32::try_from(self.batch_size).unwrap_or(u32::MAX));
        let latency_ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        Ok(RequestTiming {
            send_ns: MOCK_SEND_NS,
            receive_ns: MOCK_RECEIVE_NS,
            total_ns: latency_ns + MOCK_SEND_NS + MOCK_RECEIVE_NS,
        })
    }
}

impl InferContext for MockInferContext {
    fn model_name(&self) -> &str {
        "mock"
    }

    fn max_batch_size(&self) -> usize {
        self.service.settings.max_batch_size as usize
    }

    fn inputs(&self) -> Vec<TensorConfig> {
        self.service.settings.inputs.clone()
    }

    fn set_run_options(&mut self, options: &RunOptions) -> Result<()> {
        if options.batch_size == 0 {
            return Err(MedirError::InvalidArgument(
                "batch size must be > 0".to_string(),
            ));
        }
        self.batch_size = options.batch_size;
        self.bound_entries.clear();
        Ok(())
    }

    fn set_raw_input(&mut self, name: &str, _data: &[u8]) -> Result<()> {
        if !self
            .service
            .settings
            .inputs
            .iter()
            .any(|input| input.name == name)
        {
            return Err(MedirError::InvalidArgument(format!(
                "unknown input '{name}'"
            )));
        }
        let bound = self.bound_entries.entry(name.to_string()).or_insert(0);
        if *bound >= self.batch_size {
            return Err(MedirError::InvalidArgument(format!(
                "input '{name}' already has {} batch entries",
                self.batch_size
            )));
        }
        *bound += 1;
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let timing = self.simulate_request()?;
        self.stat.apply(&timing);
        Ok(())
    }

    fn async_run(&mut self) -> Result<u64> {
        self.service.check_fail_injection()?;
        let id = self.completions.allocate_id();
        let tx = self.completions.sender();
        let service = Arc::clone(&self.service);
        let batch_size = u32::try_from(self.batch_size).unwrap_or(u32::MAX);
        let in_flight = service.begin_request();
        let latency = service.latency_for(in_flight);
        std::thread::spawn(move || {
            std::thread::sleep(latency);
            service.finish_request(latency, batch_size);
            let latency_ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
            let _ = tx.send((
                id,
                Ok(RequestTiming {
                    send_ns: MOCK_SEND_NS,
                    receive_ns: MOCK_RECEIVE_NS,
                    total_ns: latency_ns + MOCK_SEND_NS + MOCK_RECEIVE_NS,
                }),
            ));
        });
        Ok(id)
    }

    fn ready_async_request(&mut self, block: bool) -> Result<u64> {
        self.completions.ready(block)
    }

    fn async_run_results(&mut self, id: u64) -> Result<()> {
        let timing = self.completions.take(id)?;
        self.stat.apply(&timing);
        Ok(())
    }

    fn stat(&self) -> ContextStat {
        self.stat
    }
}

/// Status context against the simulated service
pub struct MockStatusContext {
    service: Arc<MockService>,
}

impl ServerStatusContext for MockStatusContext {
    fn model_status(&mut self) -> Result<ModelStatus> {
        Ok(self.service.model_status())
    }
}

/// Profiling context against the simulated service
pub struct MockProfileContext {
    service: Arc<MockService>,
}

impl ProfileContext for MockProfileContext {
    fn start_profile(&mut self) -> Result<()> {
        self.service.profile_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_profile(&mut self) -> Result<()> {
        self.service.profile_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
