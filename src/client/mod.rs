//! Client abstraction for the inference service
//!
//! The measurement core never talks to a wire format directly; it drives
//! the three context traits defined here. HTTP and gRPC implementations
//! expose identical semantic operations, and a deterministic mock backs
//! the integration scenarios.
//!
//! ## Contexts
//! - [`InferContext`]: owns one logical connection, issues blocking or
//!   pipelined inference requests, tracks cumulative timing counters
//! - [`ServerStatusContext`]: reads per-model, per-version, per-batch-size
//!   inference statistics from the service
//! - [`ProfileContext`]: toggles server-side profiling around a window

pub mod grpc;
pub mod http;
pub mod mock;
#[allow(missing_docs, clippy::all, clippy::pedantic)]
pub mod proto;

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::error::{MedirError, Result};

/// Wire protocol used to reach the inference service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// JSON over HTTP/1.1
    Http,
    /// Protobuf over gRPC
    Grpc,
}

impl Protocol {
    /// Parse from a CLI string
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for anything other than `http` or `grpc`
    /// (case-insensitive).
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "grpc" => Ok(Self::Grpc),
            other => Err(MedirError::InvalidArgument(format!(
                "unexpected protocol type \"{other}\", expecting HTTP or gRPC"
            ))),
        }
    }

    /// String representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Grpc => "grpc",
        }
    }
}

/// Cumulative request-timing counters for one RPC context
///
/// All counters grow monotonically over the context's lifetime; the
/// summarizer works on post-minus-pre deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStat {
    /// Requests completed successfully
    pub completed_request_count: u64,
    /// Total end-to-end request time in nanoseconds
    pub cumulative_total_request_time_ns: u64,
    /// Total time spent marshalling and sending requests in nanoseconds
    pub cumulative_send_time_ns: u64,
    /// Total time spent receiving and unmarshalling responses in nanoseconds
    pub cumulative_receive_time_ns: u64,
}

impl ContextStat {
    /// Fold one completed request's timing into the counters
    pub fn apply(&mut self, timing: &RequestTiming) {
        self.completed_request_count += 1;
        self.cumulative_total_request_time_ns += timing.total_ns;
        self.cumulative_send_time_ns += timing.send_ns;
        self.cumulative_receive_time_ns += timing.receive_ns;
    }
}

/// Timing breakdown of a single completed request
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestTiming {
    /// Time spent marshalling and sending the request
    pub send_ns: u64,
    /// Time spent receiving and unmarshalling the response
    pub receive_ns: u64,
    /// End-to-end time inside the client library
    pub total_ns: u64,
}

/// One monotonically nondecreasing `(count, total_time_ns)` counter pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBucket {
    /// Number of requests accounted in this bucket
    #[serde(default)]
    pub count: u64,
    /// Total accumulated time in nanoseconds
    #[serde(default)]
    pub total_time_ns: u64,
}

/// Server-side statistics for one batch size of one model version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferBatchStats {
    /// Successful request count and total handling time
    #[serde(default)]
    pub success: StatBucket,
    /// Time spent waiting for an available model instance
    #[serde(default)]
    pub queue: StatBucket,
    /// Time spent executing the model (including tensor copies)
    #[serde(default)]
    pub compute: StatBucket,
}

/// Per-version inference statistics keyed by request batch size
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersionStatus {
    /// Statistics per batch size
    #[serde(default)]
    pub infer_stats: HashMap<u32, InferBatchStats>,
}

/// Shape and size description of one model input tensor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorConfig {
    /// Tensor name
    pub name: String,
    /// Tensor dimensions; a negative entry marks a variable-size axis
    #[serde(default)]
    pub dims: Vec<i64>,
    /// Size of one element in bytes
    #[serde(default)]
    pub element_byte_size: u32,
}

impl TensorConfig {
    /// Fixed byte size of one batch entry, or `None` for variable shapes
    #[must_use]
    pub fn byte_size(&self) -> Option<u64> {
        let mut total = u64::from(self.element_byte_size);
        for &dim in &self.dims {
            let dim = u64::try_from(dim).ok()?;
            total = total.saturating_mul(dim);
        }
        Some(total)
    }
}

/// Model configuration relevant to request construction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name
    #[serde(default)]
    pub name: String,
    /// Largest batch size the model accepts
    #[serde(default)]
    pub max_batch_size: u32,
    /// Input tensor descriptions
    #[serde(default)]
    pub inputs: Vec<TensorConfig>,
}

/// Server-reported status for one model
///
/// Counters inside `version_status` are monotonically nondecreasing for
/// the duration of a sweep; the summarizer subtracts a pre-window snapshot
/// from a post-window snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Model configuration (rides along with the status report)
    #[serde(default)]
    pub config: ModelConfig,
    /// Per-version inference statistics keyed by version number
    #[serde(default)]
    pub version_status: HashMap<i64, ModelVersionStatus>,
}

/// Options fixed for every request issued by one context
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Number of batch entries per request
    pub batch_size: usize,
}

/// One logical inference connection
///
/// Synchronous use: `run` issues one request and blocks for its response.
/// Pipelined use: `async_run` starts a request and returns its id;
/// `ready_async_request` yields ids of completed requests (blocking or
/// polling); `async_run_results` consumes a completion and folds its
/// timing into the context's cumulative [`ContextStat`].
pub trait InferContext: Send {
    /// Name of the model this context targets
    fn model_name(&self) -> &str;

    /// Largest batch size the model accepts
    fn max_batch_size(&self) -> usize;

    /// Input tensor descriptions for request construction
    fn inputs(&self) -> Vec<TensorConfig>;

    /// Fix the per-request options and clear any existing input bindings
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the options are unusable (for
    /// example a zero batch size).
    fn set_run_options(&mut self, options: &RunOptions) -> Result<()>;

    /// Bind one batch entry of raw bytes to the named input
    ///
    /// Called `batch_size` times per input during preparation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown input name or a binding
    /// that exceeds the configured batch size.
    fn set_raw_input(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// Issue one request and block for its response
    ///
    /// # Errors
    ///
    /// Returns `Server` when the RPC fails; the worker stores the error
    /// and exits.
    fn run(&mut self) -> Result<()>;

    /// Start one pipelined request and return its id
    ///
    /// # Errors
    ///
    /// Returns `Server` when the request cannot be issued.
    fn async_run(&mut self) -> Result<u64>;

    /// Wait for (or poll for) the next completed request id
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when `block` is false and nothing has
    /// completed; any other error is terminal for the worker.
    fn ready_async_request(&mut self, block: bool) -> Result<u64>;

    /// Consume the completion for `id`, updating the cumulative stat
    ///
    /// # Errors
    ///
    /// Returns the request's own error verbatim, or `InvalidArgument`
    /// for an id with no pending completion.
    fn async_run_results(&mut self, id: u64) -> Result<()>;

    /// Snapshot of this context's cumulative timing counters
    fn stat(&self) -> ContextStat;
}

/// Reader of server-side model statistics
pub trait ServerStatusContext: Send {
    /// Fetch the current status of the configured model
    ///
    /// # Errors
    ///
    /// Returns `Server` when the status RPC fails or the model is unknown.
    fn model_status(&mut self) -> Result<ModelStatus>;
}

/// Server-side profiling toggle
pub trait ProfileContext: Send {
    /// Enable profiling on the server
    ///
    /// # Errors
    ///
    /// Returns `Server` when the profile RPC fails.
    fn start_profile(&mut self) -> Result<()>;

    /// Disable profiling on the server
    ///
    /// # Errors
    ///
    /// Returns `Server` when the profile RPC fails.
    fn stop_profile(&mut self) -> Result<()>;
}

/// Factory producing protocol-specific contexts
///
/// Each worker receives its own [`InferContext`]; the controller creates
/// fresh status and profile contexts per measurement, mirroring their
/// short-lived use.
pub trait ClientFactory: Send + Sync {
    /// Create an inference context bound to the configured model
    ///
    /// # Errors
    ///
    /// Returns `Server` when the service cannot be reached or the model
    /// configuration cannot be negotiated.
    fn infer_context(&self) -> Result<Box<dyn InferContext>>;

    /// Create a status context bound to the configured model
    ///
    /// # Errors
    ///
    /// Returns `Server` when the service cannot be reached.
    fn status_context(&self) -> Result<Box<dyn ServerStatusContext>>;

    /// Create a profiling context
    ///
    /// # Errors
    ///
    /// Returns `Server` when the service cannot be reached.
    fn profile_context(&self) -> Result<Box<dyn ProfileContext>>;
}

/// Build the factory for the selected protocol
///
/// # Errors
///
/// Returns `Server` when the endpoint is malformed or the transport
/// cannot be constructed.
pub fn factory_for(
    protocol: Protocol,
    url: &str,
    model_name: &str,
    model_version: i64,
) -> Result<Arc<dyn ClientFactory>> {
    match protocol {
        Protocol::Http => Ok(Arc::new(http::HttpClientFactory::new(
            url,
            model_name,
            model_version,
        ))),
        Protocol::Grpc => Ok(Arc::new(grpc::GrpcClientFactory::new(
            url,
            model_name,
            model_version,
        )?)),
    }
}

static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

/// Shared tokio runtime backing the async request engines
///
/// # Errors
///
/// Returns `Internal` when the runtime cannot be constructed.
pub(crate) fn runtime() -> Result<&'static tokio::runtime::Runtime> {
    if let Some(rt) = RUNTIME.get() {
        return Ok(rt);
    }
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(|e| MedirError::Internal(format!("failed to start async runtime: {e}")))?;
    Ok(RUNTIME.get_or_init(|| rt))
}

/// Completion bookkeeping shared by the pipelined request engines
///
/// Requests in flight send `(id, outcome)` on the channel when they
/// finish; `ready` surfaces the next finished id, and `take` hands the
/// outcome to the caller exactly once.
pub(crate) struct CompletionQueue {
    tx: Sender<(u64, Result<RequestTiming>)>,
    rx: Receiver<(u64, Result<RequestTiming>)>,
    next_id: u64,
    done: HashMap<u64, Result<RequestTiming>>,
}

impl CompletionQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        Self {
            tx,
            rx,
            next_id: 0,
            done: HashMap::new(),
        }
    }

    /// Allocate the next request id
    pub(crate) fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Sender handed to the in-flight task for this queue
    pub(crate) fn sender(&self) -> Sender<(u64, Result<RequestTiming>)> {
        self.tx.clone()
    }

    /// Surface the next completed request id
    pub(crate) fn ready(&mut self, block: bool) -> Result<u64> {
        let (id, outcome) = if block {
            self.rx.recv().map_err(|_| {
                MedirError::Internal("completion channel closed with requests in flight".into())
            })?
        } else {
            match self.rx.try_recv() {
                Ok(entry) => entry,
                Err(TryRecvError::Empty) => return Err(MedirError::Unavailable),
                Err(TryRecvError::Disconnected) => {
                    return Err(MedirError::Internal(
                        "completion channel closed with requests in flight".into(),
                    ))
                }
            }
        };
        self.done.insert(id, outcome);
        Ok(id)
    }

    /// Consume the stored outcome for `id`
    pub(crate) fn take(&mut self, id: u64) -> Result<RequestTiming> {
        self.done
            .remove(&id)
            .ok_or_else(|| MedirError::InvalidArgument(format!("unknown request id {id}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse() {
        assert_eq!(Protocol::parse("http").unwrap(), Protocol::Http);
        assert_eq!(Protocol::parse("gRPC").unwrap(), Protocol::Grpc);
        assert!(Protocol::parse("carrier-pigeon").is_err());
    }

    #[test]
    fn test_tensor_byte_size() {
        let tensor = TensorConfig {
            name: "input0".to_string(),
            dims: vec![3, 224, 224],
            element_byte_size: 4,
        };
        assert_eq!(tensor.byte_size(), Some(3 * 224 * 224 * 4));
    }

    #[test]
    fn test_tensor_byte_size_variable_shape() {
        let tensor = TensorConfig {
            name: "tokens".to_string(),
            dims: vec![-1],
            element_byte_size: 4,
        };
        assert_eq!(tensor.byte_size(), None);
    }

    #[test]
    fn test_context_stat_apply() {
        let mut stat = ContextStat::default();
        stat.apply(&RequestTiming {
            send_ns: 10,
            receive_ns: 20,
            total_ns: 100,
        });
        stat.apply(&RequestTiming {
            send_ns: 5,
            receive_ns: 5,
            total_ns: 50,
        });
        assert_eq!(stat.completed_request_count, 2);
        assert_eq!(stat.cumulative_total_request_time_ns, 150);
        assert_eq!(stat.cumulative_send_time_ns, 15);
        assert_eq!(stat.cumulative_receive_time_ns, 25);
    }

    #[test]
    fn test_model_status_deserializes_integer_keys() {
        let json = r#"{
            "config": {"name": "resnet", "max_batch_size": 8,
                       "inputs": [{"name": "input0", "dims": [3, 4], "element_byte_size": 4}]},
            "version_status": {
                "2": {"infer_stats": {"1": {
                    "success": {"count": 10, "total_time_ns": 1000},
                    "queue": {"count": 10, "total_time_ns": 100},
                    "compute": {"count": 10, "total_time_ns": 800}
                }}}
            }
        }"#;
        let status: ModelStatus = serde_json::from_str(json).expect("valid status json");
        assert_eq!(status.config.max_batch_size, 8);
        let version = status.version_status.get(&2).expect("version 2");
        let stats = version.infer_stats.get(&1).expect("batch 1");
        assert_eq!(stats.success.count, 10);
        assert_eq!(stats.compute.total_time_ns, 800);
    }

    #[test]
    fn test_completion_queue_round_trip() {
        let mut queue = CompletionQueue::new();
        let id = queue.allocate_id();
        assert!(matches!(queue.ready(false), Err(MedirError::Unavailable)));

        queue
            .sender()
            .send((
                id,
                Ok(RequestTiming {
                    send_ns: 1,
                    receive_ns: 2,
                    total_ns: 3,
                }),
            ))
            .expect("send completion");
        assert_eq!(queue.ready(true).unwrap(), id);
        let timing = queue.take(id).unwrap();
        assert_eq!(timing.total_ns, 3);
        assert!(queue.take(id).is_err());
    }
}
