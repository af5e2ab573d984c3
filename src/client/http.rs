//! HTTP implementations of the client contexts
//!
//! Talks JSON to the service's `/v1` endpoints. Blocking inference goes
//! through `reqwest::blocking`; pipelined inference reuses the shared
//! tokio runtime with the async `reqwest` client, one task per in-flight
//! request, completions delivered over the context's completion queue.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::client::{
    runtime, ClientFactory, CompletionQueue, ContextStat, InferContext, ModelConfig, ModelStatus,
    ProfileContext, RequestTiming, RunOptions, ServerStatusContext, TensorConfig,
};
use crate::error::{MedirError, Result};

/// One input tensor binding carried in an inference request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferInputPayload {
    /// Input tensor name
    pub name: String,
    /// Raw bytes, one entry per batch slot
    pub batches: Vec<Vec<u8>>,
}

/// Body of `POST /v1/models/{model}/infer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferRequestBody {
    /// Requested model version; -1 selects the latest
    pub model_version: i64,
    /// Batch entries per request
    pub batch_size: usize,
    /// Input tensor bindings
    pub inputs: Vec<InferInputPayload>,
}

#[derive(Debug, Clone, Serialize)]
struct ProfileRequestBody {
    cmd: &'static str,
}

/// Factory for HTTP-backed contexts
pub struct HttpClientFactory {
    base: String,
    model_name: String,
    model_version: i64,
}

impl HttpClientFactory {
    /// Create a factory for the given endpoint and model
    #[must_use]
    pub fn new(url: &str, model_name: &str, model_version: i64) -> Self {
        let base = if url.starts_with("http://") || url.starts_with("https://") {
            url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", url.trim_end_matches('/'))
        };
        Self {
            base,
            model_name: model_name.to_string(),
            model_version,
        }
    }

    fn status_url(&self) -> String {
        format!("{}/v1/models/{}/status", self.base, self.model_name)
    }

    fn infer_url(&self) -> String {
        format!("{}/v1/models/{}/infer", self.base, self.model_name)
    }

    fn profile_url(&self) -> String {
        format!("{}/v1/profile", self.base)
    }
}

impl ClientFactory for HttpClientFactory {
    fn infer_context(&self) -> Result<Box<dyn InferContext>> {
        let client = reqwest::blocking::Client::new();
        let config = fetch_model_config(&client, &self.status_url())?;
        Ok(Box::new(HttpInferContext {
            client,
            async_client: None,
            infer_url: self.infer_url(),
            model_version: self.model_version,
            config,
            batch_size: 0,
            inputs: Vec::new(),
            completions: CompletionQueue::new(),
            stat: ContextStat::default(),
        }))
    }

    fn status_context(&self) -> Result<Box<dyn ServerStatusContext>> {
        Ok(Box::new(HttpServerStatusContext {
            client: reqwest::blocking::Client::new(),
            url: self.status_url(),
        }))
    }

    fn profile_context(&self) -> Result<Box<dyn ProfileContext>> {
        Ok(Box::new(HttpProfileContext {
            client: reqwest::blocking::Client::new(),
            url: self.profile_url(),
        }))
    }
}

fn fetch_model_config(client: &reqwest::blocking::Client, url: &str) -> Result<ModelConfig> {
    let response = client
        .get(url)
        .send()
        .map_err(|e| MedirError::Server(format!("failed to fetch model status: {e}")))?;
    if !response.status().is_success() {
        return Err(MedirError::Server(format!(
            "model status request failed with HTTP {}",
            response.status()
        )));
    }
    let status: ModelStatus = response
        .json()
        .map_err(|e| MedirError::Server(format!("malformed model status: {e}")))?;
    Ok(status.config)
}

/// HTTP inference context
pub struct HttpInferContext {
    client: reqwest::blocking::Client,
    async_client: Option<reqwest::Client>,
    infer_url: String,
    model_version: i64,
    config: ModelConfig,
    batch_size: usize,
    inputs: Vec<InferInputPayload>,
    completions: CompletionQueue,
    stat: ContextStat,
}

impl HttpInferContext {
    /// Serialize the request body, returning it with the marshal time
    fn marshal(&self) -> Result<(String, u64)> {
        let marshal_start = Instant::now();
        let body = InferRequestBody {
            model_version: self.model_version,
            batch_size: self.batch_size,
            inputs: self.inputs.clone(),
        };
        let body = serde_json::to_string(&body)
            .map_err(|e| MedirError::Internal(format!("failed to serialize request: {e}")))?;
        let send_ns = u64::try_from(marshal_start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Ok((body, send_ns))
    }
}

impl InferContext for HttpInferContext {
    fn model_name(&self) -> &str {
        &self.config.name
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size as usize
    }

    fn inputs(&self) -> Vec<TensorConfig> {
        self.config.inputs.clone()
    }

    fn set_run_options(&mut self, options: &RunOptions) -> Result<()> {
        if options.batch_size == 0 {
            return Err(MedirError::InvalidArgument(
                "batch size must be > 0".to_string(),
            ));
        }
        self.batch_size = options.batch_size;
        self.inputs = self
            .config
            .inputs
            .iter()
            .map(|input| InferInputPayload {
                name: input.name.clone(),
                batches: Vec::with_capacity(options.batch_size),
            })
            .collect();
        Ok(())
    }

    fn set_raw_input(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let batch_size = self.batch_size;
        let input = self
            .inputs
            .iter_mut()
            .find(|input| input.name == name)
            .ok_or_else(|| MedirError::InvalidArgument(format!("unknown input '{name}'")))?;
        if input.batches.len() >= batch_size {
            return Err(MedirError::InvalidArgument(format!(
                "input '{name}' already has {batch_size} batch entries"
            )));
        }
        input.batches.push(data.to_vec());
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let (body, send_ns) = self.marshal()?;
        let total_start = Instant::now();
        let response = self
            .client
            .post(&self.infer_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .map_err(|e| MedirError::Server(format!("inference request failed: {e}")))?;
        let status = response.status();
        let receive_start = Instant::now();
        let payload = response
            .bytes()
            .map_err(|e| MedirError::Server(format!("failed to read inference response: {e}")))?;
        let receive_ns = u64::try_from(receive_start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        if !status.is_success() {
            return Err(MedirError::Server(format!(
                "inference request failed with HTTP {status}: {}",
                String::from_utf8_lossy(&payload)
            )));
        }
        let total_ns =
            send_ns + u64::try_from(total_start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.stat.apply(&RequestTiming {
            send_ns,
            receive_ns,
            total_ns,
        });
        Ok(())
    }

    fn async_run(&mut self) -> Result<u64> {
        let (body, send_ns) = self.marshal()?;
        let rt = runtime()?;
        let client = self
            .async_client
            .get_or_insert_with(reqwest::Client::new)
            .clone();
        let id = self.completions.allocate_id();
        let tx = self.completions.sender();
        let url = self.infer_url.clone();
        rt.spawn(async move {
            let total_start = Instant::now();
            let outcome = async {
                let response = client
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| MedirError::Server(format!("inference request failed: {e}")))?;
                let status = response.status();
                let receive_start = Instant::now();
                let payload = response.bytes().await.map_err(|e| {
                    MedirError::Server(format!("failed to read inference response: {e}"))
                })?;
                let receive_ns =
                    u64::try_from(receive_start.elapsed().as_nanos()).unwrap_or(u64::MAX);
                if !status.is_success() {
                    return Err(MedirError::Server(format!(
                        "inference request failed with HTTP {status}: {}",
                        String::from_utf8_lossy(&payload)
                    )));
                }
                let total_ns =
                    send_ns + u64::try_from(total_start.elapsed().as_nanos()).unwrap_or(u64::MAX);
                Ok(RequestTiming {
                    send_ns,
                    receive_ns,
                    total_ns,
                })
            }
            .await;
            let _ = tx.send((id, outcome));
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

/// HTTP server status context
pub struct HttpServerStatusContext {
    client: reqwest::blocking::Client,
    url: String,
}

impl ServerStatusContext for HttpServerStatusContext {
    fn model_status(&mut self) -> Result<ModelStatus> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| MedirError::Server(format!("failed to fetch model status: {e}")))?;
        if !response.status().is_success() {
            return Err(MedirError::Server(format!(
                "model status request failed with HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .map_err(|e| MedirError::Server(format!("malformed model status: {e}")))
    }
}

/// HTTP profiling context
pub struct HttpProfileContext {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpProfileContext {
    fn send_cmd(&self, cmd: &'static str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&ProfileRequestBody { cmd })
            .send()
            .map_err(|e| MedirError::Server(format!("profile request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(MedirError::Server(format!(
                "profile request failed with HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl ProfileContext for HttpProfileContext {
    fn start_profile(&mut self) -> Result<()> {
        self.send_cmd("start")
    }

    fn stop_profile(&mut self) -> Result<()> {
        self.send_cmd("stop")
    }
}
