//! gRPC implementations of the client contexts
//!
//! Mirrors the HTTP transport over the `InferenceService` defined in
//! `proto/inference.proto`. Blocking inference parks the worker thread on
//! the shared tokio runtime; pipelined inference spawns one unary call
//! per in-flight request, completions delivered over the context's
//! completion queue. The channel is lazy, so construction succeeds even
//! before the service is reachable.

use std::time::Instant;

use tonic::transport::{Channel, Endpoint};

use crate::client::proto::inference_service_client::InferenceServiceClient;
use crate::client::{
    proto, runtime, ClientFactory, CompletionQueue, ContextStat, InferContext, ModelConfig,
    ModelStatus, ProfileContext, RequestTiming, RunOptions, ServerStatusContext, TensorConfig,
};
use crate::error::{MedirError, Result};

fn rpc_error(context: &str, status: &tonic::Status) -> MedirError {
    MedirError::Server(format!("{context}: {} ({})", status.message(), status.code()))
}

fn convert_bucket(bucket: Option<proto::StatBucket>) -> crate::client::StatBucket {
    let bucket = bucket.unwrap_or_default();
    crate::client::StatBucket {
        count: bucket.count,
        total_time_ns: bucket.total_time_ns,
    }
}

fn convert_status(response: proto::ModelStatusResponse) -> ModelStatus {
    let config = response.config.unwrap_or_default();
    ModelStatus {
        config: ModelConfig {
            name: config.name,
            max_batch_size: config.max_batch_size,
            inputs: config
                .inputs
                .into_iter()
                .map(|input| TensorConfig {
                    name: input.name,
                    dims: input.dims,
                    element_byte_size: input.element_byte_size,
                })
                .collect(),
        },
        version_status: response
            .version_status
            .into_iter()
            .map(|(version, status)| {
                (
                    version,
                    crate::client::ModelVersionStatus {
                        infer_stats: status
                            .infer_stats
                            .into_iter()
                            .map(|(batch, stats)| {
                                (
                                    batch,
                                    crate::client::InferBatchStats {
                                        success: convert_bucket(stats.success),
                                        queue: convert_bucket(stats.queue),
                                        compute: convert_bucket(stats.compute),
                                    },
                                )
                            })
                            .collect(),
                    },
                )
            })
            .collect(),
    }
}

/// Factory for gRPC-backed contexts
pub struct GrpcClientFactory {
    channel: Channel,
    model_name: String,
    model_version: i64,
}

impl GrpcClientFactory {
    /// Create a factory for the given endpoint and model
    ///
    /// # Errors
    ///
    /// Returns `Server` when the endpoint URI is malformed or the async
    /// runtime cannot be constructed.
    pub fn new(url: &str, model_name: &str, model_version: i64) -> Result<Self> {
        let uri = if url.contains("://") {
            url.to_string()
        } else {
            format!("http://{url}")
        };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| MedirError::Server(format!("invalid service endpoint: {e}")))?;
        // connect_lazy needs an ambient runtime for its connector.
        let channel = runtime()?.block_on(async { endpoint.connect_lazy() });
        Ok(Self {
            channel,
            model_name: model_name.to_string(),
            model_version,
        })
    }

    fn fetch_status(&self) -> Result<ModelStatus> {
        let mut client = InferenceServiceClient::new(self.channel.clone());
        let model_name = self.model_name.clone();
        let response = runtime()?
            .block_on(async move {
                client
                    .model_status(proto::ModelStatusRequest { model_name })
                    .await
            })
            .map_err(|status| rpc_error("failed to fetch model status", &status))?;
        Ok(convert_status(response.into_inner()))
    }
}

impl ClientFactory for GrpcClientFactory {
    fn infer_context(&self) -> Result<Box<dyn InferContext>> {
        let config = self.fetch_status()?.config;
        Ok(Box::new(GrpcInferContext {
            client: InferenceServiceClient::new(self.channel.clone()),
            model_name: self.model_name.clone(),
            model_version: self.model_version,
            config,
            batch_size: 0,
            inputs: Vec::new(),
            completions: CompletionQueue::new(),
            stat: ContextStat::default(),
        }))
    }

    fn status_context(&self) -> Result<Box<dyn ServerStatusContext>> {
        Ok(Box::new(GrpcServerStatusContext {
            client: InferenceServiceClient::new(self.channel.clone()),
            model_name: self.model_name.clone(),
        }))
    }

    fn profile_context(&self) -> Result<Box<dyn ProfileContext>> {
        Ok(Box::new(GrpcProfileContext {
            client: InferenceServiceClient::new(self.channel.clone()),
        }))
    }
}

/// gRPC inference context
pub struct GrpcInferContext {
    client: InferenceServiceClient<Channel>,
    model_name: String,
    model_version: i64,
    config: ModelConfig,
    batch_size: usize,
    inputs: Vec<proto::InferInput>,
    completions: CompletionQueue,
    stat: ContextStat,
}

impl GrpcInferContext {
    /// Assemble the request message, returning it with the marshal time
    fn marshal(&self) -> (proto::InferRequest, u64) {
        let marshal_start = Instant::now();
        let request = proto::InferRequest {
            model_name: self.model_name.clone(),
            model_version: self.model_version,
            batch_size: u32::try_from(self.batch_size).unwrap_or(u32::MAX),
            inputs: self.inputs.clone(),
        };
        let send_ns = u64::try_from(marshal_start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        (request, send_ns)
    }
}

impl InferContext for GrpcInferContext {
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
            .map(|input| proto::InferInput {
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
        let (request, send_ns) = self.marshal();
        let total_start = Instant::now();
        let mut client = self.client.clone();
        let response = runtime()?
            .block_on(async move { client.infer(request).await })
            .map_err(|status| rpc_error("inference request failed", &status))?;
        let receive_start = Instant::now();
        let _ack = response.into_inner();
        let receive_ns = u64::try_from(receive_start.elapsed().as_nanos()).unwrap_or(u64::MAX);
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
        let (request, send_ns) = self.marshal();
        let rt = runtime()?;
        let mut client = self.client.clone();
        let id = self.completions.allocate_id();
        let tx = self.completions.sender();
        rt.spawn(async move {
            let total_start = Instant::now();
            let outcome = match client.infer(request).await {
                Ok(response) => {
                    let receive_start = Instant::now();
                    let _ack = response.into_inner();
                    let receive_ns =
                        u64::try_from(receive_start.elapsed().as_nanos()).unwrap_or(u64::MAX);
                    let total_ns = send_ns
                        + u64::try_from(total_start.elapsed().as_nanos()).unwrap_or(u64::MAX);
                    Ok(RequestTiming {
                        send_ns,
                        receive_ns,
                        total_ns,
                    })
                }
                Err(status) => Err(rpc_error("inference request failed", &status)),
            };
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

/// gRPC server status context
pub struct GrpcServerStatusContext {
    client: InferenceServiceClient<Channel>,
    model_name: String,
}

impl ServerStatusContext for GrpcServerStatusContext {
    fn model_status(&mut self) -> Result<ModelStatus> {
        let mut client = self.client.clone();
        let model_name = self.model_name.clone();
        let response = runtime()?
            .block_on(async move {
                client
                    .model_status(proto::ModelStatusRequest { model_name })
                    .await
            })
            .map_err(|status| rpc_error("failed to fetch model status", &status))?;
        Ok(convert_status(response.into_inner()))
    }
}

/// gRPC profiling context
pub struct GrpcProfileContext {
    client: InferenceServiceClient<Channel>,
}

impl GrpcProfileContext {
    fn send_cmd(&mut self, cmd: &str) -> Result<()> {
        let mut client = self.client.clone();
        let request = proto::ProfileRequest {
            cmd: cmd.to_string(),
        };
        runtime()?
            .block_on(async move { client.profile(request).await })
            .map_err(|status| rpc_error("profile request failed", &status))?;
        Ok(())
    }
}

impl ProfileContext for GrpcProfileContext {
    fn start_profile(&mut self) -> Result<()> {
        self.send_cmd("start")
    }

    fn stop_profile(&mut self) -> Result<()> {
        self.send_cmd("stop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_status_maps_versions_and_batches() {
        let mut infer_stats = std::collections::HashMap::new();
        infer_stats.insert(
            4u32,
            proto::InferBatchStats {
                success: Some(proto::StatBucket {
                    count: 7,
                    total_time_ns: 700,
                }),
                queue: Some(proto::StatBucket {
                    count: 7,
                    total_time_ns: 70,
                }),
                compute: None,
            },
        );
        let mut version_status = std::collections::HashMap::new();
        version_status.insert(3i64, proto::ModelVersionStatus { infer_stats });
        let response = proto::ModelStatusResponse {
            config: Some(proto::ModelConfig {
                name: "resnet".to_string(),
                max_batch_size: 16,
                inputs: vec![proto::TensorConfig {
                    name: "input0".to_string(),
                    dims: vec![3, 8],
                    element_byte_size: 4,
                }],
            }),
            version_status,
        };

        let status = convert_status(response);
        assert_eq!(status.config.max_batch_size, 16);
        assert_eq!(status.config.inputs[0].byte_size(), Some(96));
        let stats = status.version_status[&3].infer_stats[&4];
        assert_eq!(stats.success.count, 7);
        assert_eq!(stats.queue.total_time_ns, 70);
        // Missing compute bucket converts to zeros.
        assert_eq!(stats.compute.count, 0);
    }

    #[test]
    fn test_malformed_endpoint_rejected() {
        let result = GrpcClientFactory::new("http://exa mple:8001", "m", -1);
        assert!(result.is_err());
    }
}
