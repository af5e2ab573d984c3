//! Generated protobuf/gRPC bindings for `proto/inference.proto`
//!
//! Vendored `tonic-build` output (client side only, unused generated
//! items pruned) so that building medir does not require `protoc`.
//! Regenerate with `tonic-build` after editing the proto file.

/// One monotonically nondecreasing `(count, total_time_ns)` counter pair.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatBucket {
    #[prost(uint64, tag = "1")]
    pub count: u64,
    #[prost(uint64, tag = "2")]
    pub total_time_ns: u64,
}
/// Server-side statistics for one batch size of one model version.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InferBatchStats {
    #[prost(message, optional, tag = "1")]
    pub success: ::core::option::Option<StatBucket>,
    #[prost(message, optional, tag = "2")]
    pub queue: ::core::option::Option<StatBucket>,
    #[prost(message, optional, tag = "3")]
    pub compute: ::core::option::Option<StatBucket>,
}
/// Per-version inference statistics keyed by request batch size.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelVersionStatus {
    #[prost(map = "uint32, message", tag = "1")]
    pub infer_stats: ::std::collections::HashMap<u32, InferBatchStats>,
}
/// Shape and size description of one model input tensor. A negative dim
/// marks a variable-size axis.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorConfig {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(int64, repeated, tag = "2")]
    pub dims: ::prost::alloc::vec::Vec<i64>,
    #[prost(uint32, tag = "3")]
    pub element_byte_size: u32,
}
/// Model configuration relevant to request construction.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelConfig {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub max_batch_size: u32,
    #[prost(message, repeated, tag = "3")]
    pub inputs: ::prost::alloc::vec::Vec<TensorConfig>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelStatusRequest {
    #[prost(string, tag = "1")]
    pub model_name: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelStatusResponse {
    #[prost(message, optional, tag = "1")]
    pub config: ::core::option::Option<ModelConfig>,
    #[prost(map = "int64, message", tag = "2")]
    pub version_status: ::std::collections::HashMap<i64, ModelVersionStatus>,
}
/// One input tensor binding; one bytes entry per batch slot.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InferInput {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub batches: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InferRequest {
    #[prost(string, tag = "1")]
    pub model_name: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub model_version: i64,
    #[prost(uint32, tag = "3")]
    pub batch_size: u32,
    #[prost(message, repeated, tag = "4")]
    pub inputs: ::prost::alloc::vec::Vec<InferInput>,
}
/// Outputs are not validated by the client; the response is an opaque ack.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InferResponse {
    #[prost(uint64, tag = "1")]
    pub byte_size: u64,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileRequest {
    #[prost(string, tag = "1")]
    pub cmd: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileResponse {}
/// Generated client implementations.
pub mod inference_service_client {
    #![allow(
        unused_variables,
        dead_code,
        missing_docs,
        clippy::wildcard_imports,
        clippy::let_unit_value
    )]
    use tonic::codegen::*;
    #[derive(Debug, Clone)]
    pub struct InferenceServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl InferenceServiceClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> InferenceServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub async fn model_status(
            &mut self,
            request: impl tonic::IntoRequest<super::ModelStatusRequest>,
        ) -> std::result::Result<tonic::Response<super::ModelStatusResponse>, tonic::Status>
        {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/medir.inference.InferenceService/ModelStatus",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("medir.inference.InferenceService", "ModelStatus"));
            self.inner.unary(req, path, codec).await
        }
        pub async fn infer(
            &mut self,
            request: impl tonic::IntoRequest<super::InferRequest>,
        ) -> std::result::Result<tonic::Response<super::InferResponse>, tonic::Status> {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/medir.inference.InferenceService/Infer",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("medir.inference.InferenceService", "Infer"));
            self.inner.unary(req, path, codec).await
        }
        pub async fn profile(
            &mut self,
            request: impl tonic::IntoRequest<super::ProfileRequest>,
        ) -> std::result::Result<tonic::Response<super::ProfileResponse>, tonic::Status> {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/medir.inference.InferenceService/Profile",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("medir.inference.InferenceService", "Profile"));
            self.inner.unary(req, path, codec).await
        }
    }
}
