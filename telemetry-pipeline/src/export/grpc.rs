//! OTLP over gRPC with `tonic`.
//!
//! The channel needs a tokio reactor while the exporter is driven by a plain
//! worker thread, so each client owns a one-worker runtime and spawns every
//! call onto it.
use super::ResolvedConfig;
use crate::error::{ConfigError, ExportError, ExportResult};
use crate::{pipeline_debug, suppression};
use opentelemetry_proto::tonic::collector::logs::v1::{
    logs_service_client::LogsServiceClient, ExportLogsServiceRequest,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_client::TraceServiceClient, ExportTraceServiceRequest,
};
use std::fmt;
use std::time::Duration;
use tokio::runtime::Runtime;
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;
use tonic::{Code, Request, Status};

pub(crate) struct GrpcClient {
    runtime: Option<Runtime>,
    channel: Channel,
    metadata: MetadataMap,
    timeout: Duration,
}

impl fmt::Debug for GrpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl GrpcClient {
    pub(crate) fn new(config: ResolvedConfig, signal: &'static str) -> Result<Self, ConfigError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("telemetry.{signal}.grpc"))
            .on_thread_start(suppression::suppress_current_thread)
            .enable_all()
            .build()
            .map_err(|e| ConfigError::ThreadSpawnFailed(e.to_string()))?;

        let endpoint_str = config.endpoint.to_string();
        let endpoint = Channel::from_shared(endpoint_str.clone())
            .map_err(|e| ConfigError::InvalidUri(endpoint_str.clone(), e.to_string()))?
            .timeout(config.timeout)
            .connect_timeout(config.timeout);

        // connect_lazy spawns the connection task on the current runtime.
        let channel = {
            let _guard = runtime.enter();
            endpoint.connect_lazy()
        };

        pipeline_debug!(name: "GrpcClient.Built", signal = signal, endpoint = endpoint_str);

        Ok(GrpcClient {
            runtime: Some(runtime),
            channel,
            metadata: MetadataMap::from_headers(config.headers),
            timeout: config.timeout,
        })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        *request.metadata_mut() = self.metadata.clone();
        request
    }

    pub(crate) async fn export_traces(&self, request: ExportTraceServiceRequest) -> ExportResult {
        let runtime = self.runtime.as_ref().ok_or(ExportError::AlreadyShutdown)?;
        let mut client = TraceServiceClient::new(self.channel.clone());
        let request = self.request(request);
        let result = runtime
            .spawn(async move { client.export(request).await.map(|_| ()) })
            .await;
        self.finish("traces", result)
    }

    pub(crate) async fn export_logs(&self, request: ExportLogsServiceRequest) -> ExportResult {
        let runtime = self.runtime.as_ref().ok_or(ExportError::AlreadyShutdown)?;
        let mut client = LogsServiceClient::new(self.channel.clone());
        let request = self.request(request);
        let result = runtime
            .spawn(async move { client.export(request).await.map(|_| ()) })
            .await;
        self.finish("logs", result)
    }

    fn finish(
        &self,
        signal: &'static str,
        result: Result<Result<(), Status>, tokio::task::JoinError>,
    ) -> ExportResult {
        match result {
            Ok(Ok(())) => {
                pipeline_debug!(name: "GrpcClient.ExportSucceeded", signal = signal);
                Ok(())
            }
            Ok(Err(status)) => {
                pipeline_debug!(
                    name: "GrpcClient.ExportFailed",
                    signal = signal,
                    error = format!("{status:?}")
                );
                Err(status_to_error(&status, self.timeout))
            }
            Err(join_error) => Err(ExportError::Transport(join_error.to_string())),
        }
    }
}

fn status_to_error(status: &Status, timeout: Duration) -> ExportError {
    match status.code() {
        Code::DeadlineExceeded => ExportError::Timeout(timeout),
        Code::Unavailable | Code::Cancelled | Code::Aborted | Code::Unknown => {
            ExportError::Transport(format!("{}: {}", status.code(), status.message()))
        }
        code => ExportError::Rejected(format!("{code}: {}", status.message())),
    }
}

impl Drop for GrpcClient {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which panics inside an async context.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
