#![cfg(feature = "grpc-tonic")]

use opentelemetry_proto::tonic::collector::logs::v1::{
    logs_service_server::{LogsService, LogsServiceServer},
    ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_server::{TraceService, TraceServiceServer},
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use opentelemetry_proto::tonic::common::v1::any_value;
use std::net::SocketAddr;
use std::time::Duration;
use telemetry_pipeline::batch::BatchConfigBuilder;
use telemetry_pipeline::export::{OtlpExporterBuilder, Protocol};
use telemetry_pipeline::logs::Severity;
use telemetry_pipeline::resource::Resource;
use telemetry_pipeline::trace::CorrelationContext;
use telemetry_pipeline::TelemetryPipeline;
use tokio::sync::mpsc;
use tokio_stream::wrappers::TcpListenerStream;

/// An export request together with the `x-tenant` metadata it carried.
type Received<T> = (Option<String>, T);

fn tenant<T>(request: &tonic::Request<T>) -> Option<String> {
    request
        .metadata()
        .get("x-tenant")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

struct MockTraceService {
    tx: mpsc::Sender<Received<ExportTraceServiceRequest>>,
}

#[tonic::async_trait]
impl TraceService for MockTraceService {
    async fn export(
        &self,
        request: tonic::Request<ExportTraceServiceRequest>,
    ) -> Result<tonic::Response<ExportTraceServiceResponse>, tonic::Status> {
        let tenant = tenant(&request);
        self.tx
            .try_send((tenant, request.into_inner()))
            .expect("Channel full");
        Ok(tonic::Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

struct MockLogsService {
    tx: mpsc::Sender<Received<ExportLogsServiceRequest>>,
    reject: bool,
}

#[tonic::async_trait]
impl LogsService for MockLogsService {
    async fn export(
        &self,
        request: tonic::Request<ExportLogsServiceRequest>,
    ) -> Result<tonic::Response<ExportLogsServiceResponse>, tonic::Status> {
        if self.reject {
            return Err(tonic::Status::invalid_argument("logs are not accepted"));
        }
        let tenant = tenant(&request);
        self.tx
            .try_send((tenant, request.into_inner()))
            .expect("Channel full");
        Ok(tonic::Response::new(ExportLogsServiceResponse {
            partial_success: None,
        }))
    }
}

struct MockCollector {
    addr: SocketAddr,
    traces: mpsc::Receiver<Received<ExportTraceServiceRequest>>,
    logs: mpsc::Receiver<Received<ExportLogsServiceRequest>>,
}

async fn setup(reject_logs: bool) -> MockCollector {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().unwrap();

    let (trace_tx, traces) = mpsc::channel(10);
    let (logs_tx, logs) = mpsc::channel(10);
    let trace_service = TraceServiceServer::new(MockTraceService { tx: trace_tx });
    let logs_service = LogsServiceServer::new(MockLogsService {
        tx: logs_tx,
        reject: reject_logs,
    });
    tokio::task::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(trace_service)
            .add_service(logs_service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("Server failed")
    });

    MockCollector { addr, traces, logs }
}

fn pipeline(addr: SocketAddr) -> TelemetryPipeline {
    TelemetryPipeline::builder()
        .with_resource(Resource::empty())
        .with_service_name("hello-greeter")
        .with_otlp_exporter(
            OtlpExporterBuilder::new()
                .with_protocol(Protocol::Grpc)
                .with_endpoint(format!("http://{addr}"))
                .with_header("x-tenant", "blue")
                .with_timeout(Duration::from_secs(5)),
        )
        .with_span_batch_config(
            BatchConfigBuilder::spans()
                .with_max_export_batch_size(1)
                .build(),
        )
        .with_log_batch_config(
            BatchConfigBuilder::logs()
                .with_max_export_batch_size(1)
                .build(),
        )
        .without_console()
        .build()
        .expect("pipeline builds")
}

#[tokio::test(flavor = "multi_thread")]
async fn span_and_log_reach_the_grpc_collector_correlated() {
    let mut collector = setup(false).await;
    let addr = collector.addr;

    // Building, emitting and shutting down block on the batch workers.
    tokio::task::spawn_blocking(move || {
        let pipeline = pipeline(addr);
        let cx = CorrelationContext::new();
        let logger = pipeline.logger("greeter");
        pipeline.tracer("greeter").in_span(&cx, "op", |_span| {
            logger.emit_in(&cx, Severity::Info, "hello");
        });
        pipeline.shutdown().expect("clean shutdown");
    })
    .await
    .unwrap();

    let (trace_tenant, traces) = collector.traces.recv().await.expect("missing trace request");
    let (log_tenant, logs) = collector.logs.recv().await.expect("missing log request");
    assert_eq!(trace_tenant.as_deref(), Some("blue"));
    assert_eq!(log_tenant.as_deref(), Some("blue"));

    let scope_spans = traces
        .resource_spans
        .first()
        .unwrap()
        .scope_spans
        .first()
        .unwrap();
    assert_eq!(
        scope_spans.scope.as_ref().map(|scope| scope.name.as_str()),
        Some("greeter")
    );
    let span = scope_spans.spans.first().unwrap();
    assert_eq!("op", span.name);

    let log = logs
        .resource_logs
        .first()
        .unwrap()
        .scope_logs
        .first()
        .unwrap()
        .log_records
        .first()
        .unwrap();
    assert_eq!(
        log.body.as_ref().and_then(|body| body.value.clone()),
        Some(any_value::Value::StringValue("hello".into()))
    );
    assert_eq!(log.trace_id, span.trace_id);
    assert_eq!(log.span_id, span.span_id);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_log_batch_is_dropped_while_spans_still_arrive() {
    let mut collector = setup(true).await;
    let addr = collector.addr;

    let log_stats = tokio::task::spawn_blocking(move || {
        let pipeline = pipeline(addr);
        let cx = CorrelationContext::new();
        let logger = pipeline.logger("greeter");
        pipeline.tracer("greeter").in_span(&cx, "op", |_span| {
            logger.emit_in(&cx, Severity::Warn, "refused");
        });
        assert_eq!(pipeline.shutdown(), Ok(()));
        pipeline.log_stats().unwrap()
    })
    .await
    .unwrap();

    let (_, traces) = collector.traces.recv().await.expect("missing trace request");
    assert_eq!(traces.resource_spans[0].scope_spans[0].spans[0].name, "op");

    assert_eq!(log_stats.enqueued, 1);
    assert_eq!(log_stats.exported, 0);
    assert_eq!(log_stats.failed_batches, 1);
    assert_eq!(log_stats.dropped_export_failed, 1);
}
