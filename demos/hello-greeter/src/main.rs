//! A small HTTP service answering `GET /` with a random greeting.
//!
//! Every request gets a server span and a `hello-span` child span; the two
//! log lines it writes carry their trace ids, both on the console and in the
//! OTLP export. Configure the collector with the usual variables, for example:
//!
//! ```text
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317
//! OTEL_EXPORTER_OTLP_HEADERS="authorization=Bearer <token>"
//! ```
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{service::service_fn, Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rand::Rng;
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use telemetry_pipeline::common::KeyValue;
use telemetry_pipeline::export::OtlpExporterBuilder;
use telemetry_pipeline::trace::{CorrelationContext, Status};
use telemetry_pipeline::{ConfigErrorPolicy, TelemetryPipeline};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const COLORS: [&str; 8] = [
    "red", "blue", "green", "purple", "orange", "pink", "yellow", "cyan",
];
const ANIMALS: [&str; 8] = [
    "cat", "dog", "elephant", "giraffe", "penguin", "dolphin", "eagle", "tiger",
];

fn init_pipeline() -> Result<TelemetryPipeline, Box<dyn Error + Send + Sync + 'static>> {
    let pipeline = TelemetryPipeline::builder()
        .with_service_name("hello-greeter")
        .with_resource_attribute("service.version", env!("CARGO_PKG_VERSION"))
        .with_otlp_exporter(OtlpExporterBuilder::new())
        // A broken exporter configuration must not take the service down.
        .with_config_error_policy(ConfigErrorPolicy::Disable)
        .build()?;
    Ok(pipeline)
}

fn init_subscriber(pipeline: &TelemetryPipeline) {
    // Keep the transport crates out of the pipeline, otherwise every export
    // would log about itself and be exported again.
    let filter_pipeline = EnvFilter::new("info")
        .add_directive("hyper=off".parse().unwrap())
        .add_directive("tonic=off".parse().unwrap())
        .add_directive("h2=off".parse().unwrap())
        .add_directive("reqwest=off".parse().unwrap());
    let pipeline_layer = pipeline.tracing_layer().with_filter(filter_pipeline);

    // Application records already reach stdout through the console sink, so
    // the fmt layer only prints the pipeline's own diagnostics.
    let filter_fmt =
        EnvFilter::new("off").add_directive("telemetry-pipeline=info".parse().unwrap());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(filter_fmt);

    tracing_subscriber::registry()
        .with(pipeline_layer)
        .with(fmt_layer)
        .init();
}

fn greeting() -> String {
    let mut rng = rand::rng();
    let color = COLORS[rng.random_range(0..COLORS.len())];
    let animal = ANIMALS[rng.random_range(0..ANIMALS.len())];
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    format!(
        "<p>Hello, World! Today's color is {color} and the animal is {animal}. Timestamp: {timestamp}</p>"
    )
}

async fn handle_hello(
    pipeline: &TelemetryPipeline,
    cx: &CorrelationContext,
) -> Response<Full<Bytes>> {
    info!("Hello endpoint called");
    let body = pipeline.tracer("hello-greeter").in_span(cx, "hello-span", |_span| {
        let body = greeting();
        info!("Generated response with random values");
        body
    });
    Response::new(Full::new(Bytes::from(body)))
}

async fn router(
    pipeline: TelemetryPipeline,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let cx = CorrelationContext::new();
    let tracer = pipeline.tracer("hello-greeter");
    let mut span = tracer.start_span(&cx, format!("{} {}", req.method(), req.uri().path()));
    span.set_attribute(KeyValue::new("http.request.method", req.method().to_string()));
    span.set_attribute(KeyValue::new("url.path", req.uri().path().to_string()));

    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => cx.clone().scope(handle_hello(&pipeline, &cx)).await,
        _ => {
            let mut not_found = Response::new(Full::new(Bytes::from_static(b"Not Found")));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            not_found
        }
    };

    span.set_attribute(KeyValue::new(
        "http.response.status_code",
        i64::from(response.status().as_u16()),
    ));
    if response.status().is_server_error() {
        span.set_status(Status::error(response.status().to_string()));
    }
    let _ = span.end();
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
    use hyper_util::server::conn::auto::Builder;

    let pipeline = init_pipeline()?;
    init_subscriber(&pipeline);
    let guard = pipeline.shutdown_guard();

    let addr = SocketAddr::from(([127, 0, 0, 1], 5000));
    let listener = TcpListener::bind(addr).await?;
    println!("Listening on http://{addr}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| router(pipeline.clone(), req));
                    if let Err(err) = Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        eprintln!("{err}");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Exports block, keep them off the async workers.
    tokio::task::spawn_blocking(move || guard.shutdown()).await??;
    Ok(())
}
