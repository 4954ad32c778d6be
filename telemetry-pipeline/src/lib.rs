//! Span and log emission for services, with correlation, batching and OTLP
//! export.
//!
//! # Overview
//!
//! A [`TelemetryPipeline`] owns two pipelines that share one [`Resource`]:
//!
//! - the **span pipeline**: a [`Tracer`] records timed operations and hands
//!   each finished span to a batch processor;
//! - the **log pipeline**: a [`Logger`] (or the `tracing` bridge in
//!   [`appender`]) emits records that are mirrored to the console and handed
//!   to a second batch processor.
//!
//! Log records emitted while a span is active carry that span's trace id and
//! span id, so a backend can join them. Which span is active is tracked by a
//! [`CorrelationContext`], a stack of open spans that callers pass explicitly
//! or install for the current thread or task.
//!
//! Emitting never blocks and never fails: records are queued, and background
//! workers export them in batches through an [`export::OtlpExporterBuilder`]
//! exporter (gRPC or HTTP). A failed batch is reported once and dropped.
//!
//! # Getting started
//!
//! ```no_run
//! use telemetry_pipeline::export::OtlpExporterBuilder;
//! use telemetry_pipeline::logs::Severity;
//! use telemetry_pipeline::trace::CorrelationContext;
//! use telemetry_pipeline::TelemetryPipeline;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = TelemetryPipeline::builder()
//!         .with_service_name("checkout")
//!         .with_otlp_exporter(OtlpExporterBuilder::new().with_endpoint("http://localhost:4317"))
//!         .build()?;
//!
//!     let tracer = pipeline.tracer("checkout");
//!     let logger = pipeline.logger("checkout");
//!     let cx = CorrelationContext::new();
//!
//!     tracer.in_span(&cx, "charge-card", |span| {
//!         logger.emit_in(&cx, Severity::Info, "charging card");
//!         span.set_status(telemetry_pipeline::trace::Status::Ok);
//!     });
//!
//!     pipeline.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Exporters read the standard `OTEL_EXPORTER_OTLP_*` variables (see
//! [`export`]), the resource reads `OTEL_SERVICE_NAME` and
//! `OTEL_RESOURCE_ATTRIBUTES`, and the console sink reads
//! `TELEMETRY_CONSOLE_FORMAT` and `TELEMETRY_CONSOLE_FIELDS`. Values set in
//! code take precedence over the environment.
//!
//! # Crate Feature Flags
//!
//! * `grpc-tonic`: OTLP over gRPC with `tonic`. Enabled by default.
//! * `http-proto`: OTLP over HTTP with binary protobuf payloads. Enabled by
//!   default.
//! * `http-json`: OTLP over HTTP with JSON payloads.
//! * `internal-logs`: the pipeline's own diagnostics are emitted as `tracing`
//!   events. Enabled by default.
//!
//! [`Tracer`]: trace::Tracer
//! [`Logger`]: logs::Logger
//! [`Resource`]: resource::Resource
//! [`CorrelationContext`]: trace::CorrelationContext
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unused
)]
#![cfg_attr(
    docsrs,
    feature(doc_cfg, doc_auto_cfg),
    deny(rustdoc::broken_intra_doc_links)
)]

pub mod internal_logging;

pub mod appender;
pub mod batch;
pub mod common;
pub mod error;
pub mod export;
pub mod logs;
pub mod pipeline;
pub mod resource;
pub mod suppression;
pub mod trace;

pub use pipeline::{ConfigErrorPolicy, ShutdownGuard, TelemetryPipeline};

#[doc(hidden)]
pub mod _private {
    #[cfg(feature = "internal-logs")]
    pub use tracing::{debug, error, info, warn};
}
