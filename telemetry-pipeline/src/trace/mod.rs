//! # Span pipeline
//!
//! Spans are started by a [`Tracer`] on a [`CorrelationContext`] and become
//! that context's current span until they end. A [`TracerProvider`] owns the
//! resource, the id generator and the [`SpanProcessor`]s every ended span is
//! handed to.
//!
//! ```
//! use telemetry_pipeline::trace::{CorrelationContext, InMemorySpanExporter, TracerProvider};
//!
//! let exporter = InMemorySpanExporter::default();
//! let provider = TracerProvider::builder()
//!     .with_simple_exporter(exporter.clone())
//!     .build();
//! let tracer = provider.tracer("checkout");
//!
//! let cx = CorrelationContext::new();
//! {
//!     let _span = tracer.start_span(&cx, "charge-card");
//!     // the span ends here, when it goes out of scope
//! }
//! assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
//! ```
mod context;
mod export;
mod id_generator;
pub(crate) mod provider;
mod span;
mod span_context;
mod span_processor;
mod tracer;

pub use context::CorrelationContext;
pub use export::{InMemorySpanExporter, SpanExporter};
pub use id_generator::{IdGenerator, IncrementIdGenerator, RandomIdGenerator};
pub use provider::{TracerProvider, TracerProviderBuilder};
pub use span::{Span, SpanData, Status};
pub use span_context::{SpanContext, SpanId, TraceId};
pub use span_processor::{
    BatchSpanProcessor, BatchSpanProcessorBuilder, SimpleSpanProcessor, SpanProcessor,
};
pub use tracer::{SpanBuilder, Tracer};
