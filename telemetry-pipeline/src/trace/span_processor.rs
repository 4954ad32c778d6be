//! # Span Processor Interface
//!
//! Span processors receive every span once it has ended and pass it on to a
//! [`SpanExporter`]. Processors are registered on a
//! [`TracerProvider`](crate::trace::TracerProvider) and called in the order
//! they were added.
//!
//! ```ascii
//!   +-----+--------------+   +-----------------------+   +-------------------+
//!   |     |              |   |                       |   |                   |
//!   |     |              |   | (Batch)SpanProcessor  |   |    SpanExporter   |
//!   |     |              +---> (Simple)SpanProcessor +--->  (OtlpSpanExporter)|
//!   |     |              |   |                       |   |                   |
//!   | SDK | Span.end()   |   +-----------------------+   +-------------------+
//!   |     |              |
//!   +-----+--------------+
//! ```
use crate::batch::{BatchConfig, BatchExport, BatchWorker, PipelineStats, StatsCounters};
use crate::error::{ConfigError, ExportResult, PipelineError, PipelineResult};
use crate::pipeline_debug;
use crate::trace::{SpanData, SpanExporter};
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// `SpanProcessor` is an interface which allows hooks for span end method
/// invocations.
pub trait SpanProcessor: Send + Sync + Debug {
    /// `on_end` is called after a span is ended. It is called synchronously
    /// on the thread that ended the span, so it must not block.
    fn on_end(&self, span: SpanData);
    /// Force the spans lying in the cache to be exported.
    fn force_flush(&self) -> PipelineResult;
    /// Shuts down the processor. Called when the pipeline is shut down. This
    /// is an opportunity for processors to do any cleanup required.
    fn shutdown(&self) -> PipelineResult;
}

/// A [`SpanProcessor`] that passes finished spans to the configured
/// `SpanExporter`, as soon as they are finished, without any batching. This is
/// typically useful for debugging and testing. For scenarios requiring higher
/// performance/throughput, consider using [`BatchSpanProcessor`].
#[derive(Debug)]
pub struct SimpleSpanProcessor<E: SpanExporter> {
    exporter: Mutex<E>,
}

impl<E: SpanExporter> SimpleSpanProcessor<E> {
    /// Create a new [SimpleSpanProcessor] using the provided exporter.
    pub fn new(exporter: E) -> Self {
        Self {
            exporter: Mutex::new(exporter),
        }
    }
}

impl<E: SpanExporter> SpanProcessor for SimpleSpanProcessor<E> {
    fn on_end(&self, span: SpanData) {
        let result = self
            .exporter
            .lock()
            .map_err(|_| PipelineError::InternalFailure("SimpleSpanProcessor mutex poison".into()))
            .map(|exporter| futures_executor::block_on(exporter.export(vec![span])));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                pipeline_debug!(
                    name: "SimpleSpanProcessor.OnEnd.ExportError",
                    error = format!("{err}")
                );
            }
            Err(err) => {
                pipeline_debug!(
                    name: "SimpleSpanProcessor.OnEnd.Error",
                    error = format!("{err}")
                );
            }
        }
    }

    fn force_flush(&self) -> PipelineResult {
        // Nothing to flush for simple span processor.
        Ok(())
    }

    fn shutdown(&self) -> PipelineResult {
        let mut exporter = self.exporter.lock()?;
        exporter
            .shutdown()
            .map_err(|err| PipelineError::InternalFailure(err.to_string()))
    }
}

/// Adapts a [`SpanExporter`] to the batch worker.
#[derive(Debug)]
struct SpanBatchExport<E>(E);

impl<E: SpanExporter + 'static> BatchExport for SpanBatchExport<E> {
    type Item = SpanData;

    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = ExportResult> + Send {
        self.0.export(batch)
    }

    fn shutdown(&mut self) -> ExportResult {
        self.0.shutdown()
    }
}

/// A [`SpanProcessor`] that buffers finished spans and exports them in
/// batches from a dedicated background thread.
///
/// Ending a span never blocks on export: the span is queued, and dropped with
/// a warning if the queue is full. A batch is exported once
/// `max_export_batch_size` spans are queued or `scheduled_delay` has elapsed
/// since the previous export. [`shutdown`] exports everything still queued
/// and joins the background thread.
///
/// ```
/// use telemetry_pipeline::batch::BatchConfigBuilder;
/// use telemetry_pipeline::trace::{BatchSpanProcessor, InMemorySpanExporter, TracerProvider};
/// use std::time::Duration;
///
/// let processor = BatchSpanProcessor::builder(InMemorySpanExporter::default())
///     .with_batch_config(
///         BatchConfigBuilder::spans()
///             .with_max_export_batch_size(100)
///             .with_scheduled_delay(Duration::from_millis(200))
///             .build(),
///     )
///     .build()
///     .unwrap();
///
/// let provider = TracerProvider::builder()
///     .with_span_processor(processor)
///     .build();
/// provider.shutdown().unwrap();
/// ```
///
/// [`shutdown`]: SpanProcessor::shutdown
pub struct BatchSpanProcessor {
    worker: BatchWorker<SpanData>,
}

impl Debug for BatchSpanProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSpanProcessor")
            .field("stats", &self.worker.stats())
            .finish()
    }
}

impl BatchSpanProcessor {
    /// Creates a new instance of `BatchSpanProcessor`.
    pub fn new<E>(exporter: E, config: BatchConfig) -> Result<Self, ConfigError>
    where
        E: SpanExporter + 'static,
    {
        Ok(BatchSpanProcessor {
            worker: BatchWorker::spawn(SpanBatchExport(exporter), config, "span")?,
        })
    }

    /// Create a new batch processor builder
    pub fn builder<E>(exporter: E) -> BatchSpanProcessorBuilder<E>
    where
        E: SpanExporter + 'static,
    {
        BatchSpanProcessorBuilder {
            exporter,
            config: None,
        }
    }

    /// What this processor has done with the spans it received so far.
    pub fn stats(&self) -> PipelineStats {
        self.worker.stats()
    }

    pub(crate) fn stats_counters(&self) -> Arc<StatsCounters> {
        self.worker.stats_counters()
    }
}

impl SpanProcessor for BatchSpanProcessor {
    fn on_end(&self, span: SpanData) {
        self.worker.enqueue(span);
    }

    fn force_flush(&self) -> PipelineResult {
        self.worker.force_flush()
    }

    fn shutdown(&self) -> PipelineResult {
        self.worker.shutdown()
    }
}

/// A builder for creating [`BatchSpanProcessor`] instances.
#[derive(Debug)]
pub struct BatchSpanProcessorBuilder<E> {
    exporter: E,
    config: Option<BatchConfig>,
}

impl<E> BatchSpanProcessorBuilder<E>
where
    E: SpanExporter + 'static,
{
    /// Set the BatchConfig for [BatchSpanProcessorBuilder]. Defaults to
    /// [`BatchConfig::spans`].
    pub fn with_batch_config(self, config: BatchConfig) -> Self {
        BatchSpanProcessorBuilder {
            config: Some(config),
            ..self
        }
    }

    /// Build a batch processor, starting its background thread.
    pub fn build(self) -> Result<BatchSpanProcessor, ConfigError> {
        let config = self.config.unwrap_or_else(BatchConfig::spans);
        BatchSpanProcessor::new(self.exporter, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfigBuilder;
    use crate::error::ExportError;
    use crate::trace::{CorrelationContext, InMemorySpanExporter, TracerProvider};
    use std::time::Duration;

    fn batch_config(batch_size: usize) -> BatchConfig {
        BatchConfigBuilder::spans()
            .with_max_export_batch_size(batch_size)
            .with_scheduled_delay(Duration::from_secs(3600))
            .build()
    }

    #[test]
    fn simple_span_processor_exports_on_end() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_span_processor(SimpleSpanProcessor::new(exporter.clone()))
            .build();
        let cx = CorrelationContext::new();

        provider.tracer("test").in_span(&cx, "op", |_| {
            assert!(exporter.get_finished_spans().unwrap().is_empty());
        });
        assert_eq!(exporter.get_batches().unwrap().len(), 1);
    }

    #[test]
    fn simple_span_processor_swallows_export_errors() {
        let exporter = InMemorySpanExporter::default();
        exporter.fail_with(Some(ExportError::Transport("connection refused".into())));
        let processor = SimpleSpanProcessor::new(exporter.clone());
        let provider = TracerProvider::builder()
            .with_span_processor(processor)
            .build();
        let cx = CorrelationContext::new();

        provider.tracer("test").in_span(&cx, "op", |_| {});
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn batch_span_processor_exports_on_shutdown() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::builder(exporter.clone())
            .with_batch_config(batch_config(512))
            .build()
            .unwrap();
        let provider = TracerProvider::builder()
            .with_span_processor(processor)
            .build();
        let tracer = provider.tracer("test");
        let cx = CorrelationContext::new();

        for name in ["first", "second", "third"] {
            tracer.in_span(&cx, name, |_| {});
        }
        assert!(exporter.get_finished_spans().unwrap().is_empty());

        provider.shutdown().unwrap();
        let names: Vec<_> = exporter
            .get_finished_spans()
            .unwrap()
            .into_iter()
            .map(|span| span.name)
            .collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn batch_span_processor_force_flush() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::new(exporter.clone(), batch_config(512)).unwrap();
        let provider = TracerProvider::builder()
            .with_span_processor(processor)
            .build();
        let cx = CorrelationContext::new();

        provider.tracer("test").in_span(&cx, "op", |_| {});
        provider.force_flush().unwrap();
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn batch_span_processor_counts_failures() {
        let exporter = InMemorySpanExporter::default();
        exporter.fail_with(Some(ExportError::Rejected("503".into())));
        let processor = BatchSpanProcessor::new(exporter.clone(), batch_config(1)).unwrap();

        let provider = TracerProvider::builder()
            .with_span_processor(processor)
            .build();
        let cx = CorrelationContext::new();
        provider.tracer("test").in_span(&cx, "op", |_| {});

        assert_eq!(provider.shutdown(), Ok(()));
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn batch_span_processor_stats() {
        let span = {
            let captured = InMemorySpanExporter::default();
            let provider = TracerProvider::builder()
                .with_simple_exporter(captured.clone())
                .build();
            provider
                .tracer("test")
                .in_span(&CorrelationContext::new(), "op", |_| {});
            captured.get_finished_spans().unwrap().remove(0)
        };

        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::new(exporter.clone(), batch_config(2)).unwrap();
        for _ in 0..5 {
            processor.on_end(span.clone());
        }
        processor.shutdown().unwrap();

        let stats = processor.stats();
        assert_eq!(stats.enqueued, 5);
        assert_eq!(stats.exported, 5);
        assert_eq!(stats.dropped_queue_full, 0);
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 5);
    }
}
