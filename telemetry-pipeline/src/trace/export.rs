use crate::error::{ExportError, ExportResult, PipelineError};
use crate::trace::SpanData;
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// `SpanExporter` defines the interface that protocol-specific exporters must
/// implement so that they can be plugged into the pipeline.
///
/// An export is a single attempt: the exporter must not retry on its own
/// unless it was configured to, and it must report failure through the
/// returned [`ExportError`] rather than panicking.
pub trait SpanExporter: Send + Sync + Debug {
    /// Exports a batch of finished spans.
    ///
    /// This function is never called concurrently for the same exporter
    /// instance by the batch processor. The processor bounds the call with
    /// its export timeout.
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = ExportResult> + Send;

    /// Shuts down the exporter. Called when the pipeline is shut down,
    /// after the last export.
    fn shutdown(&mut self) -> ExportResult {
        Ok(())
    }
}

/// An exporter keeping every exported batch in memory.
///
/// Meant for tests: clones share the same storage, so a clone can be kept to
/// inspect what the pipeline exported.
///
/// ```
/// use telemetry_pipeline::trace::{CorrelationContext, InMemorySpanExporter, TracerProvider};
///
/// let exporter = InMemorySpanExporter::default();
/// let provider = TracerProvider::builder()
///     .with_simple_exporter(exporter.clone())
///     .build();
///
/// let cx = CorrelationContext::new();
/// provider.tracer("example").in_span(&cx, "say hello", |_span| {});
///
/// let spans = exporter.get_finished_spans().unwrap();
/// assert_eq!(spans[0].name, "say hello");
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    batches: Arc<Mutex<Vec<Vec<SpanData>>>>,
    fail: Arc<Mutex<Option<ExportError>>>,
}

impl InMemorySpanExporter {
    /// Returns every exported span, in export order.
    pub fn get_finished_spans(&self) -> Result<Vec<SpanData>, PipelineError> {
        Ok(self.batches.lock()?.iter().flatten().cloned().collect())
    }

    /// Returns the exported batches as they were handed to the exporter.
    pub fn get_batches(&self) -> Result<Vec<Vec<SpanData>>, PipelineError> {
        Ok(self.batches.lock()?.clone())
    }

    /// Make every following export fail with `error`, or succeed again with
    /// `None`. Failed batches are not stored.
    pub fn fail_with(&self, error: Option<ExportError>) {
        if let Ok(mut fail) = self.fail.lock() {
            *fail = error;
        }
    }

    /// Clears the stored spans.
    pub fn reset(&self) {
        let _ = self.batches.lock().map(|mut batches| batches.clear());
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = ExportResult> + Send {
        let result = match self.fail.lock() {
            Ok(fail) => match fail.as_ref() {
                Some(err) => Err(err.clone()),
                None => self
                    .batches
                    .lock()
                    .map(|mut batches| batches.push(batch))
                    .map_err(|err| ExportError::Transport(format!("Failed to lock spans: {err}"))),
            },
            Err(err) => Err(ExportError::Transport(format!("Failed to lock spans: {err}"))),
        };
        std::future::ready(result)
    }
}
