use crate::error::{ExportError, ExportResult, PipelineError};
use crate::logs::LogRecord;
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// `LogExporter` defines the interface that log exporters should implement.
///
/// An export is a single attempt. Failures are reported through the returned
/// [`ExportError`]; exporters must not panic.
pub trait LogExporter: Send + Sync + Debug {
    /// Exports a batch of log records, in the order they were emitted.
    fn export(&self, batch: Vec<LogRecord>) -> impl Future<Output = ExportResult> + Send;

    /// Shuts down the exporter.
    fn shutdown(&mut self) -> ExportResult {
        Ok(())
    }
}

/// An in-memory logs exporter that stores logs data in memory.
///
/// This exporter is useful for testing and debugging purposes. Clones share
/// the same storage. Records can be retrieved using [`get_emitted_logs`].
///
/// [`get_emitted_logs`]: InMemoryLogExporter::get_emitted_logs
#[derive(Clone, Debug, Default)]
pub struct InMemoryLogExporter {
    batches: Arc<Mutex<Vec<Vec<LogRecord>>>>,
    fail: Arc<Mutex<Option<ExportError>>>,
}

impl InMemoryLogExporter {
    /// Returns every exported record, in export order.
    pub fn get_emitted_logs(&self) -> Result<Vec<LogRecord>, PipelineError> {
        Ok(self.batches.lock()?.iter().flatten().cloned().collect())
    }

    /// Returns the exported batches as they were handed to the exporter.
    pub fn get_batches(&self) -> Result<Vec<Vec<LogRecord>>, PipelineError> {
        Ok(self.batches.lock()?.clone())
    }

    /// Make every following export fail with `error`, or succeed again with
    /// `None`. Failed batches are not stored.
    pub fn fail_with(&self, error: Option<ExportError>) {
        if let Ok(mut fail) = self.fail.lock() {
            *fail = error;
        }
    }

    /// Clears the internal (in-memory) storage of logs.
    pub fn reset(&self) {
        let _ = self.batches.lock().map(|mut batches| batches.clear());
    }
}

impl LogExporter for InMemoryLogExporter {
    fn export(&self, batch: Vec<LogRecord>) -> impl Future<Output = ExportResult> + Send {
        let result = match self.fail.lock() {
            Ok(fail) => match fail.as_ref() {
                Some(err) => Err(err.clone()),
                None => self
                    .batches
                    .lock()
                    .map(|mut batches| batches.push(batch))
                    .map_err(|err| ExportError::Transport(format!("Failed to lock logs: {err}"))),
            },
            Err(err) => Err(ExportError::Transport(format!("Failed to lock logs: {err}"))),
        };
        std::future::ready(result)
    }
}
