//! # Log Processors
//!
//! Log processors are the link between the [`Logger`](crate::logs::Logger)
//! and the exporters. Every emitted record is handed to each registered
//! processor in registration order.
//!
//! ```ascii
//!   +-----+---------------+   +-----------------------+   +-------------------+
//!   |     |               |   |                       |   |                   |
//!   |     |               |   | BatchLogProcessor     |   |  LogExporter      |
//!   |     |               +---> SimpleLogProcessor    +--->  (OtlpLogExporter)|
//!   |     |               |   | ConsoleSink           |   |                   |
//!   | SDK | Logger.emit() |   +-----------------------+   +-------------------+
//!   |     |               |
//!   +-----+---------------+
//! ```
use crate::batch::{BatchConfig, BatchExport, BatchWorker, PipelineStats, StatsCounters};
use crate::error::{ConfigError, ExportResult, PipelineError, PipelineResult};
use crate::logs::{LogExporter, LogRecord};
use crate::pipeline_debug;
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// The interface for plugging into a [`Logger`](crate::logs::Logger).
pub trait LogProcessor: Send + Sync + Debug {
    /// Called when a log record is ready to be processed. Called on the
    /// emitting thread, so implementations must not block on network I/O.
    fn emit(&self, record: LogRecord);
    /// Force the logs lying in the cache to be exported.
    fn force_flush(&self) -> PipelineResult;
    /// Shuts down the processor.
    fn shutdown(&self) -> PipelineResult;
}

/// A [`LogProcessor`] designed for testing and debugging purpose, that
/// immediately exports log records on the calling thread, one at a time.
#[derive(Debug)]
pub struct SimpleLogProcessor<E: LogExporter> {
    exporter: Mutex<E>,
}

impl<E: LogExporter> SimpleLogProcessor<E> {
    /// Create a new [SimpleLogProcessor] using the provided exporter.
    pub fn new(exporter: E) -> Self {
        SimpleLogProcessor {
            exporter: Mutex::new(exporter),
        }
    }
}

impl<E: LogExporter> LogProcessor for SimpleLogProcessor<E> {
    fn emit(&self, record: LogRecord) {
        let result = self
            .exporter
            .lock()
            .map_err(|_| PipelineError::InternalFailure("SimpleLogProcessor mutex poison".into()))
            .map(|exporter| futures_executor::block_on(exporter.export(vec![record])));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                pipeline_debug!(
                    name: "SimpleLogProcessor.Emit.ExportError",
                    error = format!("{err}")
                );
            }
            Err(err) => {
                pipeline_debug!(
                    name: "SimpleLogProcessor.Emit.Error",
                    error = format!("{err}")
                );
            }
        }
    }

    fn force_flush(&self) -> PipelineResult {
        Ok(())
    }

    fn shutdown(&self) -> PipelineResult {
        let mut exporter = self.exporter.lock()?;
        exporter
            .shutdown()
            .map_err(|err| PipelineError::InternalFailure(err.to_string()))
    }
}

#[derive(Debug)]
struct LogBatchExport<E>(E);

impl<E: LogExporter + 'static> BatchExport for LogBatchExport<E> {
    type Item = LogRecord;

    fn export(&self, batch: Vec<LogRecord>) -> impl Future<Output = ExportResult> + Send {
        self.0.export(batch)
    }

    fn shutdown(&mut self) -> ExportResult {
        self.0.shutdown()
    }
}

/// The `BatchLogProcessor` collects finished logs in a buffer and exports them
/// in batches to the configured `LogExporter`. This processor is ideal for
/// high-throughput environments, as it minimizes the overhead of exporting
/// logs individually. It uses a **dedicated background thread** to manage and
/// export logs asynchronously, ensuring that the application's main execution
/// flow is not blocked.
///
/// Records leave in the order they were emitted: one worker owns the queue.
///
/// ### Example
/// ```
/// use telemetry_pipeline::batch::BatchConfigBuilder;
/// use telemetry_pipeline::logs::{BatchLogProcessor, InMemoryLogExporter, LoggerProvider};
/// use std::time::Duration;
///
/// let processor = BatchLogProcessor::builder(InMemoryLogExporter::default())
///     .with_batch_config(
///         BatchConfigBuilder::logs()
///             .with_max_export_batch_size(100)
///             .with_scheduled_delay(Duration::from_millis(500))
///             .build(),
///     )
///     .build()
///     .unwrap();
///
/// let provider = LoggerProvider::builder()
///     .with_log_processor(processor)
///     .build();
/// provider.shutdown().unwrap();
/// ```
pub struct BatchLogProcessor {
    worker: BatchWorker<LogRecord>,
}

impl Debug for BatchLogProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLogProcessor")
            .field("stats", &self.worker.stats())
            .finish()
    }
}

impl BatchLogProcessor {
    /// Creates a new instance of `BatchLogProcessor`.
    pub fn new<E>(exporter: E, config: BatchConfig) -> Result<Self, ConfigError>
    where
        E: LogExporter + 'static,
    {
        Ok(BatchLogProcessor {
            worker: BatchWorker::spawn(LogBatchExport(exporter), config, "log")?,
        })
    }

    /// Create a new batch processor builder
    pub fn builder<E>(exporter: E) -> BatchLogProcessorBuilder<E>
    where
        E: LogExporter + 'static,
    {
        BatchLogProcessorBuilder {
            exporter,
            config: None,
        }
    }

    /// What this processor has done with the records it received so far.
    pub fn stats(&self) -> PipelineStats {
        self.worker.stats()
    }

    pub(crate) fn stats_counters(&self) -> Arc<StatsCounters> {
        self.worker.stats_counters()
    }
}

impl LogProcessor for BatchLogProcessor {
    fn emit(&self, record: LogRecord) {
        self.worker.enqueue(record);
    }

    fn force_flush(&self) -> PipelineResult {
        self.worker.force_flush()
    }

    fn shutdown(&self) -> PipelineResult {
        self.worker.shutdown()
    }
}

/// A builder for creating [`BatchLogProcessor`] instances.
#[derive(Debug)]
pub struct BatchLogProcessorBuilder<E> {
    exporter: E,
    config: Option<BatchConfig>,
}

impl<E> BatchLogProcessorBuilder<E>
where
    E: LogExporter + 'static,
{
    /// Set the BatchConfig for [`BatchLogProcessorBuilder`]. Defaults to
    /// [`BatchConfig::logs`].
    pub fn with_batch_config(self, config: BatchConfig) -> Self {
        BatchLogProcessorBuilder {
            config: Some(config),
            ..self
        }
    }

    /// Build a batch processor, starting its background thread.
    pub fn build(self) -> Result<BatchLogProcessor, ConfigError> {
        let config = self.config.unwrap_or_else(BatchConfig::logs);
        BatchLogProcessor::new(self.exporter, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfigBuilder;
    use crate::error::ExportError;
    use crate::logs::Severity;
    use crate::resource::Resource;
    use std::time::Duration;

    fn record(body: &str) -> LogRecord {
        LogRecord::new(Severity::Info, "test", body, Resource::empty())
    }

    fn config(batch_size: usize, delay: Duration) -> BatchConfig {
        BatchConfigBuilder::logs()
            .with_max_export_batch_size(batch_size)
            .with_scheduled_delay(delay)
            .build()
    }

    #[test]
    fn simple_log_processor_exports_immediately() {
        let exporter = crate::logs::InMemoryLogExporter::default();
        let processor = SimpleLogProcessor::new(exporter.clone());

        processor.emit(record("hello"));
        assert_eq!(exporter.get_emitted_logs().unwrap()[0].body, "hello");
        assert_eq!(processor.shutdown(), Ok(()));
    }

    #[test]
    fn batch_preserves_emission_order() {
        let exporter = crate::logs::InMemoryLogExporter::default();
        let processor =
            BatchLogProcessor::new(exporter.clone(), config(3, Duration::from_secs(3600)))
                .unwrap();

        let bodies: Vec<String> = (0..10).map(|i| format!("record {i}")).collect();
        for body in &bodies {
            processor.emit(record(body));
        }
        processor.shutdown().unwrap();

        let exported: Vec<String> = exporter
            .get_emitted_logs()
            .unwrap()
            .into_iter()
            .map(|r| r.body)
            .collect();
        assert_eq!(exported, bodies);
        assert!(exporter
            .get_batches()
            .unwrap()
            .iter()
            .all(|batch| batch.len() <= 3));
    }

    #[test]
    fn timer_flushes_without_reaching_batch_size() {
        let exporter = crate::logs::InMemoryLogExporter::default();
        let processor =
            BatchLogProcessor::new(exporter.clone(), config(512, Duration::from_millis(20)))
                .unwrap();

        processor.emit(record("lonely"));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while exporter.get_emitted_logs().unwrap().is_empty()
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(exporter.get_emitted_logs().unwrap().len(), 1);
        processor.shutdown().unwrap();
    }

    #[test]
    fn export_failure_drops_the_batch() {
        let exporter = crate::logs::InMemoryLogExporter::default();
        exporter.fail_with(Some(ExportError::Transport("connection refused".into())));
        let processor =
            BatchLogProcessor::new(exporter.clone(), config(1, Duration::from_secs(3600)))
                .unwrap();

        processor.emit(record("lost"));
        processor.force_flush().unwrap();
        exporter.fail_with(None);
        processor.emit(record("kept"));
        processor.shutdown().unwrap();

        let exported = exporter.get_emitted_logs().unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].body, "kept");
        let stats = processor.stats();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.exported, 1);
    }

    #[test]
    fn emit_after_shutdown_is_ignored() {
        let exporter = crate::logs::InMemoryLogExporter::default();
        let processor = BatchLogProcessor::builder(exporter.clone()).build().unwrap();

        processor.shutdown().unwrap();
        processor.emit(record("late"));

        assert!(exporter.get_emitted_logs().unwrap().is_empty());
        assert_eq!(processor.stats().enqueued, 0);
        assert_eq!(processor.shutdown(), Err(PipelineError::AlreadyShutdown));
    }
}
