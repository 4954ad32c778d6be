use crate::common::KeyValue;
use crate::error::{PipelineError, PipelineResult};
use crate::logs::{
    ConsoleConfig, ConsoleSink, LogExporter, LogProcessor, LogRecord, Severity,
    SimpleLogProcessor,
};
use crate::resource::Resource;
use crate::trace::provider::combine_results;
use crate::trace::CorrelationContext;
use crate::{pipeline_debug, suppression};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct LoggerProviderInner {
    processors: Vec<Box<dyn LogProcessor>>,
    resource: Resource,
    is_shutdown: AtomicBool,
}

impl LoggerProviderInner {
    fn emit(&self, record: LogRecord) {
        if let Some((last, rest)) = self.processors.split_last() {
            for processor in rest {
                processor.emit(record.clone());
            }
            last.emit(record);
        }
    }

    /// Shuts down the processors in order.
    fn shutdown(&self) -> Vec<PipelineResult> {
        let mut results = vec![];
        for processor in &self.processors {
            let result = processor.shutdown();
            if let Err(err) = &result {
                pipeline_debug!(name: "LoggerProvider.ShutdownError",
                        error = format!("{err}"));
            }
            results.push(result);
        }
        results
    }
}

impl Drop for LoggerProviderInner {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            let _ = self.shutdown();
        } else {
            pipeline_debug!(
                name: "LoggerProvider.Drop.AlreadyShutdown",
                message = "LoggerProvider was already shut down; drop will not attempt shutdown again."
            );
        }
    }
}

/// Handing out named [`Logger`]s and owning the log processors.
///
/// Like [`TracerProvider`](crate::trace::TracerProvider), cloning is cheap and
/// processing stops on [`shutdown`](LoggerProvider::shutdown) or when the last
/// clone (including those held by loggers) is dropped.
#[derive(Debug, Clone)]
pub struct LoggerProvider {
    inner: Arc<LoggerProviderInner>,
}

impl Default for LoggerProvider {
    fn default() -> Self {
        LoggerProvider::builder().build()
    }
}

impl LoggerProvider {
    /// Create a new `LoggerProvider` builder.
    pub fn builder() -> LoggerProviderBuilder {
        LoggerProviderBuilder::default()
    }

    /// Create a logger named `name`.
    pub fn logger(&self, name: impl Into<Cow<'static, str>>) -> Logger {
        Logger {
            name: name.into(),
            provider: self.clone(),
        }
    }

    /// The resource attached to every record.
    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    /// Emit `message` through a logger named `logger_name`, correlated with
    /// the current span of `cx`.
    pub fn emit(
        &self,
        cx: &CorrelationContext,
        severity: Severity,
        logger_name: impl Into<Cow<'static, str>>,
        message: impl Into<String>,
    ) {
        let record = LogRecord::new(
            severity,
            logger_name,
            message,
            self.inner.resource.clone(),
        )
        .with_trace_context(cx.current_span());
        self.emit_record(record);
    }

    /// Hand a complete record to the processors.
    ///
    /// Records emitted after shutdown, or from a thread running the
    /// pipeline's own exports, are dropped.
    pub fn emit_record(&self, record: LogRecord) {
        if self.inner.is_shutdown.load(Ordering::Relaxed) || suppression::is_suppressed() {
            return;
        }
        self.inner.emit(record);
    }

    /// Force flush all remaining logs in log processors.
    pub fn force_flush(&self) -> PipelineResult {
        let results: Vec<_> = self
            .inner
            .processors
            .iter()
            .map(|processor| processor.force_flush())
            .collect();
        combine_results(results)
    }

    /// Shuts down this `LoggerProvider`, exporting what the processors hold.
    pub fn shutdown(&self) -> PipelineResult {
        pipeline_debug!(
            name: "LoggerProvider.ShutdownInvokedByUser",
            message = "User invoked shutdown on LoggerProvider. This will shut down all registered processors."
        );
        if self
            .inner
            .is_shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            combine_results(self.inner.shutdown())
        } else {
            Err(PipelineError::AlreadyShutdown)
        }
    }
}

/// Builder for provider attributes.
#[derive(Debug, Default)]
pub struct LoggerProviderBuilder {
    processors: Vec<Box<dyn LogProcessor>>,
    resource: Option<Resource>,
}

impl LoggerProviderBuilder {
    /// Adds a [SimpleLogProcessor] with the configured exporter to the
    /// pipeline.
    pub fn with_simple_exporter<T: LogExporter + 'static>(self, exporter: T) -> Self {
        self.with_log_processor(SimpleLogProcessor::new(exporter))
    }

    /// Mirror every record to stdout.
    pub fn with_console_sink(self, config: ConsoleConfig) -> Self {
        self.with_log_processor(ConsoleSink::new(config))
    }

    /// Adds a custom [LogProcessor] to the pipeline.
    ///
    /// Processors are invoked in the order they are added. Add a console sink
    /// before a batch processor for the console line to be written first.
    pub fn with_log_processor<T: LogProcessor + 'static>(mut self, processor: T) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// The `Resource` to be associated with this Provider.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Create a new provider from this configuration.
    pub fn build(self) -> LoggerProvider {
        LoggerProvider {
            inner: Arc::new(LoggerProviderInner {
                processors: self.processors,
                resource: self.resource.unwrap_or_default(),
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}

/// Emits log records correlated with the current span.
#[derive(Clone)]
pub struct Logger {
    name: Cow<'static, str>,
    provider: LoggerProvider,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("name", &self.name).finish()
    }
}

impl Logger {
    /// The logger name carried by every record.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emit a record correlated with the current span of `cx`.
    pub fn emit_in(&self, cx: &CorrelationContext, severity: Severity, message: impl Into<String>) {
        self.emit_with_attributes(Some(cx), severity, message, Vec::new());
    }

    /// Emit a record correlated with the ambient context installed by
    /// [`CorrelationContext::scope`], if any.
    pub fn emit(&self, severity: Severity, message: impl Into<String>) {
        let cx = CorrelationContext::current();
        self.emit_with_attributes(cx.as_ref(), severity, message, Vec::new());
    }

    /// Emit a record with attributes. Without a context the record carries
    /// no correlation ids.
    pub fn emit_with_attributes(
        &self,
        cx: Option<&CorrelationContext>,
        severity: Severity,
        message: impl Into<String>,
        attributes: Vec<KeyValue>,
    ) {
        if suppression::is_suppressed() {
            return;
        }
        let record = LogRecord::new(
            severity,
            self.name.clone(),
            message,
            self.provider.inner.resource.clone(),
        )
        .with_trace_context(cx.and_then(CorrelationContext::current_span))
        .with_attributes(attributes);
        self.provider.emit_record(record);
    }

    /// Shorthand for `emit_in(cx, Severity::Info, message)`.
    pub fn info(&self, cx: &CorrelationContext, message: impl Into<String>) {
        self.emit_in(cx, Severity::Info, message);
    }

    /// Shorthand for `emit_in(cx, Severity::Warn, message)`.
    pub fn warn(&self, cx: &CorrelationContext, message: impl Into<String>) {
        self.emit_in(cx, Severity::Warn, message);
    }

    /// Shorthand for `emit_in(cx, Severity::Error, message)`.
    pub fn error(&self, cx: &CorrelationContext, message: impl Into<String>) {
        self.emit_in(cx, Severity::Error, message);
    }
}
