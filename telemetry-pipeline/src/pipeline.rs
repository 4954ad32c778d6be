//! # Telemetry pipeline assembly
//!
//! [`TelemetryPipeline`] wires a [`Resource`], a span pipeline and a log
//! pipeline (console sink plus batched export) together. It is built once at
//! startup, handed to request handlers by cloning, and shut down once at exit,
//! usually through a [`ShutdownGuard`].
//!
//! ```no_run
//! use telemetry_pipeline::export::OtlpExporterBuilder;
//! use telemetry_pipeline::logs::Severity;
//! use telemetry_pipeline::pipeline::TelemetryPipeline;
//! use telemetry_pipeline::trace::CorrelationContext;
//!
//! # fn main() -> Result<(), telemetry_pipeline::error::ConfigError> {
//! let pipeline = TelemetryPipeline::builder()
//!     .with_service_name("hello-greeter")
//!     .with_otlp_exporter(OtlpExporterBuilder::new())
//!     .build()?;
//! let _guard = pipeline.shutdown_guard();
//!
//! let cx = CorrelationContext::new();
//! let logger = pipeline.logger("greeter");
//! pipeline.tracer("greeter").in_span(&cx, "hello", |_span| {
//!     logger.emit_in(&cx, Severity::Info, "Hello endpoint called");
//! });
//! # Ok(())
//! # }
//! ```
use crate::appender::TelemetryLayer;
use crate::batch::{BatchConfig, PipelineStats, StatsCounters};
use crate::error::{ConfigError, PipelineError, PipelineResult};
use crate::export::OtlpExporterBuilder;
use crate::logs::{
    BatchLogProcessor, ConsoleConfig, ConsoleSink, LogExporter, Logger, LoggerProvider,
};
use crate::resource::Resource;
use crate::trace::provider::combine_results;
use crate::trace::{BatchSpanProcessor, SpanExporter, SpanProcessor, Tracer, TracerProvider};
use crate::{pipeline_error, pipeline_info, pipeline_warn};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What to do when the configuration is invalid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConfigErrorPolicy {
    /// Return the error from [`TelemetryPipelineBuilder::build`].
    #[default]
    Abort,
    /// Report the error and build the pipeline without the failing part.
    /// Exporters are disabled; the console sink keeps working.
    Disable,
}

type SpanProcessorFactory =
    Box<dyn FnOnce(BatchConfig) -> Result<BatchSpanProcessor, ConfigError> + Send>;
type LogProcessorFactory =
    Box<dyn FnOnce(BatchConfig) -> Result<BatchLogProcessor, ConfigError> + Send>;

enum ConsoleSetting {
    FromEnv,
    Off,
    Config(ConsoleConfig),
    Sink(ConsoleSink),
}

/// Builder for [`TelemetryPipeline`].
pub struct TelemetryPipelineBuilder {
    resource: Option<Resource>,
    service_name: Option<String>,
    resource_attributes: Vec<(String, String)>,
    span_exporter: Option<SpanProcessorFactory>,
    log_exporter: Option<LogProcessorFactory>,
    console: ConsoleSetting,
    span_batch_config: Option<BatchConfig>,
    log_batch_config: Option<BatchConfig>,
    on_config_error: ConfigErrorPolicy,
}

impl fmt::Debug for TelemetryPipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryPipelineBuilder")
            .field("service_name", &self.service_name)
            .field("span_exporter", &self.span_exporter.is_some())
            .field("log_exporter", &self.log_exporter.is_some())
            .field("on_config_error", &self.on_config_error)
            .finish_non_exhaustive()
    }
}

impl Default for TelemetryPipelineBuilder {
    fn default() -> Self {
        TelemetryPipelineBuilder {
            resource: None,
            service_name: None,
            resource_attributes: Vec::new(),
            span_exporter: None,
            log_exporter: None,
            console: ConsoleSetting::FromEnv,
            span_batch_config: None,
            log_batch_config: None,
            on_config_error: ConfigErrorPolicy::default(),
        }
    }
}

impl TelemetryPipelineBuilder {
    /// Set the `service.name` resource attribute.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Add a resource attribute on top of the environment ones.
    pub fn with_resource_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.resource_attributes.push((key.into(), value.into()));
        self
    }

    /// Use `resource` as is, ignoring `OTEL_SERVICE_NAME` and
    /// `OTEL_RESOURCE_ATTRIBUTES`. Attributes added with the other builder
    /// methods are merged on top.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Export spans and logs over OTLP.
    pub fn with_otlp_exporter(self, exporter: OtlpExporterBuilder) -> Self {
        let logs = exporter.clone();
        self.with_span_processor_factory(Box::new(move |config| {
            BatchSpanProcessor::new(exporter.build_span_exporter()?, config)
        }))
        .with_log_processor_factory(Box::new(move |config| {
            BatchLogProcessor::new(logs.build_log_exporter()?, config)
        }))
    }

    /// Export spans through `exporter`, batched.
    pub fn with_span_exporter<E: SpanExporter + 'static>(self, exporter: E) -> Self {
        self.with_span_processor_factory(Box::new(move |config| {
            BatchSpanProcessor::new(exporter, config)
        }))
    }

    /// Export log records through `exporter`, batched.
    pub fn with_log_exporter<E: LogExporter + 'static>(self, exporter: E) -> Self {
        self.with_log_processor_factory(Box::new(move |config| {
            BatchLogProcessor::new(exporter, config)
        }))
    }

    fn with_span_processor_factory(mut self, factory: SpanProcessorFactory) -> Self {
        self.span_exporter = Some(factory);
        self
    }

    fn with_log_processor_factory(mut self, factory: LogProcessorFactory) -> Self {
        self.log_exporter = Some(factory);
        self
    }

    /// Mirror log records to stdout with `config`, ignoring the
    /// `TELEMETRY_CONSOLE_*` variables.
    pub fn with_console(mut self, config: ConsoleConfig) -> Self {
        self.console = ConsoleSetting::Config(config);
        self
    }

    /// Mirror log records to `sink`.
    pub fn with_console_sink(mut self, sink: ConsoleSink) -> Self {
        self.console = ConsoleSetting::Sink(sink);
        self
    }

    /// Do not mirror log records to the console.
    pub fn without_console(mut self) -> Self {
        self.console = ConsoleSetting::Off;
        self
    }

    /// Batching of spans. Defaults to [`BatchConfig::spans`].
    pub fn with_span_batch_config(mut self, config: BatchConfig) -> Self {
        self.span_batch_config = Some(config);
        self
    }

    /// Batching of log records. Defaults to [`BatchConfig::logs`].
    pub fn with_log_batch_config(mut self, config: BatchConfig) -> Self {
        self.log_batch_config = Some(config);
        self
    }

    /// What to do with configuration errors. Defaults to
    /// [`ConfigErrorPolicy::Abort`].
    pub fn with_config_error_policy(mut self, policy: ConfigErrorPolicy) -> Self {
        self.on_config_error = policy;
        self
    }

    /// Build the pipeline and start its background workers.
    pub fn build(self) -> Result<TelemetryPipeline, ConfigError> {
        let policy = self.on_config_error;
        let mut errors = Vec::new();

        let resource = {
            let builder = match self.resource {
                Some(resource) => Resource::builder_empty()
                    .with_attributes(resource.iter().map(|(k, v)| (k.to_string(), v.to_string()))),
                None => Resource::builder(),
            };
            let builder = match self.service_name {
                Some(name) => builder.with_service_name(name),
                None => builder,
            };
            let built = builder.with_attributes(self.resource_attributes).build();
            tolerate(policy, &mut errors, built, "resource")?.unwrap_or_else(Resource::from_env)
        };

        let console = match self.console {
            ConsoleSetting::FromEnv => {
                tolerate(policy, &mut errors, ConsoleConfig::from_env(), "console")?
                    .unwrap_or_else(|| Some(ConsoleConfig::default()))
                    .map(ConsoleSink::new)
            }
            ConsoleSetting::Off => None,
            ConsoleSetting::Config(config) => Some(ConsoleSink::new(config)),
            ConsoleSetting::Sink(sink) => Some(sink),
        };

        // Exporters are all-or-nothing: after any error neither is started.
        let mut span_processor = None;
        if let Some(factory) = self.span_exporter.filter(|_| errors.is_empty()) {
            let config = self.span_batch_config.unwrap_or_else(BatchConfig::spans);
            span_processor = tolerate(policy, &mut errors, factory(config), "span exporter")?;
        }
        let mut log_processor = None;
        if let Some(factory) = self.log_exporter.filter(|_| errors.is_empty()) {
            let config = self.log_batch_config.unwrap_or_else(BatchConfig::logs);
            log_processor = tolerate(policy, &mut errors, factory(config), "log exporter")?;
        }
        if !errors.is_empty() {
            if let Some(processor) = span_processor.take() {
                let _ = processor.shutdown();
            }
        }

        let span_stats = span_processor.as_ref().map(BatchSpanProcessor::stats_counters);
        let log_stats = log_processor.as_ref().map(BatchLogProcessor::stats_counters);

        let mut tracer_provider = TracerProvider::builder().with_resource(resource.clone());
        if let Some(processor) = span_processor {
            tracer_provider = tracer_provider.with_span_processor(processor);
        }

        let mut logger_provider = LoggerProvider::builder().with_resource(resource.clone());
        if let Some(sink) = console {
            logger_provider = logger_provider.with_log_processor(sink);
        }
        if let Some(processor) = log_processor {
            logger_provider = logger_provider.with_log_processor(processor);
        }

        pipeline_info!(
            name: "TelemetryPipeline.Built",
            service_name = resource.service_name().unwrap_or_default().to_string(),
            exporting = format!("{}", span_stats.is_some() || log_stats.is_some()),
            config_errors = format!("{}", errors.len())
        );

        Ok(TelemetryPipeline {
            tracer_provider: tracer_provider.build(),
            logger_provider: logger_provider.build(),
            span_stats,
            log_stats,
            config_errors: errors.into(),
            is_shutdown: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Under [`ConfigErrorPolicy::Disable`] an error is reported, recorded and
/// turned into `None`.
fn tolerate<T>(
    policy: ConfigErrorPolicy,
    errors: &mut Vec<ConfigError>,
    result: Result<T, ConfigError>,
    part: &'static str,
) -> Result<Option<T>, ConfigError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if policy == ConfigErrorPolicy::Disable => {
            pipeline_error!(
                name: "TelemetryPipeline.ConfigError",
                part = part,
                error = format!("{err}")
            );
            errors.push(err);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// An explicitly constructed span pipeline and log pipeline sharing one
/// resource.
///
/// Cloning is cheap; every clone drives the same pipelines.
#[derive(Clone, Debug)]
pub struct TelemetryPipeline {
    tracer_provider: TracerProvider,
    logger_provider: LoggerProvider,
    span_stats: Option<Arc<StatsCounters>>,
    log_stats: Option<Arc<StatsCounters>>,
    config_errors: Arc<[ConfigError]>,
    is_shutdown: Arc<AtomicBool>,
}

impl TelemetryPipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> TelemetryPipelineBuilder {
        TelemetryPipelineBuilder::default()
    }

    /// A pipeline configured from the environment: OTLP export with the
    /// `OTEL_EXPORTER_OTLP_*` settings and the console sink per
    /// `TELEMETRY_CONSOLE_*`.
    pub fn from_env() -> Result<TelemetryPipeline, ConfigError> {
        TelemetryPipeline::builder()
            .with_otlp_exporter(OtlpExporterBuilder::new())
            .build()
    }

    /// A pipeline that records nothing. Spans still carry ids, so correlation
    /// keeps working for the host.
    pub fn disabled() -> TelemetryPipeline {
        TelemetryPipeline {
            tracer_provider: TracerProvider::builder().build(),
            logger_provider: LoggerProvider::builder().build(),
            span_stats: None,
            log_stats: None,
            config_errors: Arc::new([]),
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A tracer named `name`.
    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> Tracer {
        self.tracer_provider.tracer(name)
    }

    /// A logger named `name`.
    pub fn logger(&self, name: impl Into<Cow<'static, str>>) -> Logger {
        self.logger_provider.logger(name)
    }

    /// The span pipeline.
    pub fn tracer_provider(&self) -> &TracerProvider {
        &self.tracer_provider
    }

    /// The log pipeline.
    pub fn logger_provider(&self) -> &LoggerProvider {
        &self.logger_provider
    }

    /// The resource attached to every span and log record.
    pub fn resource(&self) -> &Resource {
        self.tracer_provider.resource()
    }

    /// A `tracing_subscriber` layer feeding `tracing` events into the log
    /// pipeline.
    pub fn tracing_layer(&self) -> TelemetryLayer {
        TelemetryLayer::new(&self.logger_provider)
    }

    /// Counters of the span exporter, if spans are exported.
    pub fn span_stats(&self) -> Option<PipelineStats> {
        self.span_stats.as_ref().map(|stats| stats.snapshot())
    }

    /// Counters of the log exporter, if log records are exported.
    pub fn log_stats(&self) -> Option<PipelineStats> {
        self.log_stats.as_ref().map(|stats| stats.snapshot())
    }

    /// Configuration errors tolerated under [`ConfigErrorPolicy::Disable`].
    pub fn config_errors(&self) -> &[ConfigError] {
        &self.config_errors
    }

    /// Export everything queued so far and wait for it.
    pub fn force_flush(&self) -> PipelineResult {
        combine_results(vec![
            self.tracer_provider.force_flush(),
            self.logger_provider.force_flush(),
        ])
    }

    /// Drain and export what both pipelines hold, then stop their workers.
    ///
    /// Spans go first so that records logged while they end are still
    /// accepted. Each pipeline waits at most its `shutdown_timeout`; a
    /// pipeline that does not finish in time is reported and abandoned. A
    /// second call returns [`PipelineError::AlreadyShutdown`].
    pub fn shutdown(&self) -> PipelineResult {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyShutdown);
        }
        let result = combine_results(vec![
            self.tracer_provider.shutdown(),
            self.logger_provider.shutdown(),
        ]);
        match &result {
            Ok(()) => {
                pipeline_info!(name: "TelemetryPipeline.Shutdown");
            }
            Err(err) => {
                pipeline_warn!(
                    name: "TelemetryPipeline.ShutdownIncomplete",
                    error = format!("{err}")
                );
            }
        }
        result
    }

    /// A guard shutting this pipeline down when dropped.
    pub fn shutdown_guard(&self) -> ShutdownGuard {
        ShutdownGuard {
            pipeline: Some(self.clone()),
        }
    }
}

/// Shuts the pipeline down when dropped, including during unwinding.
///
/// ```
/// use telemetry_pipeline::pipeline::TelemetryPipeline;
///
/// let pipeline = TelemetryPipeline::disabled();
/// {
///     let _guard = pipeline.shutdown_guard();
/// }
/// assert!(pipeline.shutdown().is_err());
/// ```
#[must_use = "the pipeline is shut down as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ShutdownGuard {
    pipeline: Option<TelemetryPipeline>,
}

impl ShutdownGuard {
    /// Shut down now and report the outcome.
    pub fn shutdown(mut self) -> PipelineResult {
        match self.pipeline.take() {
            Some(pipeline) => pipeline.shutdown(),
            None => Err(PipelineError::AlreadyShutdown),
        }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfigBuilder;
    use crate::logs::{ConsoleFormat, InMemoryLogExporter, Severity};
    use crate::trace::{CorrelationContext, InMemorySpanExporter};
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn single_record_batches() -> (BatchConfig, BatchConfig) {
        (
            BatchConfigBuilder::spans()
                .with_max_export_batch_size(1)
                .build(),
            BatchConfigBuilder::logs()
                .with_max_export_batch_size(1)
                .build(),
        )
    }

    fn in_memory_pipeline() -> (TelemetryPipeline, InMemorySpanExporter, InMemoryLogExporter) {
        let spans = InMemorySpanExporter::default();
        let logs = InMemoryLogExporter::default();
        let (span_batch, log_batch) = single_record_batches();
        let pipeline = TelemetryPipeline::builder()
            .with_resource(Resource::empty())
            .with_service_name("checkout")
            .with_span_exporter(spans.clone())
            .with_log_exporter(logs.clone())
            .with_span_batch_config(span_batch)
            .with_log_batch_config(log_batch)
            .without_console()
            .build()
            .unwrap();
        (pipeline, spans, logs)
    }

    #[test]
    fn spans_and_logs_share_the_resource() {
        let (pipeline, spans, logs) = in_memory_pipeline();
        let cx = CorrelationContext::new();
        let logger = pipeline.logger("checkout");
        pipeline.tracer("checkout").in_span(&cx, "pay", |_span| {
            logger.emit_in(&cx, Severity::Info, "paid");
        });
        pipeline.shutdown().unwrap();

        let spans = spans.get_finished_spans().unwrap();
        let logs = logs.get_emitted_logs().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(logs.len(), 1);
        assert_eq!(spans[0].resource.service_name(), Some("checkout"));
        assert_eq!(logs[0].resource, spans[0].resource);
        assert_eq!(pipeline.resource().service_name(), Some("checkout"));
    }

    #[test]
    fn stats_survive_shutdown() {
        let (pipeline, _spans, _logs) = in_memory_pipeline();
        let cx = CorrelationContext::new();
        for _ in 0..3 {
            pipeline.logger("checkout").info(&cx, "tick");
        }
        pipeline.tracer("checkout").in_span(&cx, "op", |_span| {});
        pipeline.shutdown().unwrap();

        let log_stats = pipeline.log_stats().unwrap();
        assert_eq!(log_stats.enqueued, 3);
        assert_eq!(log_stats.exported, 3);
        assert_eq!(pipeline.span_stats().unwrap().exported, 1);
    }

    #[test]
    fn second_shutdown_is_reported() {
        let (pipeline, _spans, _logs) = in_memory_pipeline();
        assert_eq!(pipeline.shutdown(), Ok(()));
        assert_eq!(pipeline.clone().shutdown(), Err(PipelineError::AlreadyShutdown));
    }

    #[test]
    fn guard_shuts_down_on_drop() {
        let (pipeline, spans, _logs) = in_memory_pipeline();
        {
            let _guard = pipeline.shutdown_guard();
            pipeline
                .tracer("checkout")
                .in_span(&CorrelationContext::new(), "op", |_span| {});
        }
        assert_eq!(spans.get_finished_spans().unwrap().len(), 1);
        assert_eq!(pipeline.shutdown(), Err(PipelineError::AlreadyShutdown));
    }

    #[test]
    fn guard_reports_explicit_shutdown() {
        let (pipeline, _spans, _logs) = in_memory_pipeline();
        let guard = pipeline.shutdown_guard();
        assert_eq!(guard.shutdown(), Ok(()));
    }

    #[test]
    fn invalid_resource_aborts_by_default() {
        let result = TelemetryPipeline::builder()
            .with_resource(Resource::empty())
            .with_resource_attribute(" ", "x")
            .without_console()
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidResource { .. })
        ));
    }

    #[test]
    fn disable_policy_keeps_the_console_and_drops_exporters() {
        let console = Captured::default();
        let spans = InMemorySpanExporter::default();
        let pipeline = TelemetryPipeline::builder()
            .with_resource(Resource::empty())
            .with_resource_attribute("", "x")
            .with_span_exporter(spans.clone())
            .with_console_sink(ConsoleSink::with_writer(
                ConsoleConfig::new(ConsoleFormat::Plain),
                console.clone(),
            ))
            .with_config_error_policy(ConfigErrorPolicy::Disable)
            .build()
            .unwrap();

        let cx = CorrelationContext::new();
        pipeline.tracer("app").in_span(&cx, "op", |_span| {
            pipeline.logger("app").warn(&cx, "still visible");
        });
        pipeline.shutdown().unwrap();

        assert_eq!(pipeline.config_errors().len(), 1);
        assert!(pipeline.span_stats().is_none());
        assert!(spans.get_finished_spans().unwrap().is_empty());
        assert!(console.text().contains("still visible"));
    }

    #[test]
    fn invalid_exporter_endpoint_disables_export() {
        let pipeline = TelemetryPipeline::builder()
            .with_resource(Resource::empty())
            .with_otlp_exporter(OtlpExporterBuilder::new().with_endpoint("no scheme here"))
            .without_console()
            .with_config_error_policy(ConfigErrorPolicy::Disable)
            .build()
            .unwrap();

        assert!(matches!(
            pipeline.config_errors(),
            [ConfigError::InvalidUri(..)]
        ));
        assert!(pipeline.span_stats().is_none());
        assert!(pipeline.log_stats().is_none());
    }

    #[test]
    fn malformed_env_endpoint_aborts_by_default() {
        temp_env::with_var(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            Some("collector.example.com:4317"),
            || {
                let result = TelemetryPipeline::builder()
                    .with_resource(Resource::empty())
                    .with_otlp_exporter(OtlpExporterBuilder::new())
                    .without_console()
                    .build();
                assert!(matches!(result, Err(ConfigError::InvalidUri(..))));
            },
        );
    }

    #[test]
    fn invalid_console_env_aborts_by_default() {
        temp_env::with_var("TELEMETRY_CONSOLE_FORMAT", Some("sparkly"), || {
            let result = TelemetryPipeline::builder()
                .with_resource(Resource::empty())
                .build();
            assert!(matches!(result, Err(ConfigError::InvalidConfig { .. })));
        });
    }

    #[test]
    fn disabled_pipeline_still_hands_out_ids() {
        let pipeline = TelemetryPipeline::disabled();
        let cx = CorrelationContext::new();
        let span_context = pipeline.tracer("app").in_span(&cx, "op", |span| span.span_context());
        assert_ne!(span_context.trace_id().to_bytes(), [0; 16]);
        assert!(pipeline.span_stats().is_none());
        assert_eq!(pipeline.force_flush(), Ok(()));
    }
}
