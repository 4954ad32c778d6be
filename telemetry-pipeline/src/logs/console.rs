//! Console mirror of emitted log records.
//!
//! [`ConsoleSink`] is a [`LogProcessor`] that writes each record synchronously
//! to stdout (or any writer) as it is emitted, before the record reaches the
//! batch processor. Two layouts are available:
//!
//! - [`ConsoleFormat::Plain`]:
//!   `2024-05-01 12:00:00.000000 - app - INFO - hello (trace_id=.. span_id=..)`
//! - [`ConsoleFormat::Structured`]: one JSON object per line.
//!
//! Which fields appear is controlled by a set of [`ConsoleField`]s.
use crate::error::{ConfigError, PipelineError, PipelineResult};
use crate::logs::{LogProcessor, LogRecord};
use crate::pipeline_debug;
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Console layout, `plain` or `structured`.
pub const TELEMETRY_CONSOLE_FORMAT: &str = "TELEMETRY_CONSOLE_FORMAT";
/// Comma separated list of console fields.
pub const TELEMETRY_CONSOLE_FIELDS: &str = "TELEMETRY_CONSOLE_FIELDS";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
// Rendered in place of a missing trace id or span id.
const NO_ID: &str = "0";

/// Layout of a console line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConsoleFormat {
    /// Human readable text.
    #[default]
    Plain,
    /// A JSON object per line.
    Structured,
}

impl FromStr for ConsoleFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(ConsoleFormat::Plain),
            "structured" | "json" => Ok(ConsoleFormat::Structured),
            other => Err(ConfigError::InvalidConfig {
                name: TELEMETRY_CONSOLE_FORMAT.into(),
                reason: format!("unknown console format '{other}'"),
            }),
        }
    }
}

/// A field a console line can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConsoleField {
    /// Event time of the record
    Timestamp,
    /// Severity name
    Level,
    /// Logger name
    Logger,
    /// Record body
    Message,
    /// Trace id of the span current at emission
    TraceId,
    /// Span id of the span current at emission
    SpanId,
    /// `service.name` of the resource
    ServiceName,
}

impl ConsoleField {
    /// Every field except `ServiceName`.
    pub const DEFAULT: [ConsoleField; 6] = [
        ConsoleField::Timestamp,
        ConsoleField::Level,
        ConsoleField::Logger,
        ConsoleField::Message,
        ConsoleField::TraceId,
        ConsoleField::SpanId,
    ];

    /// Key used in structured output and in `TELEMETRY_CONSOLE_FIELDS`.
    pub const fn key(&self) -> &'static str {
        match self {
            ConsoleField::Timestamp => "timestamp",
            ConsoleField::Level => "level",
            ConsoleField::Logger => "logger",
            ConsoleField::Message => "message",
            ConsoleField::TraceId => "trace_id",
            ConsoleField::SpanId => "span_id",
            ConsoleField::ServiceName => "service_name",
        }
    }
}

impl FromStr for ConsoleField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timestamp" => Ok(ConsoleField::Timestamp),
            "level" => Ok(ConsoleField::Level),
            "logger" => Ok(ConsoleField::Logger),
            "message" => Ok(ConsoleField::Message),
            "trace_id" => Ok(ConsoleField::TraceId),
            "span_id" => Ok(ConsoleField::SpanId),
            "service_name" => Ok(ConsoleField::ServiceName),
            other => Err(ConfigError::InvalidConfig {
                name: TELEMETRY_CONSOLE_FIELDS.into(),
                reason: format!("unknown console field '{other}'"),
            }),
        }
    }
}

/// Console sink settings, without the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    format: ConsoleFormat,
    fields: Vec<ConsoleField>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            format: ConsoleFormat::Plain,
            fields: ConsoleField::DEFAULT.to_vec(),
        }
    }
}

impl ConsoleConfig {
    /// Settings with `format` and the default fields.
    pub fn new(format: ConsoleFormat) -> Self {
        ConsoleConfig {
            format,
            ..Default::default()
        }
    }

    /// Replace the field set. Duplicates are ignored; the order of fields on
    /// a line is fixed.
    pub fn with_fields<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = ConsoleField>,
    {
        let mut fields: Vec<_> = fields.into_iter().collect();
        fields.sort();
        fields.dedup();
        self.fields = fields;
        self
    }

    /// The layout.
    pub fn format(&self) -> ConsoleFormat {
        self.format
    }

    /// The fields, in rendering order.
    pub fn fields(&self) -> &[ConsoleField] {
        &self.fields
    }

    /// Read `TELEMETRY_CONSOLE_FORMAT` and `TELEMETRY_CONSOLE_FIELDS`.
    ///
    /// Returns `Ok(None)` when the format is `off`, and the defaults when
    /// neither variable is set.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let format = match std::env::var(TELEMETRY_CONSOLE_FORMAT) {
            Ok(value) if value.trim().eq_ignore_ascii_case("off") => return Ok(None),
            Ok(value) => value.parse()?,
            Err(_) => ConsoleFormat::default(),
        };
        let mut config = ConsoleConfig::new(format);
        if let Ok(fields) = std::env::var(TELEMETRY_CONSOLE_FIELDS) {
            let fields = fields
                .split(',')
                .filter(|field| !field.trim().is_empty())
                .map(ConsoleField::from_str)
                .collect::<Result<Vec<_>, _>>()?;
            config = config.with_fields(fields);
        }
        Ok(Some(config))
    }
}

/// Writes every emitted record to the console.
pub struct ConsoleSink {
    config: ConsoleConfig,
    writer: Mutex<Box<dyn Write + Send>>,
    write_failed: AtomicBool,
}

impl fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleSink")
            .field("config", &self.config)
            .finish()
    }
}

impl ConsoleSink {
    /// A sink writing to stdout.
    pub fn new(config: ConsoleConfig) -> Self {
        Self::with_writer(config, io::stdout())
    }

    /// A sink writing to `writer`.
    pub fn with_writer<W: Write + Send + 'static>(config: ConsoleConfig, writer: W) -> Self {
        ConsoleSink {
            config,
            writer: Mutex::new(Box::new(writer)),
            write_failed: AtomicBool::new(false),
        }
    }

    /// Render a record as one line, without the trailing newline.
    pub fn render(&self, record: &LogRecord) -> String {
        match self.config.format {
            ConsoleFormat::Plain => self.render_plain(record),
            ConsoleFormat::Structured => self.render_structured(record),
        }
    }

    fn field_value(field: ConsoleField, record: &LogRecord) -> String {
        match field {
            ConsoleField::Timestamp => DateTime::<Utc>::from(record.timestamp)
                .format(TIMESTAMP_FORMAT)
                .to_string(),
            ConsoleField::Level => record.severity.name().to_string(),
            ConsoleField::Logger => record.logger_name.to_string(),
            ConsoleField::Message => record.body.clone(),
            ConsoleField::TraceId => record
                .trace_context
                .map(|cx| cx.trace_id().to_string())
                .unwrap_or_else(|| NO_ID.to_string()),
            ConsoleField::SpanId => record
                .trace_context
                .map(|cx| cx.span_id().to_string())
                .unwrap_or_else(|| NO_ID.to_string()),
            ConsoleField::ServiceName => record.resource.service_name().unwrap_or("").to_string(),
        }
    }

    fn render_plain(&self, record: &LogRecord) -> String {
        let (head, ids): (Vec<_>, Vec<_>) = self.config.fields.iter().partition(|field| {
            matches!(
                field,
                ConsoleField::Timestamp
                    | ConsoleField::Level
                    | ConsoleField::Logger
                    | ConsoleField::Message
            )
        });

        // Plain lines put the logger before the level.
        let order = [
            ConsoleField::Timestamp,
            ConsoleField::Logger,
            ConsoleField::Level,
            ConsoleField::Message,
        ];
        let mut line = order
            .iter()
            .filter(|field| head.contains(field))
            .map(|field| Self::field_value(*field, record))
            .collect::<Vec<_>>()
            .join(" - ");

        if !ids.is_empty() {
            let ids = ids
                .iter()
                .map(|field| format!("{}={}", field.key(), Self::field_value(**field, record)))
                .collect::<Vec<_>>()
                .join(" ");
            if line.is_empty() {
                line = format!("({ids})");
            } else {
                line = format!("{line} ({ids})");
            }
        }
        line
    }

    fn render_structured(&self, record: &LogRecord) -> String {
        let object: serde_json::Map<String, serde_json::Value> = self
            .config
            .fields
            .iter()
            .map(|field| {
                (
                    field.key().to_string(),
                    serde_json::Value::String(Self::field_value(*field, record)),
                )
            })
            .collect();
        serde_json::Value::Object(object).to_string()
    }

    fn flush_writer(&self) -> PipelineResult {
        self.writer
            .lock()?
            .flush()
            .map_err(|err| PipelineError::InternalFailure(format!("console flush failed: {err}")))
    }
}

impl LogProcessor for ConsoleSink {
    fn emit(&self, record: LogRecord) {
        let mut line = self.render(&record);
        line.push('\n');
        let result = match self.writer.lock() {
            Ok(mut writer) => writer.write_all(line.as_bytes()),
            Err(_) => Err(io::Error::other("console writer mutex poisoned")),
        };
        // Report only the first failure; the console may be gone for good.
        if let Err(err) = result {
            if !self.write_failed.swap(true, Ordering::Relaxed) {
                pipeline_debug!(name: "ConsoleSink.WriteFailed", error = format!("{err}"));
            }
        }
    }

    fn force_flush(&self) -> PipelineResult {
        self.flush_writer()
    }

    fn shutdown(&self) -> PipelineResult {
        self.flush_writer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::Severity;
    use crate::resource::Resource;
    use crate::trace::{SpanContext, SpanId, TraceId};
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn record(with_span: bool) -> LogRecord {
        let resource = Resource::builder_empty()
            .with_service_name("greeter")
            .build()
            .unwrap();
        let trace_context = with_span.then(|| {
            SpanContext::new(TraceId::from(0xabc), SpanId::from(0xdef))
        });
        LogRecord::new(Severity::Info, "app", "hello", resource)
            .with_timestamp(UNIX_EPOCH + Duration::from_micros(1_500))
            .with_trace_context(trace_context)
    }

    #[test]
    fn plain_default_fields() {
        let sink = ConsoleSink::with_writer(ConsoleConfig::default(), io::sink());
        assert_eq!(
            sink.render(&record(true)),
            "1970-01-01 00:00:00.001500 - app - INFO - hello \
             (trace_id=00000000000000000000000000000abc span_id=0000000000000def)"
        );
    }

    #[test]
    fn plain_without_span_renders_zero_ids() {
        let sink = ConsoleSink::with_writer(ConsoleConfig::default(), io::sink());
        assert!(sink
            .render(&record(false))
            .ends_with("hello (trace_id=0 span_id=0)"));
    }

    #[test]
    fn plain_with_selected_fields() {
        let config = ConsoleConfig::new(ConsoleFormat::Plain).with_fields([
            ConsoleField::Message,
            ConsoleField::Level,
            ConsoleField::ServiceName,
        ]);
        let sink = ConsoleSink::with_writer(config, io::sink());
        assert_eq!(
            sink.render(&record(true)),
            "INFO - hello (service_name=greeter)"
        );
    }

    #[test]
    fn structured_output_is_json() {
        let config = ConsoleConfig::new(ConsoleFormat::Structured)
            .with_fields([ConsoleField::Message, ConsoleField::TraceId]);
        let sink = ConsoleSink::with_writer(config, io::sink());

        let value: serde_json::Value = serde_json::from_str(&sink.render(&record(true))).unwrap();
        assert_eq!(value["message"], "hello");
        assert_eq!(value["trace_id"], "00000000000000000000000000000abc");
        assert!(value.get("level").is_none());
    }

    #[test]
    fn emit_writes_one_line_per_record() {
        let buffer = SharedBuffer::default();
        let sink = ConsoleSink::with_writer(ConsoleConfig::default(), buffer.clone());

        sink.emit(record(false));
        sink.emit(record(true));
        sink.force_flush().unwrap();

        assert_eq!(buffer.contents().lines().count(), 2);
    }

    #[test]
    fn config_from_env() {
        temp_env::with_vars(
            [
                (TELEMETRY_CONSOLE_FORMAT, Some("structured")),
                (TELEMETRY_CONSOLE_FIELDS, Some("message, level")),
            ],
            || {
                let config = ConsoleConfig::from_env().unwrap().unwrap();
                assert_eq!(config.format(), ConsoleFormat::Structured);
                assert_eq!(
                    config.fields(),
                    &[ConsoleField::Level, ConsoleField::Message]
                );
            },
        );

        temp_env::with_var(TELEMETRY_CONSOLE_FORMAT, Some("off"), || {
            assert_eq!(ConsoleConfig::from_env(), Ok(None));
        });

        temp_env::with_vars_unset([TELEMETRY_CONSOLE_FORMAT, TELEMETRY_CONSOLE_FIELDS], || {
            assert_eq!(
                ConsoleConfig::from_env(),
                Ok(Some(ConsoleConfig::default()))
            );
        });

        temp_env::with_var(TELEMETRY_CONSOLE_FIELDS, Some("message,colour"), || {
            assert!(matches!(
                ConsoleConfig::from_env(),
                Err(ConfigError::InvalidConfig { .. })
            ));
        });
    }
}
