use crate::common::KeyValue;
use crate::resource::Resource;
use crate::trace::SpanContext;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Severity of a log record, numbered as in the OpenTelemetry log data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// TRACE
    Trace = 1,
    /// DEBUG
    Debug = 5,
    /// INFO
    Info = 9,
    /// WARN
    Warn = 13,
    /// ERROR
    Error = 17,
    /// FATAL
    Fatal = 21,
}

impl Severity {
    /// The upper-case name of the severity, as rendered on the console.
    pub const fn name(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    /// The severity number of the log data model.
    pub const fn number(&self) -> i32 {
        *self as i32
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Severity::Trace),
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "fatal" | "critical" => Ok(Severity::Fatal),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// A log record, as handed to log processors and exporters.
///
/// The record is complete when it is created; processors and exporters only
/// read it.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct LogRecord {
    /// Time the event occurred.
    pub timestamp: SystemTime,

    /// Time the record was created by the pipeline.
    pub observed_timestamp: SystemTime,

    /// Severity
    pub severity: Severity,

    /// Name of the logger that emitted the record
    pub logger_name: Cow<'static, str>,

    /// The log message
    pub body: String,

    /// Additional attributes
    pub attributes: Vec<KeyValue>,

    /// Trace id and span id of the span that was current when the record was
    /// emitted, if any.
    pub trace_context: Option<SpanContext>,

    /// Resource of the emitting process
    pub resource: Resource,
}

impl LogRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        severity: Severity,
        logger_name: impl Into<Cow<'static, str>>,
        body: impl Into<String>,
        resource: Resource,
    ) -> Self {
        let now = SystemTime::now();
        LogRecord {
            timestamp: now,
            observed_timestamp: now,
            severity,
            logger_name: logger_name.into(),
            body: body.into(),
            attributes: Vec::new(),
            trace_context: None,
            resource,
        }
    }

    /// Attach the ids of the span that was current at emission time.
    pub fn with_trace_context(mut self, trace_context: Option<SpanContext>) -> Self {
        self.trace_context = trace_context;
        self
    }

    /// Add attributes.
    pub fn with_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.attributes.extend(attributes);
        self
    }

    /// Override the event time.
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_numbers_follow_the_log_data_model() {
        assert_eq!(Severity::Trace.number(), 1);
        assert_eq!(Severity::Debug.number(), 5);
        assert_eq!(Severity::Info.number(), 9);
        assert_eq!(Severity::Warn.number(), 13);
        assert_eq!(Severity::Error.number(), 17);
        assert_eq!(Severity::Fatal.number(), 21);
        assert!(Severity::Warn > Severity::Info);
    }

    #[test]
    fn severity_parses_common_spellings() {
        assert_eq!("WARNING".parse::<Severity>(), Ok(Severity::Warn));
        assert_eq!("critical".parse::<Severity>(), Ok(Severity::Fatal));
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn new_record_has_no_trace_context() {
        let record = LogRecord::new(Severity::Info, "app", "hello", Resource::empty());
        assert_eq!(record.trace_context, None);
        assert_eq!(record.timestamp, record.observed_timestamp);
        assert_eq!(record.body, "hello");
    }
}
