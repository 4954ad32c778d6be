//! Bridge from `tracing` events to pipeline log records.
//!
//! Install [`TelemetryLayer`] in a `tracing_subscriber` registry and every
//! event becomes a [`LogRecord`]: the target is the logger name, the `message`
//! field is the body and the other fields are attributes. Records are
//! correlated with the ambient [`CorrelationContext`] installed by
//! [`CorrelationContext::scope`].
//!
//! Events from this crate's own diagnostics, and events raised on threads
//! running exports, are ignored. Events from the transport crates (`hyper`,
//! `h2`, `tonic`, `reqwest`) should be filtered out with an `EnvFilter` on
//! the layer so exports do not feed themselves.
use crate::common::KeyValue;
use crate::logs::{LogRecord, LoggerProvider, Severity};
use crate::suppression;
use crate::trace::CorrelationContext;
use std::fmt;
use tracing_core::field::{Field, Visit};
use tracing_core::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const OWN_TARGETS: [&str; 2] = [env!("CARGO_PKG_NAME"), "telemetry_pipeline"];

#[derive(Default)]
struct EventVisitor {
    body: Option<String>,
    attributes: Vec<KeyValue>,
}

impl Visit for EventVisitor {
    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if field.name() == "message" {
            self.body = Some(value.to_string());
        } else {
            self.attributes
                .push(KeyValue::new(field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.body = Some(format!("{value:?}"));
        } else {
            self.attributes
                .push(KeyValue::new(field.name(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.body = Some(value.to_string());
        } else {
            self.attributes
                .push(KeyValue::new(field.name(), value.to_string()));
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.attributes.push(KeyValue::new(field.name(), value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.attributes.push(KeyValue::new(field.name(), value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        match i64::try_from(value) {
            Ok(value) => self.attributes.push(KeyValue::new(field.name(), value)),
            Err(_) => self
                .attributes
                .push(KeyValue::new(field.name(), value.to_string())),
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.attributes.push(KeyValue::new(field.name(), value));
    }
}

/// A `tracing_subscriber` layer emitting every event through a
/// [`LoggerProvider`].
///
/// ```no_run
/// use telemetry_pipeline::appender::TelemetryLayer;
/// use telemetry_pipeline::logs::LoggerProvider;
/// use tracing_subscriber::prelude::*;
///
/// let provider = LoggerProvider::builder().build();
/// tracing_subscriber::registry()
///     .with(TelemetryLayer::new(&provider))
///     .init();
/// ```
#[derive(Debug, Clone)]
pub struct TelemetryLayer {
    provider: LoggerProvider,
}

impl TelemetryLayer {
    /// Create a layer emitting through `provider`.
    pub fn new(provider: &LoggerProvider) -> Self {
        TelemetryLayer {
            provider: provider.clone(),
        }
    }
}

impl<S> Layer<S> for TelemetryLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if suppression::is_suppressed() {
            return;
        }
        let meta = event.metadata();
        let target = meta.target();
        if OWN_TARGETS.iter().any(|own| {
            target
                .strip_prefix(own)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        }) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let trace_context = CorrelationContext::current().and_then(|cx| cx.current_span());
        let record = LogRecord::new(
            severity_of(meta.level()),
            target,
            visitor.body.unwrap_or_default(),
            self.provider.resource().clone(),
        )
        .with_trace_context(trace_context)
        .with_attributes(visitor.attributes);
        self.provider.emit_record(record);
    }
}

fn severity_of(level: &Level) -> Severity {
    match *level {
        Level::TRACE => Severity::Trace,
        Level::DEBUG => Severity::Debug,
        Level::INFO => Severity::Info,
        Level::WARN => Severity::Warn,
        _ => Severity::Error,
    }
}
