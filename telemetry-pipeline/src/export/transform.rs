//! Conversion of finished spans and log records into OTLP protobuf messages.
//!
//! Records are grouped by resource and then by scope. Only consecutive records
//! sharing a resource and scope are merged, so the order of records inside the
//! request is the order of the batch.
use crate::common::{KeyValue, Value};
use crate::logs::LogRecord;
use crate::resource::Resource;
use crate::trace::{SpanData, Status};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{
    any_value, AnyValue, InstrumentationScope, KeyValue as ProtoKeyValue,
};
use opentelemetry_proto::tonic::logs::v1::{
    LogRecord as ProtoLogRecord, ResourceLogs, ScopeLogs,
};
use opentelemetry_proto::tonic::resource::v1::Resource as ProtoResource;
use opentelemetry_proto::tonic::trace::v1::{
    span::SpanKind, status::StatusCode, ResourceSpans, ScopeSpans, Span as ProtoSpan,
    Status as ProtoStatus,
};
use std::time::{SystemTime, UNIX_EPOCH};

const FLAG_SAMPLED: u32 = 0x01;

fn to_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn string_value(value: impl Into<String>) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::StringValue(value.into())),
    }
}

impl From<&Value> for AnyValue {
    fn from(value: &Value) -> Self {
        let value = match value {
            Value::Bool(v) => any_value::Value::BoolValue(*v),
            Value::I64(v) => any_value::Value::IntValue(*v),
            Value::F64(v) => any_value::Value::DoubleValue(*v),
            Value::String(v) => any_value::Value::StringValue(v.to_string()),
        };
        AnyValue { value: Some(value) }
    }
}

fn attributes(attributes: &[KeyValue]) -> Vec<ProtoKeyValue> {
    attributes
        .iter()
        .map(|kv| ProtoKeyValue {
            key: kv.key.to_string(),
            value: Some((&kv.value).into()),
        })
        .collect()
}

fn resource(resource: &Resource) -> ProtoResource {
    ProtoResource {
        attributes: resource
            .iter()
            .map(|(key, value)| ProtoKeyValue {
                key: key.to_string(),
                value: Some(string_value(value)),
            })
            .collect(),
        ..Default::default()
    }
}

fn scope(name: &str) -> InstrumentationScope {
    InstrumentationScope {
        name: name.to_string(),
        ..Default::default()
    }
}

fn same_resource(a: &Resource, b: &Resource) -> bool {
    a.ptr_eq(b) || a == b
}

impl From<SpanData> for ProtoSpan {
    fn from(span: SpanData) -> Self {
        let status = match &span.status {
            Status::Unset => None,
            Status::Ok => Some(ProtoStatus {
                code: StatusCode::Ok as i32,
                ..Default::default()
            }),
            Status::Error { description } => Some(ProtoStatus {
                message: description.to_string(),
                code: StatusCode::Error as i32,
            }),
        };
        ProtoSpan {
            trace_id: span.span_context.trace_id().to_bytes().to_vec(),
            span_id: span.span_context.span_id().to_bytes().to_vec(),
            parent_span_id: span
                .parent_span_id
                .map(|id| id.to_bytes().to_vec())
                .unwrap_or_default(),
            flags: FLAG_SAMPLED,
            name: span.name.into_owned(),
            kind: SpanKind::Internal as i32,
            start_time_unix_nano: to_nanos(span.start_time),
            end_time_unix_nano: to_nanos(span.end_time),
            attributes: attributes(&span.attributes),
            status,
            ..Default::default()
        }
    }
}

impl From<LogRecord> for ProtoLogRecord {
    fn from(record: LogRecord) -> Self {
        let (trace_id, span_id, flags) = match record.trace_context {
            Some(cx) => (
                cx.trace_id().to_bytes().to_vec(),
                cx.span_id().to_bytes().to_vec(),
                FLAG_SAMPLED,
            ),
            None => (Vec::new(), Vec::new(), 0),
        };
        ProtoLogRecord {
            time_unix_nano: to_nanos(record.timestamp),
            observed_time_unix_nano: to_nanos(record.observed_timestamp),
            severity_number: record.severity.number(),
            severity_text: record.severity.name().to_string(),
            body: Some(string_value(record.body)),
            attributes: attributes(&record.attributes),
            flags,
            trace_id,
            span_id,
            ..Default::default()
        }
    }
}

/// Build the trace export request for a batch.
pub(crate) fn traces_request(batch: Vec<SpanData>) -> ExportTraceServiceRequest {
    let mut resource_spans: Vec<ResourceSpans> = Vec::new();
    let mut last_resource: Option<Resource> = None;

    for span in batch {
        let starts_new_resource = !last_resource
            .as_ref()
            .is_some_and(|last| same_resource(last, &span.resource));
        if starts_new_resource {
            resource_spans.push(ResourceSpans {
                resource: Some(resource(&span.resource)),
                ..Default::default()
            });
            last_resource = Some(span.resource.clone());
        }
        let Some(current) = resource_spans.last_mut() else {
            continue;
        };

        let same_scope = current
            .scope_spans
            .last()
            .and_then(|s| s.scope.as_ref())
            .is_some_and(|s| s.name == span.scope);
        if !same_scope {
            current.scope_spans.push(ScopeSpans {
                scope: Some(scope(&span.scope)),
                ..Default::default()
            });
        }
        if let Some(scope_spans) = current.scope_spans.last_mut() {
            scope_spans.spans.push(span.into());
        }
    }

    ExportTraceServiceRequest { resource_spans }
}

/// Build the logs export request for a batch.
pub(crate) fn logs_request(batch: Vec<LogRecord>) -> ExportLogsServiceRequest {
    let mut resource_logs: Vec<ResourceLogs> = Vec::new();
    let mut last_resource: Option<Resource> = None;

    for record in batch {
        let starts_new_resource = !last_resource
            .as_ref()
            .is_some_and(|last| same_resource(last, &record.resource));
        if starts_new_resource {
            resource_logs.push(ResourceLogs {
                resource: Some(resource(&record.resource)),
                ..Default::default()
            });
            last_resource = Some(record.resource.clone());
        }
        let Some(current) = resource_logs.last_mut() else {
            continue;
        };

        let same_scope = current
            .scope_logs
            .last()
            .and_then(|s| s.scope.as_ref())
            .is_some_and(|s| s.name == record.logger_name);
        if !same_scope {
            current.scope_logs.push(ScopeLogs {
                scope: Some(scope(&record.logger_name)),
                ..Default::default()
            });
        }
        if let Some(scope_logs) = current.scope_logs.last_mut() {
            scope_logs.log_records.push(record.into());
        }
    }

    ExportLogsServiceRequest { resource_logs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::Severity;
    use crate::trace::{
        CorrelationContext, InMemorySpanExporter, SpanContext, SpanId, TraceId, TracerProvider,
    };

    fn spans(resource: Resource, scopes: &[&'static str]) -> Vec<SpanData> {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .with_resource(resource)
            .build();
        let cx = CorrelationContext::new();
        for (i, scope) in scopes.iter().enumerate() {
            provider
                .tracer(*scope)
                .in_span(&cx, format!("span-{i}"), |span| {
                    span.set_attribute(KeyValue::new("index", i as i64));
                });
        }
        exporter.get_finished_spans().unwrap()
    }

    #[test]
    fn spans_are_grouped_by_consecutive_scope() {
        let resource = Resource::builder_empty()
            .with_service_name("svc")
            .build()
            .unwrap();
        let request = traces_request(spans(resource, &["a", "a", "b", "a"]));

        assert_eq!(request.resource_spans.len(), 1);
        let scope_spans = &request.resource_spans[0].scope_spans;
        let layout: Vec<(String, usize)> = scope_spans
            .iter()
            .map(|s| (s.scope.as_ref().unwrap().name.clone(), s.spans.len()))
            .collect();
        assert_eq!(
            layout,
            vec![("a".into(), 2), ("b".into(), 1), ("a".into(), 1)]
        );

        let names: Vec<&str> = scope_spans
            .iter()
            .flat_map(|s| s.spans.iter().map(|span| span.name.as_str()))
            .collect();
        assert_eq!(names, ["span-0", "span-1", "span-2", "span-3"]);

        let resource = request.resource_spans[0].resource.as_ref().unwrap();
        assert_eq!(resource.attributes[0].key, "service.name");
    }

    #[test]
    fn span_fields_are_converted() {
        let span = spans(Resource::empty(), &["a"]).remove(0);
        let proto: ProtoSpan = span.into();

        assert_eq!(proto.trace_id.len(), 16);
        assert_eq!(proto.span_id.len(), 8);
        assert!(proto.parent_span_id.is_empty());
        assert_eq!(proto.kind, SpanKind::Internal as i32);
        assert!(proto.end_time_unix_nano >= proto.start_time_unix_nano);
        assert_eq!(proto.status, None);
        assert_eq!(
            proto.attributes[0].value,
            Some(AnyValue {
                value: Some(any_value::Value::IntValue(0))
            })
        );
    }

    #[test]
    fn error_status_is_converted() {
        let mut span = spans(Resource::empty(), &["a"]).remove(0);
        span.status = Status::error("boom");
        let proto: ProtoSpan = span.into();
        assert_eq!(
            proto.status,
            Some(ProtoStatus {
                message: "boom".into(),
                code: StatusCode::Error as i32
            })
        );
    }

    #[test]
    fn log_records_carry_correlation_ids() {
        let cx = SpanContext::new(TraceId::from(1), SpanId::from(2));
        let correlated = LogRecord::new(Severity::Warn, "app", "hello", Resource::empty())
            .with_trace_context(Some(cx));
        let plain = LogRecord::new(Severity::Info, "app", "bye", Resource::empty());

        let request = logs_request(vec![correlated, plain]);
        let records = &request.resource_logs[0].scope_logs[0].log_records;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].trace_id, TraceId::from(1).to_bytes().to_vec());
        assert_eq!(records[0].span_id, SpanId::from(2).to_bytes().to_vec());
        assert_eq!(records[0].severity_number, 13);
        assert_eq!(records[0].severity_text, "WARN");
        assert!(records[1].trace_id.is_empty());
        assert_eq!(records[1].body, Some(string_value("bye")));
    }

    #[test]
    fn different_resources_start_new_groups() {
        let first = Resource::builder_empty().with_service_name("one").build().unwrap();
        let second = Resource::builder_empty().with_service_name("two").build().unwrap();
        let batch = vec![
            LogRecord::new(Severity::Info, "app", "1", first.clone()),
            LogRecord::new(Severity::Info, "app", "2", second),
            LogRecord::new(Severity::Info, "app", "3", first),
        ];

        assert_eq!(logs_request(batch).resource_logs.len(), 3);
    }
}
