//! # Span
//!
//! A [`Span`] represents one traced operation. It becomes the current span of
//! the [`CorrelationContext`] it was started on and stays current until it
//! ends. Ending happens exactly once: explicitly through [`Span::end`], or
//! implicitly when the span is dropped, which covers early returns, `?` and
//! panics.
//!
//! Once ended, the span's [`SpanData`] is handed to the span processors and
//! the span itself becomes inert.
use crate::common::KeyValue;
use crate::error::CorrelationError;
use crate::pipeline_warn;
use crate::resource::Resource;
use crate::trace::provider::TracerProviderInner;
use crate::trace::{CorrelationContext, SpanContext, SpanId};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::SystemTime;

/// The status of a [`Span`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Status {
    /// The default status.
    #[default]
    Unset,

    /// The operation has been validated by an application developer or
    /// operator to have completed successfully.
    Ok,

    /// The operation contains an error.
    Error {
        /// The description of the error
        description: Cow<'static, str>,
    },
}

impl Status {
    /// Create a new error status with a given description.
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }
}

/// The finished state of a span, as handed to processors and exporters.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Trace id and span id
    pub span_context: SpanContext,
    /// Span parent id, absent for root spans
    pub parent_span_id: Option<SpanId>,
    /// Span name
    pub name: Cow<'static, str>,
    /// Span start time
    pub start_time: SystemTime,
    /// Span end time
    pub end_time: SystemTime,
    /// Span attributes
    pub attributes: Vec<KeyValue>,
    /// Span status
    pub status: Status,
    /// Name of the tracer that created the span
    pub scope: Cow<'static, str>,
    /// Resource of the emitting process, shared with every other span
    pub resource: Resource,
}

/// An open span.
///
/// Dropping the span ends it.
#[derive(Debug)]
pub struct Span {
    span_context: SpanContext,
    /// `None` once the span has ended.
    data: Option<SpanData>,
    position: usize,
    cx: CorrelationContext,
    provider: Arc<TracerProviderInner>,
}

impl Span {
    pub(crate) fn new(
        data: SpanData,
        position: usize,
        cx: CorrelationContext,
        provider: Arc<TracerProviderInner>,
    ) -> Self {
        Span {
            span_context: data.span_context,
            data: Some(data),
            position,
            cx,
            provider,
        }
    }

    /// Trace id and span id of this span.
    pub fn span_context(&self) -> SpanContext {
        self.span_context
    }

    /// Returns `true` until the span has ended.
    pub fn is_recording(&self) -> bool {
        self.data.is_some()
    }

    /// Set an attribute. Has no effect once the span has ended.
    pub fn set_attribute(&mut self, attribute: KeyValue) {
        if let Some(data) = self.data.as_mut() {
            data.attributes.push(attribute);
        }
    }

    /// Set the status. Has no effect once the span has ended.
    ///
    /// An `Ok` status is final; an `Error` status can only be replaced by `Ok`.
    pub fn set_status(&mut self, status: Status) {
        if let Some(data) = self.data.as_mut() {
            match (&data.status, &status) {
                (Status::Ok, _) => {}
                (Status::Error { .. }, Status::Unset) => {}
                _ => data.status = status,
            }
        }
    }

    /// Update the span name. Has no effect once the span has ended.
    pub fn update_name(&mut self, name: impl Into<Cow<'static, str>>) {
        if let Some(data) = self.data.as_mut() {
            data.name = name.into();
        }
    }

    /// End the span.
    ///
    /// The span is popped from its correlation context, restoring its parent
    /// as the current span, and handed to the span processors.
    ///
    /// Calling `end` a second time returns [`CorrelationError::AlreadyEnded`]
    /// and leaves the context untouched. Ending a span while spans started
    /// after it are still open returns [`CorrelationError::NotCurrent`]; the
    /// span is removed from the context and discarded.
    pub fn end(&mut self) -> Result<(), CorrelationError> {
        self.end_with_timestamp(SystemTime::now())
    }

    /// End the span with the given end time. See [`Span::end`].
    pub fn end_with_timestamp(&mut self, timestamp: SystemTime) -> Result<(), CorrelationError> {
        let span_id = self.span_context.span_id();
        let Some(mut data) = self.data.take() else {
            pipeline_warn!(
                name: "Span.End.AlreadyEnded",
                span_id = format!("{span_id}"),
                message = "Span ended more than once. The second call is ignored."
            );
            return Err(CorrelationError::AlreadyEnded(span_id));
        };

        if let Err(err) = self.cx.pop(self.position, span_id) {
            pipeline_warn!(
                name: "Span.End.NotCurrent",
                span_id = format!("{span_id}"),
                error = format!("{err}"),
                message = "Span ended while spans opened after it are still open. The span is discarded."
            );
            return Err(err);
        }

        data.end_time = timestamp.max(data.start_time);
        self.provider.on_end(data);
        Ok(())
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if self.data.is_some() {
            let _ = self.end();
        }
    }
}
