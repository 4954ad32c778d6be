use crate::common::KeyValue;
use crate::trace::provider::TracerProviderInner;
use crate::trace::{CorrelationContext, Span, SpanContext, SpanData, Status};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Starts spans on a [`CorrelationContext`].
///
/// Tracers are cheap to clone and can be handed to every request handler.
#[derive(Clone)]
pub struct Tracer {
    scope: Cow<'static, str>,
    provider: Arc<TracerProviderInner>,
}

impl fmt::Debug for Tracer {
    /// Omitting `provider` here is necessary to avoid cycles.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("name", &self.scope)
            .finish()
    }
}

impl Tracer {
    pub(crate) fn new(scope: Cow<'static, str>, provider: Arc<TracerProviderInner>) -> Self {
        Tracer { scope, provider }
    }

    /// The name spans of this tracer are attributed to.
    pub fn name(&self) -> &str {
        &self.scope
    }

    /// Start a span and make it the current span of `cx`.
    ///
    /// The span inherits the trace id of the current span of `cx` and records
    /// it as its parent. Without a current span a new trace is started.
    pub fn start_span(&self, cx: &CorrelationContext, name: impl Into<Cow<'static, str>>) -> Span {
        self.span_builder(name).start(cx)
    }

    /// Create a [`SpanBuilder`] for finer control over the new span.
    pub fn span_builder(&self, name: impl Into<Cow<'static, str>>) -> SpanBuilder<'_> {
        SpanBuilder {
            tracer: self,
            name: name.into(),
            parent: None,
            attributes: Vec::new(),
            start_time: None,
        }
    }

    /// Run `f` inside a new span, ending it on every exit path.
    pub fn in_span<T, F>(
        &self,
        cx: &CorrelationContext,
        name: impl Into<Cow<'static, str>>,
        f: F,
    ) -> T
    where
        F: FnOnce(&mut Span) -> T,
    {
        let mut span = self.start_span(cx, name);
        let result = f(&mut span);
        let _ = span.end();
        result
    }

    /// Like [`in_span`](Tracer::in_span), recording an error status when `f`
    /// fails.
    pub fn try_in_span<T, E, F>(
        &self,
        cx: &CorrelationContext,
        name: impl Into<Cow<'static, str>>,
        f: F,
    ) -> Result<T, E>
    where
        E: fmt::Display,
        F: FnOnce(&mut Span) -> Result<T, E>,
    {
        self.in_span(cx, name, |span| {
            let result = f(span);
            if let Err(err) = &result {
                span.set_status(Status::error(err.to_string()));
            }
            result
        })
    }
}

/// `SpanBuilder` allows span attributes to be configured before the span
/// has started.
#[derive(Debug)]
pub struct SpanBuilder<'a> {
    tracer: &'a Tracer,
    name: Cow<'static, str>,
    parent: Option<SpanContext>,
    attributes: Vec<KeyValue>,
    start_time: Option<SystemTime>,
}

impl SpanBuilder<'_> {
    /// Use `parent` instead of the current span of the context.
    pub fn with_parent(mut self, parent: SpanContext) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Add attributes known when the span starts.
    pub fn with_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.attributes.extend(attributes);
        self
    }

    /// Use an explicit start time.
    pub fn with_start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Start the span and push it onto `cx`.
    pub fn start(self, cx: &CorrelationContext) -> Span {
        let provider = &self.tracer.provider;
        let parent = self.parent.or_else(|| cx.current_span());
        let trace_id = match parent {
            Some(parent) => parent.trace_id(),
            None => provider.id_generator.new_trace_id(),
        };
        let span_context = SpanContext::new(trace_id, provider.id_generator.new_span_id());
        let start_time = self.start_time.unwrap_or_else(SystemTime::now);

        let data = SpanData {
            span_context,
            parent_span_id: parent.map(|p| p.span_id()),
            name: self.name,
            start_time,
            end_time: start_time,
            attributes: self.attributes,
            status: Status::Unset,
            scope: self.tracer.scope.clone(),
            resource: provider.resource.clone(),
        };

        let position = cx.push(span_context);
        Span::new(data, position, cx.clone(), provider.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CorrelationError;
    use crate::trace::{
        CorrelationContext, InMemorySpanExporter, IncrementIdGenerator, Status, TracerProvider,
    };

    fn provider() -> (TracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .with_id_generator(IncrementIdGenerator::new())
            .build();
        (provider, exporter)
    }

    #[test]
    fn nested_spans_share_trace_and_restore_parent() {
        let (provider, exporter) = provider();
        let tracer = provider.tracer("test");
        let cx = CorrelationContext::new();

        let mut outer = tracer.start_span(&cx, "outer");
        assert_eq!(cx.current_span(), Some(outer.span_context()));

        let mut inner = tracer.start_span(&cx, "inner");
        assert_eq!(cx.current_span(), Some(inner.span_context()));
        assert_eq!(
            inner.span_context().trace_id(),
            outer.span_context().trace_id()
        );

        inner.end().unwrap();
        assert_eq!(cx.current_span(), Some(outer.span_context()));
        outer.end().unwrap();
        assert_eq!(cx.current_span(), None);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "inner");
        assert_eq!(spans[0].parent_span_id, Some(spans[1].span_context.span_id()));
        assert_eq!(spans[1].parent_span_id, None);
    }

    #[test]
    fn contexts_do_not_interfere() {
        let (provider, _exporter) = provider();
        let tracer = provider.tracer("test");
        let first = CorrelationContext::new();
        let second = CorrelationContext::new();

        let a = tracer.start_span(&first, "a");
        let b = tracer.start_span(&second, "b");

        assert_eq!(first.current_span(), Some(a.span_context()));
        assert_eq!(second.current_span(), Some(b.span_context()));
        assert_ne!(a.span_context().trace_id(), b.span_context().trace_id());
    }

    #[test]
    fn double_end_is_detected_and_keeps_stack_intact() {
        let (provider, exporter) = provider();
        let tracer = provider.tracer("test");
        let cx = CorrelationContext::new();

        let outer = tracer.start_span(&cx, "outer");
        let mut inner = tracer.start_span(&cx, "inner");
        let inner_id = inner.span_context().span_id();

        assert_eq!(inner.end(), Ok(()));
        assert_eq!(inner.end(), Err(CorrelationError::AlreadyEnded(inner_id)));
        assert_eq!(cx.current_span(), Some(outer.span_context()));

        let sibling = tracer.start_span(&cx, "sibling");
        assert_eq!(cx.current_span(), Some(sibling.span_context()));
        drop(sibling);
        assert_eq!(cx.current_span(), Some(outer.span_context()));

        drop(outer);
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 3);
    }

    #[test]
    fn ending_a_non_current_span_discards_it() {
        let (provider, exporter) = provider();
        let tracer = provider.tracer("test");
        let cx = CorrelationContext::new();

        let mut outer = tracer.start_span(&cx, "outer");
        let inner = tracer.start_span(&cx, "inner");
        let outer_id = outer.span_context().span_id();

        assert_eq!(outer.end(), Err(CorrelationError::NotCurrent(outer_id)));
        assert_eq!(cx.current_span(), Some(inner.span_context()));
        assert!(!outer.is_recording());

        drop(inner);
        assert_eq!(cx.current_span(), None);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "inner");
    }

    #[test]
    fn span_ends_on_early_exit() {
        let (provider, exporter) = provider();
        let tracer = provider.tracer("test");
        let cx = CorrelationContext::new();

        fn work(tracer: &crate::trace::Tracer, cx: &CorrelationContext) -> Result<(), String> {
            let _span = tracer.start_span(cx, "work");
            "boom".parse::<u32>().map_err(|e| e.to_string())?;
            Ok(())
        }

        assert!(work(&tracer, &cx).is_err());
        assert_eq!(cx.current_span(), None);
        assert_eq!(exporter.get_finished_spans().unwrap()[0].name, "work");
    }

    #[test]
    fn span_ends_on_panic() {
        let (provider, exporter) = provider();
        let tracer = provider.tracer("test");
        let cx = CorrelationContext::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tracer.in_span(&cx, "panicking", |_| panic!("boom"))
        }));

        assert!(result.is_err());
        assert_eq!(cx.current_span(), None);
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn try_in_span_records_error_status() {
        let (provider, exporter) = provider();
        let tracer = provider.tracer("test");
        let cx = CorrelationContext::new();

        let result: Result<(), String> = tracer.try_in_span(&cx, "op", |_| Err("bad input".into()));
        assert!(result.is_err());

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].status, Status::error("bad input"));
    }

    #[test]
    fn explicit_parent_overrides_context() {
        let (provider, _exporter) = provider();
        let tracer = provider.tracer("test");
        let remote = crate::trace::SpanContext::new(
            crate::trace::TraceId::from(42),
            crate::trace::SpanId::from(43),
        );

        let cx = CorrelationContext::new();
        let span = tracer.span_builder("child").with_parent(remote).start(&cx);
        assert_eq!(span.span_context().trace_id(), remote.trace_id());

        let forked = CorrelationContext::with_parent(remote);
        let span = tracer.start_span(&forked, "child");
        assert_eq!(span.span_context().trace_id(), remote.trace_id());
    }
}
