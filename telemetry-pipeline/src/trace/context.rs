//! Per-execution-flow tracking of the current span.
//!
//! A [`CorrelationContext`] is a stack of the spans opened on one logical
//! execution flow: a request handler, a task, a thread. Starting a span pushes
//! it; ending it pops it and restores its parent as the current span. Each
//! flow owns its own context, so concurrent requests never see each other's
//! spans and no process-wide state is involved.
//!
//! The context is passed explicitly to [`Tracer::start_span`] and
//! [`Logger::emit_in`]. For code that cannot thread it through (for example
//! `tracing` events turned into log records by [`TelemetryLayer`]) a context
//! can be made ambient for the duration of a future with
//! [`CorrelationContext::scope`], or a closure with
//! [`CorrelationContext::sync_scope`].
//!
//! [`Tracer::start_span`]: crate::trace::Tracer::start_span
//! [`Logger::emit_in`]: crate::logs::Logger::emit_in
//! [`TelemetryLayer`]: crate::appender::TelemetryLayer
use crate::error::CorrelationError;
use crate::trace::{SpanContext, SpanId};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

tokio::task_local! {
    static CURRENT_CONTEXT: CorrelationContext;
}

/// The stack of open spans of one execution flow.
///
/// Cloning is cheap and yields a handle to the same stack. To hand a child
/// task its own stack rooted at the current span, use [`fork`].
///
/// [`fork`]: CorrelationContext::fork
#[derive(Clone, Debug, Default)]
pub struct CorrelationContext {
    inner: Arc<Mutex<SpanStack>>,
}

impl CorrelationContext {
    /// Create an empty context with no current span.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty context whose spans become children of `parent`.
    ///
    /// This is how a span context received from a remote caller, or from
    /// another flow, becomes the root of a new stack.
    pub fn with_parent(parent: SpanContext) -> Self {
        CorrelationContext {
            inner: Arc::new(Mutex::new(SpanStack {
                parent: Some(parent),
                stack: Vec::new(),
            })),
        }
    }

    /// The innermost open span, or the root parent if no span is open.
    ///
    /// This is a read-only lookup.
    pub fn current_span(&self) -> Option<SpanContext> {
        self.lock().current()
    }

    /// Number of spans currently open on this context.
    pub fn depth(&self) -> usize {
        self.lock().stack.iter().filter(|entry| entry.is_some()).count()
    }

    /// Create a new, independent context rooted at the current span.
    ///
    /// Spans started on the fork continue the current trace but are pushed on
    /// their own stack, so a spawned task cannot disturb its parent's stack.
    pub fn fork(&self) -> Self {
        match self.current_span() {
            Some(parent) => CorrelationContext::with_parent(parent),
            None => CorrelationContext::new(),
        }
    }

    /// The context made ambient by [`scope`] or [`sync_scope`], if any.
    ///
    /// [`scope`]: CorrelationContext::scope
    /// [`sync_scope`]: CorrelationContext::sync_scope
    pub fn current() -> Option<CorrelationContext> {
        CURRENT_CONTEXT.try_with(Clone::clone).ok()
    }

    /// Make this context ambient while `f` runs.
    pub async fn scope<F>(self, f: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_CONTEXT.scope(self, f).await
    }

    /// Make this context ambient while the closure runs.
    pub fn sync_scope<F, R>(self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        CURRENT_CONTEXT.sync_scope(self, f)
    }

    pub(crate) fn push(&self, span: SpanContext) -> usize {
        self.lock().push(span)
    }

    pub(crate) fn pop(&self, position: usize, span_id: SpanId) -> Result<(), CorrelationError> {
        self.lock().pop(position, span_id)
    }

    // The stack is always left consistent between operations, so a poisoned
    // lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, SpanStack> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct SpanStack {
    /// Parent of the bottom-most span.
    parent: Option<SpanContext>,
    /// Open spans. Entries ended out of order are cleared in place and
    /// trimmed once everything above them has ended. The last entry is
    /// never `None`.
    stack: Vec<Option<SpanContext>>,
}

impl SpanStack {
    /// Push a span and return its position, which must be handed back to
    /// [`SpanStack::pop`].
    fn push(&mut self, span: SpanContext) -> usize {
        self.stack.push(Some(span));
        self.stack.len()
    }

    fn current(&self) -> Option<SpanContext> {
        self.stack.last().copied().flatten().or(self.parent)
    }

    fn pop(&mut self, position: usize, span_id: SpanId) -> Result<(), CorrelationError> {
        let open = position
            .checked_sub(1)
            .and_then(|idx| self.stack.get(idx))
            .copied()
            .flatten()
            .is_some_and(|entry| entry.span_id() == span_id);
        if !open {
            return Err(CorrelationError::AlreadyEnded(span_id));
        }

        if position == self.stack.len() {
            self.stack.pop();
            // Shrink the stack to clear out any out of order pops.
            while let Some(None) = self.stack.last() {
                self.stack.pop();
            }
            Ok(())
        } else {
            // Out of order: spans opened after this one are still open.
            self.stack[position - 1] = None;
            Err(CorrelationError::NotCurrent(span_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceId;

    fn span(id: u64) -> SpanContext {
        SpanContext::new(TraceId::from(7), SpanId::from(id))
    }

    #[test]
    fn current_span_tracks_innermost_open_span() {
        let cx = CorrelationContext::new();
        assert_eq!(cx.current_span(), None);

        let a = cx.push(span(1));
        let b = cx.push(span(2));
        assert_eq!(cx.current_span(), Some(span(2)));

        cx.pop(b, SpanId::from(2)).unwrap();
        assert_eq!(cx.current_span(), Some(span(1)));

        cx.pop(a, SpanId::from(1)).unwrap();
        assert_eq!(cx.current_span(), None);
    }

    #[test]
    fn out_of_order_pop_is_reported_and_keeps_current() {
        let cx = CorrelationContext::new();
        let a = cx.push(span(1));
        let b = cx.push(span(2));
        let c = cx.push(span(3));

        assert_eq!(
            cx.pop(b, SpanId::from(2)),
            Err(CorrelationError::NotCurrent(SpanId::from(2)))
        );
        assert_eq!(cx.current_span(), Some(span(3)));
        assert_eq!(cx.depth(), 2);

        // Ending the top skips over the cleared slot.
        cx.pop(c, SpanId::from(3)).unwrap();
        assert_eq!(cx.current_span(), Some(span(1)));

        cx.pop(a, SpanId::from(1)).unwrap();
        assert_eq!(cx.depth(), 0);
    }

    #[test]
    fn double_pop_is_already_ended() {
        let cx = CorrelationContext::new();
        let a = cx.push(span(1));
        cx.pop(a, SpanId::from(1)).unwrap();

        assert_eq!(
            cx.pop(a, SpanId::from(1)),
            Err(CorrelationError::AlreadyEnded(SpanId::from(1)))
        );

        // A new span reusing the position is not affected by a stale pop.
        let b = cx.push(span(2));
        assert_eq!(b, a);
        assert_eq!(
            cx.pop(a, SpanId::from(1)),
            Err(CorrelationError::AlreadyEnded(SpanId::from(1)))
        );
        assert_eq!(cx.current_span(), Some(span(2)));
    }

    #[test]
    fn fork_is_rooted_at_current_span() {
        let cx = CorrelationContext::new();
        cx.push(span(1));

        let child = cx.fork();
        assert_eq!(child.current_span(), Some(span(1)));
        assert_eq!(child.depth(), 0);

        child.push(span(2));
        assert_eq!(cx.current_span(), Some(span(1)));
    }

    #[test]
    fn sync_scope_makes_context_ambient() {
        assert!(CorrelationContext::current().is_none());

        let cx = CorrelationContext::new();
        cx.push(span(5));
        let seen = cx
            .clone()
            .sync_scope(|| CorrelationContext::current().and_then(|cx| cx.current_span()));
        assert_eq!(seen, Some(span(5)));
        assert!(CorrelationContext::current().is_none());
    }

    #[tokio::test]
    async fn scope_is_task_local() {
        let cx = CorrelationContext::new();
        cx.push(span(9));

        let seen = cx
            .scope(async {
                tokio::task::yield_now().await;
                CorrelationContext::current().and_then(|cx| cx.current_span())
            })
            .await;
        assert_eq!(seen, Some(span(9)));

        let other = tokio::spawn(async { CorrelationContext::current().is_none() })
            .await
            .unwrap();
        assert!(other);
    }
}
