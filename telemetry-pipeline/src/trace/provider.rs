use crate::error::{PipelineError, PipelineResult};
use crate::pipeline_debug;
use crate::resource::Resource;
use crate::trace::{
    IdGenerator, RandomIdGenerator, SimpleSpanProcessor, SpanData, SpanExporter, SpanProcessor,
    Tracer,
};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// TracerProvider inner type
#[derive(Debug)]
pub(crate) struct TracerProviderInner {
    processors: Vec<Box<dyn SpanProcessor>>,
    pub(crate) resource: Resource,
    pub(crate) id_generator: Box<dyn IdGenerator>,
    is_shutdown: AtomicBool,
}

impl TracerProviderInner {
    /// Hand a finished span to every processor.
    pub(crate) fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return;
        }
        if let Some((last, rest)) = self.processors.split_last() {
            for processor in rest {
                processor.on_end(span.clone());
            }
            last.on_end(span);
        }
    }

    /// Called both from explicit shutdown and from Drop when the last
    /// reference is released.
    fn shutdown(&self) -> Vec<PipelineResult> {
        let mut results = vec![];
        for processor in &self.processors {
            let result = processor.shutdown();
            if let Err(err) = &result {
                pipeline_debug!(name: "TracerProvider.ShutdownError",
                        error = format!("{err}"));
            }
            results.push(result);
        }
        results
    }
}

impl Drop for TracerProviderInner {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            let _ = self.shutdown();
        } else {
            pipeline_debug!(
                name: "TracerProvider.Drop.AlreadyShutdown",
                message = "TracerProvider was already shut down; drop will not attempt shutdown again."
            );
        }
    }
}

/// Creator of named [`Tracer`] instances, owning the span processors.
///
/// Cloning a `TracerProvider` and dropping the clone does not stop span
/// processing. Processing stops when [`shutdown`] is called or when the last
/// reference (including those held by tracers and open spans) is dropped.
///
/// [`shutdown`]: TracerProvider::shutdown
#[derive(Clone, Debug)]
pub struct TracerProvider {
    inner: Arc<TracerProviderInner>,
}

impl Default for TracerProvider {
    fn default() -> Self {
        TracerProvider::builder().build()
    }
}

impl TracerProvider {
    /// Create a new [`TracerProvider`] builder.
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// Create a tracer whose spans are attributed to `name`.
    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> Tracer {
        Tracer::new(name.into(), self.inner.clone())
    }

    /// The resource attached to every span of this provider.
    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    /// Force flush all remaining spans in span processors.
    pub fn force_flush(&self) -> PipelineResult {
        let results: Vec<_> = self
            .inner
            .processors
            .iter()
            .map(|processor| processor.force_flush())
            .collect();
        combine_results(results)
    }

    /// Shuts down every span processor, exporting what they still hold.
    ///
    /// A second call returns [`PipelineError::AlreadyShutdown`].
    pub fn shutdown(&self) -> PipelineResult {
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

/// A single failure is returned as is, several are folded into one message.
pub(crate) fn combine_results(results: Vec<PipelineResult>) -> PipelineResult {
    let mut errors: Vec<PipelineError> = results.into_iter().filter_map(Result::err).collect();
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(PipelineError::InternalFailure(format!("errs: {errors:?}"))),
    }
}

/// Builder for [`TracerProvider`].
#[derive(Debug, Default)]
pub struct TracerProviderBuilder {
    processors: Vec<Box<dyn SpanProcessor>>,
    resource: Option<Resource>,
    id_generator: Option<Box<dyn IdGenerator>>,
}

impl TracerProviderBuilder {
    /// Export each span as soon as it ends, on the calling thread.
    ///
    /// Meant for tests and debugging; use a [`BatchSpanProcessor`] otherwise.
    ///
    /// [`BatchSpanProcessor`]: crate::trace::BatchSpanProcessor
    pub fn with_simple_exporter<T: SpanExporter + 'static>(self, exporter: T) -> Self {
        self.with_span_processor(SimpleSpanProcessor::new(exporter))
    }

    /// Add a [`SpanProcessor`].
    pub fn with_span_processor<T: SpanProcessor + 'static>(mut self, processor: T) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// The resource shared by every span.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Replace the default random id generator.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.id_generator = Some(Box::new(id_generator));
        self
    }

    /// Create a new provider from this configuration.
    pub fn build(self) -> TracerProvider {
        TracerProvider {
            inner: Arc::new(TracerProviderInner {
                processors: self.processors,
                resource: self.resource.unwrap_or_default(),
                id_generator: self
                    .id_generator
                    .unwrap_or_else(|| Box::new(RandomIdGenerator::default())),
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}
