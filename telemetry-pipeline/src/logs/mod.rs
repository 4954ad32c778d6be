//! # Log pipeline
//!
//! A [`Logger`] builds a [`LogRecord`], stamps it with the ids of the current
//! span of a [`CorrelationContext`](crate::trace::CorrelationContext), and
//! hands it to the [`LogProcessor`]s of its [`LoggerProvider`]: typically a
//! [`ConsoleSink`] followed by a [`BatchLogProcessor`].
mod console;
mod export;
mod log_processor;
mod logger;
mod record;

pub use console::{
    ConsoleConfig, ConsoleField, ConsoleFormat, ConsoleSink, TELEMETRY_CONSOLE_FIELDS,
    TELEMETRY_CONSOLE_FORMAT,
};
pub use export::{InMemoryLogExporter, LogExporter};
pub use log_processor::{
    BatchLogProcessor, BatchLogProcessorBuilder, LogProcessor, SimpleLogProcessor,
};
pub use logger::{Logger, LoggerProvider, LoggerProviderBuilder};
pub use record::{LogRecord, Severity};
