//! # Batch worker
//!
//! The engine shared by [`BatchSpanProcessor`] and [`BatchLogProcessor`]. It
//! buffers records in a bounded channel and exports them in batches from a
//! dedicated background thread, so producers never wait on network I/O.
//!
//! ```ascii
//!   +-----------+  try_send   +--------------+   export   +------------+
//!   | producers +------------>| data channel +----------->|  exporter  |
//!   +-----+-----+             +------+-------+            +------------+
//!         |  ExportBatch             ^ drained by
//!         +--------------------> worker thread <--- ForceFlush / Shutdown
//! ```
//!
//! A batch is exported when:
//! - `max_export_batch_size` records are waiting,
//! - `scheduled_delay` has passed since the previous export,
//! - `force_flush` or `shutdown` is called.
//!
//! A failed export is reported once through `pipeline_error!`, counted in
//! [`PipelineStats`], and the batch is dropped. There is no retry at this
//! level.
//!
//! [`BatchSpanProcessor`]: crate::trace::BatchSpanProcessor
//! [`BatchLogProcessor`]: crate::logs::BatchLogProcessor
use crate::error::{ConfigError, ExportError, ExportResult, PipelineError, PipelineResult};
use crate::{pipeline_debug, pipeline_error, pipeline_warn, suppression};
use futures_util::future::{select, Either};
use std::cmp::min;
use std::env;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Delay interval between two consecutive span exports.
pub const OTEL_BSP_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
/// Default delay interval between two consecutive span exports.
pub const OTEL_BSP_SCHEDULE_DELAY_DEFAULT: Duration = Duration::from_millis(5_000);
/// Maximum span queue size.
pub const OTEL_BSP_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
/// Maximum number of spans per export, clamped to the queue size.
pub const OTEL_BSP_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
/// Maximum allowed time to export a span batch.
pub const OTEL_BSP_EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";

/// Delay interval between two consecutive log exports.
pub const OTEL_BLRP_SCHEDULE_DELAY: &str = "OTEL_BLRP_SCHEDULE_DELAY";
/// Default delay interval between two consecutive log exports.
pub const OTEL_BLRP_SCHEDULE_DELAY_DEFAULT: Duration = Duration::from_millis(1_000);
/// Maximum log record queue size.
pub const OTEL_BLRP_MAX_QUEUE_SIZE: &str = "OTEL_BLRP_MAX_QUEUE_SIZE";
/// Maximum number of log records per export, clamped to the queue size.
pub const OTEL_BLRP_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BLRP_MAX_EXPORT_BATCH_SIZE";
/// Maximum allowed time to export a log batch.
pub const OTEL_BLRP_EXPORT_TIMEOUT: &str = "OTEL_BLRP_EXPORT_TIMEOUT";

/// Default maximum queue size.
pub const MAX_QUEUE_SIZE_DEFAULT: usize = 2_048;
/// Default maximum batch size.
pub const MAX_EXPORT_BATCH_SIZE_DEFAULT: usize = 512;
/// Default maximum allowed time to export a batch.
pub const EXPORT_TIMEOUT_DEFAULT: Duration = Duration::from_millis(30_000);
/// Default time `shutdown` and `force_flush` wait for the worker.
pub const SHUTDOWN_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);

const CONTROL_CHANNEL_SIZE: usize = 64;

/// Environment variables read by a [`BatchConfigBuilder`].
#[derive(Debug, Clone, Copy)]
struct EnvKeys {
    schedule_delay: &'static str,
    max_queue_size: &'static str,
    max_export_batch_size: &'static str,
    export_timeout: &'static str,
}

const SPAN_ENV: EnvKeys = EnvKeys {
    schedule_delay: OTEL_BSP_SCHEDULE_DELAY,
    max_queue_size: OTEL_BSP_MAX_QUEUE_SIZE,
    max_export_batch_size: OTEL_BSP_MAX_EXPORT_BATCH_SIZE,
    export_timeout: OTEL_BSP_EXPORT_TIMEOUT,
};

const LOG_ENV: EnvKeys = EnvKeys {
    schedule_delay: OTEL_BLRP_SCHEDULE_DELAY,
    max_queue_size: OTEL_BLRP_MAX_QUEUE_SIZE,
    max_export_batch_size: OTEL_BLRP_MAX_EXPORT_BATCH_SIZE,
    export_timeout: OTEL_BLRP_EXPORT_TIMEOUT,
};

/// Batch processor configuration.
/// Use [`BatchConfigBuilder`] to configure your own instance of [`BatchConfig`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// The maximum queue size to buffer records for delayed processing. If the
    /// queue gets full it drops the records.
    pub(crate) max_queue_size: usize,

    /// The delay interval between two consecutive processing of batches.
    pub(crate) scheduled_delay: Duration,

    /// The maximum number of records to process in a single batch. If there
    /// are more than one batch worth of records then it processes multiple
    /// batches one after the other without any delay.
    pub(crate) max_export_batch_size: usize,

    /// The maximum duration to export a batch of data.
    pub(crate) max_export_timeout: Duration,

    /// How long `shutdown` and `force_flush` wait for the worker thread.
    pub(crate) shutdown_timeout: Duration,
}

impl BatchConfig {
    /// Defaults for span batches, overridden by `OTEL_BSP_*` variables.
    pub fn spans() -> Self {
        BatchConfigBuilder::spans().build()
    }

    /// Defaults for log batches, overridden by `OTEL_BLRP_*` variables.
    pub fn logs() -> Self {
        BatchConfigBuilder::logs().build()
    }

    /// Maximum number of records waiting in the queue.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Delay between two timer-driven exports.
    pub fn scheduled_delay(&self) -> Duration {
        self.scheduled_delay
    }

    /// Maximum number of records per export call.
    pub fn max_export_batch_size(&self) -> usize {
        self.max_export_batch_size
    }

    /// Maximum duration of one export call.
    pub fn max_export_timeout(&self) -> Duration {
        self.max_export_timeout
    }

    /// Grace period of `shutdown` and `force_flush`.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

/// A builder for creating [`BatchConfig`] instances.
#[derive(Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
    max_export_timeout: Duration,
    shutdown_timeout: Duration,
}

impl BatchConfigBuilder {
    /// Create a builder with the span defaults. The values are overridden by
    /// environment variables if set:
    /// * `OTEL_BSP_MAX_QUEUE_SIZE`
    /// * `OTEL_BSP_SCHEDULE_DELAY`
    /// * `OTEL_BSP_MAX_EXPORT_BATCH_SIZE`
    /// * `OTEL_BSP_EXPORT_TIMEOUT`
    ///
    /// Note: Programmatic configuration overrides any value set via the environment variable.
    pub fn spans() -> Self {
        Self::with_defaults(OTEL_BSP_SCHEDULE_DELAY_DEFAULT).init_from_env_vars(SPAN_ENV)
    }

    /// Create a builder with the log defaults. The values are overridden by
    /// environment variables if set:
    /// * `OTEL_BLRP_MAX_QUEUE_SIZE`
    /// * `OTEL_BLRP_SCHEDULE_DELAY`
    /// * `OTEL_BLRP_MAX_EXPORT_BATCH_SIZE`
    /// * `OTEL_BLRP_EXPORT_TIMEOUT`
    ///
    /// Note: Programmatic configuration overrides any value set via the environment variable.
    pub fn logs() -> Self {
        Self::with_defaults(OTEL_BLRP_SCHEDULE_DELAY_DEFAULT).init_from_env_vars(LOG_ENV)
    }

    fn with_defaults(scheduled_delay: Duration) -> Self {
        BatchConfigBuilder {
            max_queue_size: MAX_QUEUE_SIZE_DEFAULT,
            scheduled_delay,
            max_export_batch_size: MAX_EXPORT_BATCH_SIZE_DEFAULT,
            max_export_timeout: EXPORT_TIMEOUT_DEFAULT,
            shutdown_timeout: SHUTDOWN_TIMEOUT_DEFAULT,
        }
    }

    /// Set max_queue_size for [`BatchConfigBuilder`].
    /// It's the maximum queue size to buffer records for delayed processing.
    /// If the queue gets full it will drop the records.
    /// The default value is 2048.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set scheduled_delay for [`BatchConfigBuilder`].
    /// It's the delay interval between two consecutive processing of batches.
    /// The default value is 5000 milliseconds for spans and 1000 milliseconds
    /// for logs.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Set max_export_timeout for [`BatchConfigBuilder`].
    /// It's the maximum duration to export a batch of data.
    /// The default value is 30000 milliseconds.
    pub fn with_max_export_timeout(mut self, max_export_timeout: Duration) -> Self {
        self.max_export_timeout = max_export_timeout;
        self
    }

    /// Set max_export_batch_size for [`BatchConfigBuilder`].
    /// It's the maximum number of records to process in a single batch.
    /// The default value is 512.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Set how long `shutdown` and `force_flush` wait for the worker thread
    /// before giving up with [`PipelineError::Timeout`].
    /// The default value is 5 seconds.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Builds a `BatchConfig` enforcing the following invariants:
    /// * `max_export_batch_size` must be less than or equal to `max_queue_size`.
    /// * both are at least 1.
    pub fn build(self) -> BatchConfig {
        let max_queue_size = self.max_queue_size.max(1);
        // max export batch size must be less or equal to max queue size.
        // we set max export batch size to max queue size if it's larger than max queue size.
        let max_export_batch_size = min(self.max_export_batch_size, max_queue_size).max(1);

        BatchConfig {
            max_queue_size,
            scheduled_delay: self.scheduled_delay,
            max_export_timeout: self.max_export_timeout,
            max_export_batch_size,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    fn init_from_env_vars(mut self, keys: EnvKeys) -> Self {
        if let Some(max_queue_size) = env::var(keys.max_queue_size)
            .ok()
            .and_then(|queue_size| usize::from_str(&queue_size).ok())
        {
            self.max_queue_size = max_queue_size;
        }

        if let Some(max_export_batch_size) = env::var(keys.max_export_batch_size)
            .ok()
            .and_then(|batch_size| usize::from_str(&batch_size).ok())
        {
            self.max_export_batch_size = max_export_batch_size;
        }

        if let Some(scheduled_delay) = env::var(keys.schedule_delay)
            .ok()
            .and_then(|delay| u64::from_str(&delay).ok())
        {
            self.scheduled_delay = Duration::from_millis(scheduled_delay);
        }

        if let Some(max_export_timeout) = env::var(keys.export_timeout)
            .ok()
            .and_then(|s| u64::from_str(&s).ok())
        {
            self.max_export_timeout = Duration::from_millis(max_export_timeout);
        }

        self
    }
}

/// Counters describing what a batch processor did with its records.
///
/// Once `shutdown` has returned `Ok`, every enqueued record is accounted for:
/// `enqueued == exported + dropped_export_failed`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records accepted into the queue.
    pub enqueued: usize,
    /// Records the exporter accepted.
    pub exported: usize,
    /// Records refused because the queue was full.
    pub dropped_queue_full: usize,
    /// Records lost with a failed batch.
    pub dropped_export_failed: usize,
    /// Batches whose export failed.
    pub failed_batches: usize,
    /// Calls made to the exporter.
    pub export_calls: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    enqueued: AtomicUsize,
    exported: AtomicUsize,
    dropped_queue_full: AtomicUsize,
    dropped_export_failed: AtomicUsize,
    failed_batches: AtomicUsize,
    export_calls: AtomicUsize,
}

impl StatsCounters {
    pub(crate) fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            exported: self.exported.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            dropped_export_failed: self.dropped_export_failed.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            export_calls: self.export_calls.load(Ordering::Relaxed),
        }
    }
}

/// What the worker thread needs from an exporter.
pub(crate) trait BatchExport: Send + 'static {
    type Item: Send + 'static;

    fn export(&self, batch: Vec<Self::Item>) -> impl Future<Output = ExportResult> + Send;

    fn shutdown(&mut self) -> ExportResult;
}

/// Messages sent between producers and the worker thread.
#[derive(Debug)]
enum BatchMessage {
    /// This is ONLY sent when the number of records in the data channel has reached `max_export_batch_size`.
    ExportBatch(Arc<AtomicBool>),
    /// ForceFlush flushes the current buffer to the exporter.
    ForceFlush(SyncSender<PipelineResult>),
    /// Shut down the worker thread, push all records in buffer to the exporter.
    Shutdown(SyncSender<PipelineResult>),
}

/// Producer side of a batch worker.
pub(crate) struct BatchWorker<T> {
    data_sender: SyncSender<T>,
    message_sender: SyncSender<BatchMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    shutdown_timeout: Duration,
    export_message_sent: Arc<AtomicBool>,
    current_batch_size: Arc<AtomicUsize>,
    max_export_batch_size: usize,
    max_queue_size: usize,
    is_shutdown: AtomicBool,
    stats: Arc<StatsCounters>,
    signal: &'static str,
}

impl<T: Send + 'static> BatchWorker<T> {
    /// Spawn the worker thread. `signal` names the record kind in
    /// diagnostics and in the thread name.
    pub(crate) fn spawn<E>(
        mut exporter: E,
        config: BatchConfig,
        signal: &'static str,
    ) -> Result<Self, ConfigError>
    where
        E: BatchExport<Item = T>,
    {
        let (data_sender, data_receiver) = mpsc::sync_channel::<T>(config.max_queue_size);
        let (message_sender, message_receiver) =
            mpsc::sync_channel::<BatchMessage>(CONTROL_CHANNEL_SIZE);
        let current_batch_size = Arc::new(AtomicUsize::new(0));
        let current_batch_size_for_thread = current_batch_size.clone();
        let stats = Arc::new(StatsCounters::default());
        let stats_for_thread = stats.clone();
        let max_queue_size = config.max_queue_size;
        let max_export_batch_size = config.max_export_batch_size;
        let shutdown_timeout = config.shutdown_timeout;

        let handle = thread::Builder::new()
            .name(format!("telemetry.{signal}.batch"))
            .spawn(move || {
                let _suppress_guard = suppression::enter_suppressed_scope();
                pipeline_debug!(
                    name: "BatchProcessor.ThreadStarted",
                    signal = signal,
                    interval_in_millisecs = config.scheduled_delay.as_millis(),
                    max_export_batch_size = config.max_export_batch_size,
                    max_queue_size = config.max_queue_size,
                );
                let mut worker = Worker {
                    receiver: data_receiver,
                    exporter: &exporter,
                    buffer: Vec::with_capacity(config.max_export_batch_size),
                    last_export_time: Instant::now(),
                    current_batch_size: current_batch_size_for_thread,
                    stats: stats_for_thread,
                    config: &config,
                    signal,
                };

                loop {
                    let remaining_time = config
                        .scheduled_delay
                        .checked_sub(worker.last_export_time.elapsed())
                        .unwrap_or(config.scheduled_delay);

                    match message_receiver.recv_timeout(remaining_time) {
                        Ok(BatchMessage::ExportBatch(export_message_sent)) => {
                            // Reset the flag now that the message has been processed.
                            export_message_sent.store(false, Ordering::Relaxed);
                            pipeline_debug!(name: "BatchProcessor.ExportingDueToBatchSize", signal = signal);
                            worker.get_and_export();
                        }
                        Ok(BatchMessage::ForceFlush(sender)) => {
                            pipeline_debug!(name: "BatchProcessor.ExportingDueToForceFlush", signal = signal);
                            worker.get_and_export();
                            let _ = sender.send(Ok(()));
                        }
                        Ok(BatchMessage::Shutdown(sender)) => {
                            pipeline_debug!(name: "BatchProcessor.ExportingDueToShutdown", signal = signal);
                            worker.get_and_export();
                            drop(worker);
                            if let Err(err) = exporter.shutdown() {
                                pipeline_warn!(
                                    name: "BatchProcessor.ExporterShutdownError",
                                    signal = signal,
                                    error = format!("{err}")
                                );
                            }
                            let _ = sender.send(Ok(()));

                            pipeline_debug!(
                                name: "BatchProcessor.ThreadExiting",
                                signal = signal,
                                reason = "ShutdownRequested"
                            );
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            pipeline_debug!(name: "BatchProcessor.ExportingDueToTimer", signal = signal);
                            worker.get_and_export();
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // The processor was dropped without shutdown;
                            // export what is left and exit.
                            pipeline_debug!(
                                name: "BatchProcessor.ThreadExiting",
                                signal = signal,
                                reason = "MessageSenderDisconnected"
                            );
                            worker.get_and_export();
                            break;
                        }
                    }
                }
                pipeline_debug!(name: "BatchProcessor.ThreadStopped", signal = signal);
            })
            .map_err(|err| ConfigError::ThreadSpawnFailed(err.to_string()))?;

        Ok(BatchWorker {
            data_sender,
            message_sender,
            handle: Mutex::new(Some(handle)),
            shutdown_timeout,
            export_message_sent: Arc::new(AtomicBool::new(false)),
            current_batch_size,
            max_export_batch_size,
            max_queue_size,
            is_shutdown: AtomicBool::new(false),
            stats,
            signal,
        })
    }

    /// Enqueue a record without blocking.
    pub(crate) fn enqueue(&self, record: T) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            pipeline_debug!(
                name: "BatchProcessor.Emit.AfterShutdown",
                signal = self.signal,
                message = "Record emitted after shutdown. It will not be exported."
            );
            return;
        }

        match self.data_sender.try_send(record) {
            Ok(_) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                if self.current_batch_size.fetch_add(1, Ordering::Relaxed) + 1
                    >= self.max_export_batch_size
                {
                    // The load is a cheap check; only swap when it says no
                    // export message is pending yet.
                    if !self.export_message_sent.load(Ordering::Relaxed)
                        && !self.export_message_sent.swap(true, Ordering::Relaxed)
                        && self
                            .message_sender
                            .try_send(BatchMessage::ExportBatch(
                                self.export_message_sent.clone(),
                            ))
                            .is_err()
                    {
                        self.export_message_sent.store(false, Ordering::Relaxed);
                    }
                }
            }
            Err(mpsc::TrySendError::Full(_)) => {
                // The first time we have to drop a record, emit a warning.
                if self.stats.dropped_queue_full.fetch_add(1, Ordering::Relaxed) == 0 {
                    pipeline_warn!(name: "BatchProcessor.RecordDroppingStarted",
                        signal = self.signal,
                        message = "Queue is full, dropping records. No further warning is emitted until shutdown, which reports the total count.");
                }
            }
            Err(mpsc::TrySendError::Disconnected(_)) => {
                pipeline_warn!(
                    name: "BatchProcessor.Emit.WorkerGone",
                    signal = self.signal,
                    message = "Worker thread is not running. The record will not be exported."
                );
            }
        }
    }

    pub(crate) fn force_flush(&self) -> PipelineResult {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(PipelineError::AlreadyShutdown);
        }
        let (sender, receiver) = mpsc::sync_channel(1);
        match self.message_sender.try_send(BatchMessage::ForceFlush(sender)) {
            Ok(_) => receiver
                .recv_timeout(self.shutdown_timeout)
                .map_err(|err| match err {
                    RecvTimeoutError::Timeout => PipelineError::Timeout(self.shutdown_timeout),
                    RecvTimeoutError::Disconnected => {
                        PipelineError::InternalFailure(format!("{err}"))
                    }
                })?,
            Err(mpsc::TrySendError::Full(_)) => {
                pipeline_debug!(
                    name: "BatchProcessor.ForceFlush.ControlChannelFull",
                    signal = self.signal
                );
                Err(PipelineError::InternalFailure(
                    "ForceFlush cannot be performed as the control channel is full".into(),
                ))
            }
            Err(mpsc::TrySendError::Disconnected(_)) => Err(PipelineError::AlreadyShutdown),
        }
    }

    /// Export everything enqueued so far, shut the exporter down and join
    /// the worker thread.
    pub(crate) fn shutdown(&self) -> PipelineResult {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            pipeline_debug!(
                name: "BatchProcessor.Shutdown.AlreadyShutdown",
                signal = self.signal,
                message = "Shutdown is being invoked more than once. This is noop, but indicates a potential issue in the application's lifecycle management."
            );
            return Err(PipelineError::AlreadyShutdown);
        }

        let dropped = self.stats.dropped_queue_full.load(Ordering::Relaxed);
        if dropped > 0 {
            pipeline_warn!(
                name: "BatchProcessor.RecordsDropped",
                signal = self.signal,
                dropped_count = dropped,
                max_queue_size = self.max_queue_size,
                message = "Records were dropped because the queue was full. Consider increasing the queue size and/or decreasing the scheduled delay."
            );
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        match self.message_sender.try_send(BatchMessage::Shutdown(sender)) {
            Ok(_) => match receiver.recv_timeout(self.shutdown_timeout) {
                Ok(result) => {
                    // join the background thread after receiving back the
                    // shutdown signal
                    if let Some(handle) = self.handle.lock()?.take() {
                        handle.join().map_err(|_| {
                            PipelineError::InternalFailure("batch worker panicked".into())
                        })?;
                    }
                    result
                }
                Err(RecvTimeoutError::Timeout) => {
                    pipeline_error!(
                        name: "BatchProcessor.Shutdown.Timeout",
                        signal = self.signal,
                        timeout_in_millisecs = self.shutdown_timeout.as_millis(),
                        message = "Shutdown timed out. Records still queued are abandoned."
                    );
                    Err(PipelineError::Timeout(self.shutdown_timeout))
                }
                Err(err @ RecvTimeoutError::Disconnected) => {
                    pipeline_error!(
                        name: "BatchProcessor.Shutdown.Error",
                        signal = self.signal,
                        error = format!("{err}")
                    );
                    Err(PipelineError::InternalFailure(format!("{err}")))
                }
            },
            Err(mpsc::TrySendError::Full(_)) => Err(PipelineError::InternalFailure(
                "Shutdown cannot be performed as the control channel is full".into(),
            )),
            Err(mpsc::TrySendError::Disconnected(_)) => Err(PipelineError::AlreadyShutdown),
        }
    }

    pub(crate) fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Counters that stay readable after the worker is moved elsewhere.
    pub(crate) fn stats_counters(&self) -> Arc<StatsCounters> {
        Arc::clone(&self.stats)
    }
}

/// Consumer side, owned by the worker thread.
struct Worker<'a, E: BatchExport> {
    receiver: Receiver<E::Item>,
    exporter: &'a E,
    buffer: Vec<E::Item>,
    last_export_time: Instant,
    current_batch_size: Arc<AtomicUsize>,
    stats: Arc<StatsCounters>,
    config: &'a BatchConfig,
    signal: &'static str,
}

impl<E: BatchExport> Worker<'_, E> {
    /// Export batches of up to `max_export_batch_size` until everything that
    /// was counted as enqueued when the call started is exported.
    fn get_and_export(&mut self) {
        // `target` is used to determine the stopping criteria for exporting.
        let target = self.current_batch_size.load(Ordering::Relaxed);
        let mut total_exported = 0;

        while target > 0 && total_exported < target {
            while let Ok(record) = self.receiver.try_recv() {
                self.buffer.push(record);
                if self.buffer.len() == self.config.max_export_batch_size {
                    break;
                }
            }

            let count = self.buffer.len();
            if count == 0 {
                break;
            }
            total_exported += count;
            self.export_batch_sync();
            self.current_batch_size.fetch_sub(count, Ordering::Relaxed);
        }
    }

    /// Hand the buffer to the exporter and wait for the outcome, bounded by
    /// `max_export_timeout`.
    fn export_batch_sync(&mut self) {
        self.last_export_time = Instant::now();
        if self.buffer.is_empty() {
            return;
        }

        let batch = std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.config.max_export_batch_size),
        );
        let count = batch.len();
        self.stats.export_calls.fetch_add(1, Ordering::Relaxed);

        let timeout = self.config.max_export_timeout;
        let export = std::pin::pin!(self.exporter.export(batch));
        let result = match futures_executor::block_on(select(
            export,
            futures_timer::Delay::new(timeout),
        )) {
            Either::Left((result, _)) => result,
            Either::Right(_) => Err(ExportError::Timeout(timeout)),
        };

        match result {
            Ok(()) => {
                self.stats.exported.fetch_add(count, Ordering::Relaxed);
            }
            Err(err) => {
                self.stats.failed_batches.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .dropped_export_failed
                    .fetch_add(count, Ordering::Relaxed);
                pipeline_error!(
                    name: "BatchProcessor.ExportError",
                    signal = self.signal,
                    batch_size = count,
                    error = format!("{err}")
                );
            }
        }
    }
}
