//! Process-wide structured logging sink with atomic reconfiguration.
//!
//! A [`LogSink`] owns one `tracing` dispatcher whose only layer sits behind a
//! `reload` handle. Every successful [`LogSink::configure`] call builds a new
//! generation (level filter, formatter, output files, stacktrace hook) off to
//! the side, swaps it in, and only then closes the files of the generation it
//! replaced.

mod level;
mod output;
mod severity;
mod stacktrace;

pub use level::{LogFormat, LogLevel, StacktracePolicy};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::Dispatch;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, reload, Layer, Registry,
};

use output::{Outputs, SharedOutputs};
use severity::SeverityFloor;
use stacktrace::StacktraceLayer;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// `settings.log` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
    /// Comma-separated list of `stdout`, `stderr` or file paths.
    pub output: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "console".to_string(),
            output: "stdout".to_string(),
        }
    }
}

/// Construction-time options of the sink owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerOptions {
    /// Annotate records with source file and line.
    pub add_caller: bool,
    pub stacktrace: StacktracePolicy,
}

#[derive(Debug, Error)]
pub enum LogConfigError {
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("invalid log format '{0}' (expected 'json' or 'console')")]
    InvalidFormat(String),

    #[error("failed to open log output '{target}': {source}")]
    OutputOpenFailure {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install log sink: {0}")]
    Install(String),
}

/// Returned by [`LogSink::fatal`]; the caller propagates it to the process
/// boundary, which decides how to exit.
#[derive(Debug, Clone, Error)]
#[error("fatal: {message}")]
pub struct Fatal {
    pub message: String,
}

#[derive(Default)]
struct Generation {
    outputs: Option<Arc<Outputs>>,
    config: Option<LogConfig>,
    level: Option<LogLevel>,
}

struct Inner {
    dispatch: Dispatch,
    handle: reload::Handle<BoxedLayer, Registry>,
    /// Current generation; the lock also serializes `configure` calls.
    current: Mutex<Generation>,
    configured: AtomicBool,
    open_files: Arc<AtomicUsize>,
}

/// Cloneable handle to the logging sink.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("configured", &self.is_configured())
            .field("open_files", &self.open_file_count())
            .finish_non_exhaustive()
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink {
    /// Unconfigured sink; it drops everything until the first `configure`.
    pub fn new() -> Self {
        let (layer, handle) = reload::Layer::new(LevelFilter::OFF.boxed());
        let dispatch = Dispatch::new(Registry::default().with(layer));
        Self {
            inner: Arc::new(Inner {
                dispatch,
                handle,
                current: Mutex::new(Generation::default()),
                configured: AtomicBool::new(false),
                open_files: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Replace the current generation.
    ///
    /// Either the whole new configuration takes effect or none of it does:
    /// on error the previous generation stays installed and its files open.
    pub fn configure(&self, cfg: &LogConfig, opts: &LoggerOptions) -> Result<(), LogConfigError> {
        let mut current = self.inner.current.lock();

        let level: LogLevel = cfg.level.parse()?;
        let format: LogFormat = cfg.format.parse()?;
        let outputs = Arc::new(Outputs::open(&cfg.output, &self.inner.open_files)?);

        let layer = build_layer(level, format, &outputs, opts);
        let previous = self
            .swap_layer(layer)
            .map_err(|e| LogConfigError::Install(e.to_string()))?;
        // no event can reach the retired layer past this point
        drop(previous);

        if let Some(old) = current.outputs.replace(outputs) {
            let _ = old.flush();
            old.close();
        }
        current.config = Some(cfg.clone());
        current.level = Some(level);
        self.inner.configured.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Install `layer` and hand back the one it replaced.
    ///
    /// The swap runs with this sink as the thread's dispatcher: the reload
    /// handle rebuilds callsite interest from the current default, and a
    /// callsite cached as disabled would otherwise stay disabled.
    fn swap_layer(&self, layer: BoxedLayer) -> Result<Option<BoxedLayer>, reload::Error> {
        let mut previous = None;
        self.in_scope(|| {
            self.inner
                .handle
                .modify(|installed| previous = Some(std::mem::replace(installed, layer)))
        })?;
        Ok(previous)
    }

    pub fn is_configured(&self) -> bool {
        self.inner.configured.load(Ordering::SeqCst)
    }

    /// Configuration of the installed generation.
    pub fn current_config(&self) -> Option<LogConfig> {
        self.inner.current.lock().config.clone()
    }

    /// Number of log files currently held open by the sink.
    pub fn open_file_count(&self) -> usize {
        self.inner.open_files.load(Ordering::SeqCst)
    }

    /// Make this sink the process-wide `tracing` dispatcher and route `log`
    /// records (sqlx and other `log` users) into it.
    pub fn install_global(&self) -> Result<(), LogConfigError> {
        tracing::dispatcher::set_global_default(self.inner.dispatch.clone())
            .map_err(|e| LogConfigError::Install(e.to_string()))?;
        // Bridge `log` → `tracing`; a logger may already be set by the host.
        let _ = tracing_log::LogTracer::init();
        Ok(())
    }

    /// Run `f` with this sink as the thread's default dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.inner.dispatch, f)
    }

    /// Whether a record at `level` would be emitted right now.
    pub fn enabled(&self, level: LogLevel) -> bool {
        if self.inner.current.lock().level.is_some_and(|min| level < min) {
            return false;
        }
        self.in_scope(|| match level.tracing_level() {
            tracing::Level::TRACE => tracing::enabled!(tracing::Level::TRACE),
            tracing::Level::DEBUG => tracing::enabled!(tracing::Level::DEBUG),
            tracing::Level::INFO => tracing::enabled!(tracing::Level::INFO),
            tracing::Level::WARN => tracing::enabled!(tracing::Level::WARN),
            tracing::Level::ERROR => tracing::enabled!(tracing::Level::ERROR),
        })
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message);
    }

    /// Emit a fatal record, flush, and hand back the error to propagate.
    #[must_use = "the Fatal error must be propagated to the process boundary"]
    pub fn fatal(&self, message: &str) -> Fatal {
        self.log(LogLevel::Fatal, message);
        self.flush();
        Fatal {
            message: message.to_string(),
        }
    }

    /// Emit a record through the current generation.
    ///
    /// # Panics
    ///
    /// Panics with "logger not initialized" when the sink was never configured.
    pub fn log(&self, level: LogLevel, message: &str) {
        assert!(self.is_configured(), "logger not initialized");
        self.in_scope(|| match level {
            LogLevel::Trace => tracing::trace!("{message}"),
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
            LogLevel::Critical => tracing::error!(severity = "critical", "{message}"),
            LogLevel::Fatal => tracing::error!(severity = "fatal", "{message}"),
        });
    }

    pub fn flush(&self) {
        if let Some(outputs) = &self.inner.current.lock().outputs {
            let _ = outputs.flush();
        }
    }

    /// Stop emitting and close the current generation's files.
    pub fn shutdown(&self) {
        let mut current = self.inner.current.lock();
        match self.swap_layer(LevelFilter::OFF.boxed()) {
            Ok(previous) => drop(previous),
            Err(_) => tracing::warn!("log sink already torn down"),
        }
        current.level = None;
        if let Some(old) = current.outputs.take() {
            let _ = old.flush();
            old.close();
        }
    }
}

fn build_layer(
    level: LogLevel,
    format: LogFormat,
    outputs: &Arc<Outputs>,
    opts: &LoggerOptions,
) -> BoxedLayer {
    let writer = SharedOutputs(outputs.clone());

    let fmt_layer: BoxedLayer = match format {
        LogFormat::Console => fmt::layer()
            .with_ansi(outputs.ansi())
            .with_target(true)
            .with_level(true)
            .with_file(opts.add_caller)
            .with_line_number(opts.add_caller)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            // span data is not carried across generations
            .with_current_span(false)
            .with_span_list(false)
            .with_ansi(false)
            .with_target(true)
            .with_level(true)
            .with_file(opts.add_caller)
            .with_line_number(opts.add_caller)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(writer)
            .boxed(),
    };

    level
        .filter()
        .and_then(SeverityFloor::new(level))
        .and_then(fmt_layer)
        .and_then(StacktraceLayer::new(opts.stacktrace, format, outputs.clone()))
        .boxed()
}
