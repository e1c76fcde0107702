use std::fmt;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing::Level;

use super::LogConfigError;

/// Severity accepted in `settings.log.level`.
///
/// `dpanic` and `panic` are accepted as aliases of `critical`. Everything
/// above `error` shares tracing's ERROR level; the finer severity is carried
/// in the record's `severity` field, and a `critical` or `fatal` threshold
/// drops ERROR records whose severity is lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
    Fatal,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
            LogLevel::Fatal => "fatal",
        }
    }

    pub fn tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error | LogLevel::Critical | LogLevel::Fatal => Level::ERROR,
        }
    }

    /// Tracing level filter for this threshold; see [`LogLevel`] for the
    /// severities above `error`.
    pub fn filter(self) -> LevelFilter {
        LevelFilter::from_level(self.tracing_level())
    }

    /// Severity of a tracing level; ERROR maps to [`LogLevel::Error`].
    pub fn from_tracing(level: &Level) -> Self {
        match *level {
            Level::TRACE => LogLevel::Trace,
            Level::DEBUG => LogLevel::Debug,
            Level::INFO => LogLevel::Info,
            Level::WARN => LogLevel::Warn,
            Level::ERROR => LogLevel::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LogConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "dpanic" | "panic" | "critical" => Ok(LogLevel::Critical),
            "fatal" => Ok(LogLevel::Fatal),
            _ => Err(LogConfigError::InvalidLevel(s.to_string())),
        }
    }
}

/// Record encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable text.
    Console,
}

impl FromStr for LogFormat {
    type Err = LogConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "console" => Ok(LogFormat::Console),
            _ => Err(LogConfigError::InvalidFormat(s.to_string())),
        }
    }
}

/// When to append a captured backtrace to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StacktracePolicy {
    #[default]
    Disabled,
    /// Records at or above this severity.
    AtLevel(LogLevel),
}

impl StacktracePolicy {
    pub fn applies_to(self, severity: LogLevel) -> bool {
        match self {
            StacktracePolicy::Disabled => false,
            StacktracePolicy::AtLevel(min) => severity >= min,
        }
    }
}
