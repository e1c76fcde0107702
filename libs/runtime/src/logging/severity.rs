use std::fmt::Debug;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::level::LogLevel;

/// Severity of a record: its tracing level, refined by a `severity` field on
/// ERROR records emitted as critical or fatal.
pub(crate) fn severity_of(event: &Event<'_>) -> LogLevel {
    let base = LogLevel::from_tracing(event.metadata().level());
    if base != LogLevel::Error {
        return base;
    }
    let mut visitor = SeverityVisitor(None);
    event.record(&mut visitor);
    visitor.0.unwrap_or(base)
}

struct SeverityVisitor(Option<LogLevel>);

impl Visit for SeverityVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "severity" {
            self.0 = value.parse().ok();
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn Debug) {}
}

/// Drops ERROR records below a `critical` or `fatal` threshold.
///
/// The level filter in front of it already rejects everything under ERROR;
/// this layer only has to look at the `severity` field.
pub(crate) struct SeverityFloor {
    min: LogLevel,
}

impl SeverityFloor {
    pub(crate) fn new(min: LogLevel) -> Self {
        Self { min }
    }
}

impl<S: Subscriber> Layer<S> for SeverityFloor {
    fn event_enabled(&self, event: &Event<'_>, _ctx: Context<'_, S>) -> bool {
        self.min <= LogLevel::Error || severity_of(event) >= self.min
    }
}
