use std::backtrace::Backtrace;
use std::sync::Arc;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::level::{LogFormat, StacktracePolicy};
use super::output::Outputs;
use super::severity::severity_of;

/// Appends a captured backtrace after records at or above the policy level.
pub(crate) struct StacktraceLayer {
    policy: StacktracePolicy,
    format: LogFormat,
    outputs: Arc<Outputs>,
}

impl StacktraceLayer {
    pub(crate) fn new(policy: StacktracePolicy, format: LogFormat, outputs: Arc<Outputs>) -> Self {
        Self {
            policy,
            format,
            outputs,
        }
    }

    fn render(&self, trace: &Backtrace) -> String {
        let text = trace.to_string();
        match self.format {
            LogFormat::Json => {
                let mut line = serde_json::json!({ "stacktrace": text }).to_string();
                line.push('\n');
                line
            }
            LogFormat::Console => {
                let mut out = String::from("stacktrace:\n");
                for l in text.lines() {
                    out.push_str("    ");
                    out.push_str(l);
                    out.push('\n');
                }
                out
            }
        }
    }
}

impl<S: Subscriber> Layer<S> for StacktraceLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.policy.applies_to(severity_of(event)) {
            return;
        }
        let trace = Backtrace::force_capture();
        let _ = self.outputs.write_all(self.render(&trace).as_bytes());
    }
}
