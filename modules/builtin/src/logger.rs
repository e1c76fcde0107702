use async_trait::async_trait;
use modkit::{Module, ModuleCtx, Registrar};
use runtime::{LogConfig, LoggerOptions, StacktracePolicy};

/// Configures the log sink from `settings.log`; re-run on config reload.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerModule {
    pub options: LoggerOptions,
}

impl LoggerModule {
    pub fn new(add_caller: bool) -> Self {
        Self {
            options: LoggerOptions {
                add_caller,
                stacktrace: StacktracePolicy::Disabled,
            },
        }
    }

    pub fn with_stacktrace(mut self, policy: StacktracePolicy) -> Self {
        self.options.stacktrace = policy;
        self
    }
}

#[async_trait]
impl Module for LoggerModule {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn deps(&self) -> &'static [&'static str] {
        &["config"]
    }

    fn register(&self, reg: &mut Registrar) {
        let defaults = LogConfig::default();
        reg.set_default("settings.log.level", defaults.level)
            .set_default("settings.log.format", defaults.format)
            .set_default("settings.log.output", defaults.output);
    }

    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: LogConfig = ctx.section_required("settings.log")?;
        ctx.logger().configure(&cfg, &self.options)?;
        tracing::debug!(
            level = %cfg.level,
            format = %cfg.format,
            output = %cfg.output,
            "logger configured"
        );
        Ok(())
    }
}
