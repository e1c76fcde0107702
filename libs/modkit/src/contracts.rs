use async_trait::async_trait;
use clap::{Arg, ArgMatches, Command};
use runtime::ConfigStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::context::ModuleCtx;

/// A capability unit driven through the three boot phases:
/// `register` → `must_check` → `initialize`.
///
/// Modules are plain trait objects kept in an explicit, ordered list. The
/// same `Arc` may also be handed to the config watcher, which re-runs
/// `initialize` whenever the configuration file changes, so `initialize` must
/// be safe to call more than once.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Stable, unique name used in errors, logs and dependency declarations.
    fn name(&self) -> &'static str;

    /// Modules that must appear earlier in the registry.
    fn deps(&self) -> &'static [&'static str] {
        &[]
    }

    /// Declare flags and config defaults. Runs before the command line is parsed.
    fn register(&self, _reg: &mut Registrar) {}

    /// Verify preconditions once flags are parsed and overrides applied.
    fn must_check(&self, _ctx: &CheckCtx<'_>) -> Result<(), PreconditionViolation> {
        Ok(())
    }

    /// Bring the module up. Called again on config reload for watched modules.
    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;

    /// Release resources at shutdown; runs in reverse registry order.
    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Unmet precondition reported by [`Module::must_check`]. Boot cannot
/// proceed; the binary turns it into a non-zero exit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("module '{module}': {reason}")]
pub struct PreconditionViolation {
    pub module: &'static str,
    pub reason: String,
}

impl PreconditionViolation {
    pub fn new(module: &'static str, reason: impl Into<String>) -> Self {
        Self {
            module,
            reason: reason.into(),
        }
    }
}

/// Command-line flag whose explicit value overrides a config key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagBinding {
    pub arg_id: String,
    pub key: String,
}

/// What a module may touch while registering: the root command being
/// assembled and the config defaults.
pub struct Registrar {
    command: Command,
    bindings: Vec<FlagBinding>,
    config: Arc<ConfigStore>,
}

impl Registrar {
    pub fn new(command: Command, config: Arc<ConfigStore>) -> Self {
        Self {
            command,
            bindings: Vec::new(),
            config,
        }
    }

    /// Add a flag to the root command; it is accepted by every subcommand too.
    pub fn arg(&mut self, arg: Arg) -> &mut Self {
        self.map_command(|cmd| cmd.arg(arg.global(true)))
    }

    /// Add a flag whose explicitly given value overrides `key`.
    pub fn bound_arg(&mut self, arg: Arg, key: impl Into<String>) -> &mut Self {
        let arg_id = arg.get_id().as_str().to_string();
        self.bind(arg_id, key);
        self.arg(arg)
    }

    /// Bind an already declared flag to a config key.
    pub fn bind(&mut self, arg_id: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.bindings.push(FlagBinding {
            arg_id: arg_id.into(),
            key: key.into(),
        });
        self
    }

    /// Apply an arbitrary change to the root command (version, help setup).
    pub fn map_command(&mut self, f: impl FnOnce(Command) -> Command) -> &mut Self {
        let cmd = std::mem::take(&mut self.command);
        self.command = f(cmd);
        self
    }

    pub fn set_default(&mut self, key: &str, value: impl Into<serde_json::Value>) -> &mut Self {
        self.config.set_default(key, value);
        self
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn bindings(&self) -> &[FlagBinding] {
        &self.bindings
    }

    pub fn into_parts(self) -> (Command, Vec<FlagBinding>) {
        (self.command, self.bindings)
    }
}

/// Read-only view handed to [`Module::must_check`].
#[derive(Clone, Copy)]
pub struct CheckCtx<'a> {
    /// Name of the invoked (sub)command.
    pub command: &'a str,
    pub config: &'a ConfigStore,
    pub matches: &'a ArgMatches,
}
