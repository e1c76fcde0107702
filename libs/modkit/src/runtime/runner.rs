//! Boot driver.
//!
//! ```text
//! register (all) → parse argv → flag overrides → must_check (all) → initialize (all)
//! ```
//!
//! One `ModuleCtx` is built after parsing and reused for every module; the
//! same context later drives re-initialization from the config watcher.
//! Shutdown is explicit: the host calls [`Booted::shutdown`] once its
//! command has finished or a signal arrived.

use clap::parser::ValueSource;
use clap::{ArgMatches, Command};
use runtime::{ConfigError, ConfigStore, LogSink};
use std::ffi::OsString;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::client_hub::ClientHub;
use crate::context::{ModuleCtx, ModuleCtxBuilder};
use crate::contracts::{CheckCtx, FlagBinding, Registrar};
use crate::registry::{ModuleRegistry, RegistryError};

/// Inputs of a boot run.
pub struct BootOptions {
    /// Root command; modules append their flags to it.
    pub command: Command,
    /// Environment prefix for config overrides (`<PREFIX>__SETTINGS__LOG__LEVEL`).
    pub env_prefix: String,
    /// Arguments to parse, program name first; `None` reads the process args.
    pub args: Option<Vec<OsString>>,
    pub cancel: CancellationToken,
    pub logger: LogSink,
}

impl BootOptions {
    pub fn new(command: Command, env_prefix: impl Into<String>) -> Self {
        Self {
            command,
            env_prefix: env_prefix.into(),
            args: None,
            cancel: CancellationToken::new(),
            logger: LogSink::new(),
        }
    }

    pub fn with_args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_logger(mut self, logger: LogSink) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Error)]
pub enum BootError {
    /// Usage error, or `--help` / `--version` display; call `exit()` on it.
    #[error(transparent)]
    Cli(#[from] clap::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to compose configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A fully initialized application.
pub struct Booted {
    ctx: ModuleCtx,
    registry: ModuleRegistry,
}

impl std::fmt::Debug for Booted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Booted")
            .field("command", &self.ctx.command())
            .field("registry", &self.registry)
            .finish()
    }
}

impl Booted {
    pub fn ctx(&self) -> &ModuleCtx {
        &self.ctx
    }

    /// Name of the invoked (sub)command.
    pub fn command(&self) -> &str {
        self.ctx.command()
    }

    pub fn matches(&self) -> &ArgMatches {
        self.ctx.matches()
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        self.ctx.config()
    }

    pub fn logger(&self) -> &LogSink {
        self.ctx.logger()
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Cancel background work, stop modules in reverse order, then close
    /// the logger's outputs.
    pub async fn shutdown(self) {
        tracing::info!("Phase: stop");
        let cancel = self.ctx.cancellation_token().clone();
        cancel.cancel();
        self.registry.run_stop_phase(cancel).await;
        self.ctx.logger().shutdown();
    }
}

/// Run the three boot phases over `registry`.
pub async fn boot(registry: ModuleRegistry, opts: BootOptions) -> Result<Booted, BootError> {
    let BootOptions {
        command,
        env_prefix,
        args,
        cancel,
        logger,
    } = opts;

    let store = Arc::new(ConfigStore::new(env_prefix));

    tracing::info!("Phase: register");
    let mut registrar = Registrar::new(command, store.clone());
    registry.run_register_phase(&mut registrar);
    let (mut command, bindings) = registrar.into_parts();

    let matches = match args {
        Some(args) => command.try_get_matches_from_mut(args)?,
        None => command.try_get_matches_from_mut(std::env::args_os())?,
    };

    apply_flag_overrides(&store, &matches, &bindings);
    store.rebuild()?;

    let invoked = invoked_command(&command, &matches).to_string();
    tracing::debug!(command = %invoked, "command line parsed");

    tracing::info!("Phase: check");
    registry.run_check_phase(&CheckCtx {
        command: &invoked,
        config: &store,
        matches: &matches,
    })?;

    let ctx = ModuleCtxBuilder::new(store, logger, cancel)
        .with_command(invoked)
        .with_matches(Arc::new(matches))
        .with_client_hub(Arc::new(ClientHub::new()))
        .build();

    tracing::info!("Phase: init");
    registry.run_init_phase(&ctx).await?;

    Ok(Booted { ctx, registry })
}

/// Name of the deepest subcommand in `matches`; the root name when none was given.
pub fn invoked_command<'a>(root: &'a Command, matches: &'a ArgMatches) -> &'a str {
    let mut name = root.get_name();
    let mut current = matches;
    while let Some((sub, sub_matches)) = current.subcommand() {
        name = sub;
        current = sub_matches;
    }
    name
}

fn apply_flag_overrides(store: &ConfigStore, matches: &ArgMatches, bindings: &[FlagBinding]) {
    for binding in bindings {
        if let Some(raw) = explicit_value(matches, &binding.arg_id) {
            tracing::debug!(flag = %binding.arg_id, key = %binding.key, "flag overrides config key");
            store.set_override(&binding.key, raw);
        }
    }
}

/// Raw value of a flag given on the command line at any subcommand level;
/// defaults and env-provided values do not count.
fn explicit_value(matches: &ArgMatches, id: &str) -> Option<String> {
    let mut found = None;
    let mut current = Some(matches);
    while let Some(m) = current {
        let known = m.ids().any(|i| i.as_str() == id);
        if known && m.value_source(id) == Some(ValueSource::CommandLine) {
            found = m
                .get_raw(id)
                .and_then(|vals| vals.last())
                .map(|v| v.to_string_lossy().into_owned());
        }
        current = m.subcommand().map(|(_, sub)| sub);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{Arg, ArgAction};

    fn cli() -> Command {
        Command::new("app")
            .arg(
                Arg::new("level")
                    .long("level")
                    .global(true)
                    .default_value("info"),
            )
            .arg(
                Arg::new("verbose")
                    .long("verbose")
                    .global(true)
                    .action(ArgAction::SetTrue),
            )
            .subcommand(Command::new("serve").subcommand(Command::new("now")))
    }

    #[test]
    fn invoked_command_is_deepest_subcommand() {
        let mut cmd = cli();
        let m = cmd.try_get_matches_from_mut(["app", "serve", "now"]).unwrap();
        assert_eq!(invoked_command(&cmd, &m), "now");

        let mut cmd = cli();
        let m = cmd.try_get_matches_from_mut(["app"]).unwrap();
        assert_eq!(invoked_command(&cmd, &m), "app");
    }

    #[test]
    fn only_explicit_flags_count() {
        let m = cli().try_get_matches_from(["app", "serve"]).unwrap();
        assert_eq!(explicit_value(&m, "level"), None);

        let m = cli()
            .try_get_matches_from(["app", "serve", "--level", "debug"])
            .unwrap();
        assert_eq!(explicit_value(&m, "level").as_deref(), Some("debug"));

        let m = cli().try_get_matches_from(["app", "--verbose"]).unwrap();
        assert_eq!(explicit_value(&m, "verbose").as_deref(), Some("true"));
    }

    #[test]
    fn unknown_binding_is_ignored() {
        let m = cli().try_get_matches_from(["app"]).unwrap();
        assert_eq!(explicit_value(&m, "no-such-flag"), None);
    }
}
