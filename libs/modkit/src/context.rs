use clap::ArgMatches;
use runtime::{ConfigStore, ConfigTree, LogSink};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::client_hub::ClientHub;

/// Per-boot context handed to `initialize` (and to the watcher on reload).
#[derive(Clone)]
pub struct ModuleCtx {
    pub(crate) command: Arc<str>,
    pub(crate) config: Arc<ConfigStore>,
    pub(crate) logger: LogSink,
    pub(crate) client_hub: Arc<ClientHub>,
    pub(crate) matches: Arc<ArgMatches>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) module_name: Option<Arc<str>>,
}

impl std::fmt::Debug for ModuleCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCtx")
            .field("command", &self.command)
            .field("module", &self.module_name)
            .finish_non_exhaustive()
    }
}

// ---- construction/scoping ----
pub struct ModuleCtxBuilder {
    inner: ModuleCtx,
}

impl ModuleCtxBuilder {
    pub fn new(config: Arc<ConfigStore>, logger: LogSink, token: CancellationToken) -> Self {
        Self {
            inner: ModuleCtx {
                command: Arc::from(""),
                config,
                logger,
                client_hub: Arc::new(ClientHub::default()),
                matches: Arc::new(ArgMatches::default()),
                cancellation_token: token,
                module_name: None,
            },
        }
    }

    pub fn with_command(mut self, command: impl Into<Arc<str>>) -> Self {
        self.inner.command = command.into();
        self
    }

    pub fn with_matches(mut self, matches: Arc<ArgMatches>) -> Self {
        self.inner.matches = matches;
        self
    }

    pub fn with_client_hub(mut self, hub: Arc<ClientHub>) -> Self {
        self.inner.client_hub = hub;
        self
    }

    pub fn build(self) -> ModuleCtx {
        self.inner
    }
}

impl ModuleCtx {
    /// Scope context to a specific module name (used by the registry).
    pub(crate) fn for_module(mut self, name: &str) -> Self {
        self.module_name = Some(Arc::<str>::from(name));
        self
    }

    // ---- public read-only API for modules ----

    /// Name of the invoked (sub)command; the root command name when none was given.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn logger(&self) -> &LogSink {
        &self.logger
    }

    pub fn client_hub(&self) -> Arc<ClientHub> {
        self.client_hub.clone()
    }

    /// Parsed command line.
    pub fn matches(&self) -> &ArgMatches {
        &self.matches
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn current_module(&self) -> Option<&str> {
        self.module_name.as_deref()
    }

    /// Section of the current config snapshot.
    pub fn section(&self, path: &str) -> Option<ConfigTree> {
        self.config.subtree(path)
    }

    /// Strict: deserialize a config section into `T`, failing with a pathful
    /// error if the section is absent or malformed.
    pub fn section_required<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let tree = self.config.current().require_subtree(path)?;
        Ok(tree.extract()?)
    }

    /// Best-effort: deserialize a config section into `T`, falling back to
    /// `T::default()` if the section is missing or invalid.
    pub fn section_or_default<T: DeserializeOwned + Default>(&self, path: &str) -> T {
        self.section(path)
            .and_then(|t| t.extract::<T>().ok())
            .unwrap_or_default()
    }
}
