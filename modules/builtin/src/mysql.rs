use anyhow::Context;
use async_trait::async_trait;
use clap::Arg;
use modkit::{Module, ModuleCtx, Registrar};
use modkit_db::{DbHandle, MySqlSettings};
use parking_lot::Mutex;
use runtime::ConfigTree;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SECTION: &str = "settings.mysql";

/// (flag, short, key under `settings.mysql`, help)
const FLAGS: &[(&str, Option<char>, &str, &str)] = &[
    ("host", None, "host", "mysql host"),
    ("port", Some('P'), "port", "mysql port"),
    ("user", Some('u'), "user", "mysql user"),
    ("password", Some('p'), "password", "mysql password"),
    ("database", Some('d'), "database", "mysql database"),
    ("charset", None, "charset", "mysql charset"),
    ("collation", None, "collation", "mysql collation"),
    ("connect_timeout", None, "connect_timeout", "mysql connect timeout"),
    ("read_timeout", None, "read_timeout", "mysql read timeout"),
    ("write_timeout", None, "write_timeout", "mysql write timeout"),
    ("max_allowed_packet", None, "max_allowed_packet", "mysql max allowed packet"),
];

/// What to do when `settings.mysql.password` is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PasswordPrompt {
    /// Ask on the terminal, but only when stdin is one.
    #[default]
    Terminal,
    /// Never ask; the empty password fails validation.
    Disabled,
}

/// Connects to MySQL for the commands that need it and publishes the
/// handle as `Arc<DbHandle>` in the client hub.
#[derive(Debug, Default)]
pub struct DatabaseConnector {
    /// Declare `--host`, `--port`, ... bound to `settings.mysql.*`.
    pub add_flags: bool,
    /// Commands that connect; matched literally against the invoked name.
    pub allowed_commands: Vec<String>,
    pub prompt: PasswordPrompt,
    handle: Mutex<Option<Arc<DbHandle>>>,
}

impl DatabaseConnector {
    pub fn new(add_flags: bool, allowed_commands: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            add_flags,
            allowed_commands: allowed_commands.into_iter().map(Into::into).collect(),
            prompt: PasswordPrompt::Terminal,
            handle: Mutex::new(None),
        }
    }

    pub fn with_prompt(mut self, prompt: PasswordPrompt) -> Self {
        self.prompt = prompt;
        self
    }

    fn interactive(&self) -> bool {
        self.prompt == PasswordPrompt::Terminal && atty::is(atty::Stream::Stdin)
    }

    fn allows(&self, command: &str) -> bool {
        self.allowed_commands.iter().any(|c| c == command)
    }

    pub fn handle(&self) -> Option<Arc<DbHandle>> {
        self.handle.lock().clone()
    }
}

/// Defaults in config-file form (durations as humantime strings).
fn default_values() -> Vec<(&'static str, serde_json::Value)> {
    let d = MySqlSettings::default();
    let secs = |t: Duration| format!("{}s", t.as_secs());
    vec![
        ("host", d.host.into()),
        ("port", d.port.into()),
        ("user", d.user.into()),
        ("password", d.password.into()),
        ("database", d.database.into()),
        ("charset", d.charset.into()),
        ("collation", d.collation.into()),
        ("connect_timeout", secs(d.connect_timeout).into()),
        ("read_timeout", secs(d.read_timeout).into()),
        ("write_timeout", secs(d.write_timeout).into()),
        ("max_allowed_packet", d.max_allowed_packet.into()),
    ]
}

/// Read `settings.mysql`; missing keys keep their defaults.
pub fn settings_from(tree: &ConfigTree) -> anyhow::Result<MySqlSettings> {
    let d = MySqlSettings::default();
    let string = |key: &str, default: String| tree.get_string(key).unwrap_or(default);
    let duration = |key: &str, default: Duration| -> anyhow::Result<Duration> {
        match tree.get(key) {
            None => Ok(default),
            Some(_) => tree
                .get_duration(key)
                .with_context(|| format!("invalid duration for '{SECTION}.{key}'")),
        }
    };
    let port = match tree.get("port") {
        None => d.port,
        Some(_) => tree
            .get_u64("port")
            .and_then(|p| u16::try_from(p).ok())
            .with_context(|| format!("invalid port for '{SECTION}.port'"))?,
    };
    Ok(MySqlSettings {
        host: string("host", d.host),
        port,
        user: string("user", d.user),
        password: string("password", d.password),
        database: string("database", d.database),
        charset: string("charset", d.charset),
        collation: string("collation", d.collation),
        connect_timeout: duration("connect_timeout", d.connect_timeout)?,
        read_timeout: duration("read_timeout", d.read_timeout)?,
        write_timeout: duration("write_timeout", d.write_timeout)?,
        max_allowed_packet: string("max_allowed_packet", d.max_allowed_packet),
    })
}

/// Fill an empty password from `read` when running interactively.
///
/// Non-interactive runs leave it empty, so validation reports it.
pub fn fill_password(
    settings: &mut MySqlSettings,
    interactive: bool,
    read: impl FnOnce() -> std::io::Result<String>,
) -> anyhow::Result<()> {
    if !settings.password.trim().is_empty() || !interactive {
        return Ok(());
    }
    settings.password = read().context("failed to read mysql password from the terminal")?;
    Ok(())
}

#[async_trait]
impl Module for DatabaseConnector {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn deps(&self) -> &'static [&'static str] {
        &["config", "logger"]
    }

    fn register(&self, reg: &mut Registrar) {
        for (key, value) in default_values() {
            reg.set_default(&format!("{SECTION}.{key}"), value);
        }
        if !self.add_flags {
            return;
        }
        for &(flag, short, key, help) in FLAGS {
            let mut arg = Arg::new(flag).long(flag).value_name("VALUE").help(help);
            if let Some(s) = short {
                arg = arg.short(s);
            }
            reg.bound_arg(arg, format!("{SECTION}.{key}"));
        }
    }

    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        if !self.allows(ctx.command()) {
            tracing::debug!(command = ctx.command(), "database connection not needed");
            return Ok(());
        }

        let tree = ctx.config().current().require_subtree(SECTION)?;
        let mut settings = settings_from(&tree)?;
        fill_password(&mut settings, self.interactive(), || {
            rpassword::prompt_password("Password: ")
        })?;
        settings
            .validate()
            .context("mysql initialization failed")?;

        let db = DbHandle::connect_mysql(&settings, settings.pool_opts())
            .await
            .with_context(|| format!("connect database error ({})", settings.redacted_dsn()))?;
        let db = Arc::new(db);
        tracing::info!(dsn = %db.dsn(), "connect database success");

        ctx.client_hub().register(db.clone());
        let previous = self.handle.lock().replace(db);
        if let Some(previous) = previous {
            previous.close().await;
        }
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        let handle = self.handle.lock().take();
        if let Some(db) = handle {
            db.close().await;
            tracing::debug!("database pool closed");
        }
        Ok(())
    }
}
