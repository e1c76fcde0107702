use anyhow::{Context, Result};
use builtin_modules::{
    ConfigModule, DatabaseConnector, HelpModule, LoggerModule, ResourceTuner, VersionModule,
    WatchModule,
};
use clap::Command;
use modkit::runtime::wait_for_shutdown_or;
use modkit::{boot, BootError, BootOptions, Booted, Module, ModuleRegistry};
use modkit_db::DbHandle;
use runtime::LogSink;
use std::sync::Arc;

const ENV_PREFIX: &str = "SCAFFOLD";

fn cli() -> Command {
    Command::new("scaffold")
        .about("Simple command-line interface template")
        .subcommand(
            Command::new("serve").about("Run until interrupted, reloading the config file on change"),
        )
        .subcommand(Command::new("check").about("Print the merged configuration as YAML"))
        .subcommand(Command::new("db").about("Connect to MySQL and check the connection"))
}

/// The module list; order is significant.
fn modules() -> Result<ModuleRegistry> {
    // shared between the registry and the watcher
    let logger: Arc<dyn Module> = Arc::new(LoggerModule::new(true));

    let registry = ModuleRegistry::builder()
        // standalone
        .with(Arc::new(VersionModule::new(
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )))
        .with(Arc::new(HelpModule {
            hidden_short_flag: false,
            hidden_help_command: true,
        }))
        .with(Arc::new(ConfigModule::default()))
        // need the loaded configuration
        .with(logger.clone())
        .with(Arc::new(ResourceTuner::default()))
        .with(Arc::new(WatchModule::new(vec![logger])))
        .with(Arc::new(DatabaseConnector::new(true, ["db"])))
        .build()?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let sink = LogSink::new();
    sink.install_global()?;

    let opts = BootOptions::new(cli(), ENV_PREFIX).with_logger(sink.clone());
    let booted = match boot(modules()?, opts).await {
        Ok(booted) => booted,
        // help, version and usage errors print themselves and pick the exit code
        Err(BootError::Cli(e)) => e.exit(),
        Err(e) if sink.is_configured() => {
            let fatal = sink.fatal(&format!("{:#}", anyhow::Error::from(e)));
            sink.shutdown();
            return Err(fatal.into());
        }
        Err(e) => return Err(e.into()),
    };

    let result = run_command(&booted).await;
    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), command = booted.command(), "command failed");
    }
    booted.shutdown().await;
    result
}

async fn run_command(booted: &Booted) -> Result<()> {
    match booted.command() {
        "serve" => serve(booted).await,
        "check" => check(booted),
        "db" => ping_db(booted).await,
        _ => {
            let level = booted
                .config()
                .current()
                .get_string("settings.log.level")
                .unwrap_or_default();
            println!("{level}");
            Ok(())
        }
    }
}

async fn serve(booted: &Booted) -> Result<()> {
    tracing::info!("serving; send SIGINT or SIGTERM to stop");
    wait_for_shutdown_or(booted.ctx().cancellation_token()).await;
    tracing::info!("shutting down");
    Ok(())
}

fn check(booted: &Booted) -> Result<()> {
    let yaml = booted.config().to_yaml()?;
    match booted.config().source() {
        Some(path) => println!("# source: {}", path.display()),
        None => println!("# source: <defaults>"),
    }
    print!("{yaml}");
    Ok(())
}

async fn ping_db(booted: &Booted) -> Result<()> {
    let db = booted
        .ctx()
        .client_hub()
        .get::<DbHandle>()
        .context("database module did not publish a handle")?;
    db.ping().await?;
    println!("database reachable: {}", db.dsn());
    Ok(())
}
