//! End-to-end tests of the boot driver: phase order, overrides, failures.

use async_trait::async_trait;
use clap::{Arg, Command};
use modkit::{
    boot, BootError, BootOptions, CheckCtx, Module, ModuleCtx, ModuleRegistry,
    PreconditionViolation, Registrar, RegistryError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type Journal = Arc<Mutex<Vec<String>>>;

struct Recorder {
    name: &'static str,
    journal: Journal,
    veto: bool,
    fail_init: bool,
    seen_command: Mutex<Option<String>>,
}

impl Recorder {
    fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: journal.clone(),
            veto: false,
            fail_init: false,
            seen_command: Mutex::new(None),
        }
    }

    fn veto(mut self) -> Self {
        self.veto = true;
        self
    }

    fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    fn note(&self, phase: &str) {
        self.journal.lock().push(format!("{phase}:{}", self.name));
    }
}

#[async_trait]
impl Module for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn register(&self, _reg: &mut Registrar) {
        self.note("register");
    }

    fn must_check(&self, _ctx: &CheckCtx<'_>) -> Result<(), PreconditionViolation> {
        self.note("check");
        if self.veto {
            return Err(PreconditionViolation::new(self.name, "vetoed"));
        }
        Ok(())
    }

    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.note("init");
        *self.seen_command.lock() = Some(ctx.command().to_string());
        if self.fail_init {
            anyhow::bail!("boom");
        }
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        self.note("stop");
        Ok(())
    }
}

/// Declares `--level` bound to `settings.log.level` with default `info`.
struct LevelFlag;

#[async_trait]
impl Module for LevelFlag {
    fn name(&self) -> &'static str {
        "level-flag"
    }

    fn register(&self, reg: &mut Registrar) {
        reg.set_default("settings.log.level", "info");
        reg.bound_arg(Arg::new("level").long("level"), "settings.log.level");
    }

    async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }
}

fn cli() -> Command {
    Command::new("app").subcommand(Command::new("serve"))
}

fn opts(args: &[&str]) -> BootOptions {
    BootOptions::new(cli(), "MODKIT_RUNNER_TEST").with_args(args.iter().copied())
}

fn registry(mods: Vec<Arc<dyn Module>>) -> ModuleRegistry {
    ModuleRegistry::new(mods).unwrap()
}

#[tokio::test]
async fn phases_complete_for_all_modules_in_order() {
    let journal: Journal = Arc::default();
    let reg = registry(vec![
        Arc::new(Recorder::new("a", &journal)),
        Arc::new(Recorder::new("b", &journal)),
    ]);

    let booted = boot(reg, opts(&["app"])).await.unwrap();
    assert_eq!(
        *journal.lock(),
        vec![
            "register:a",
            "register:b",
            "check:a",
            "check:b",
            "init:a",
            "init:b"
        ]
    );

    booted.shutdown().await;
    let tail: Vec<String> = journal.lock()[6..].to_vec();
    assert_eq!(tail, vec!["stop:b", "stop:a"]);
}

#[tokio::test]
async fn repeated_boots_are_deterministic() {
    let mut runs = Vec::new();
    for _ in 0..2 {
        let journal: Journal = Arc::default();
        let reg = registry(vec![
            Arc::new(Recorder::new("x", &journal)),
            Arc::new(Recorder::new("y", &journal)),
        ]);
        let booted = boot(reg, opts(&["app", "serve"])).await.unwrap();
        booted.shutdown().await;
        let entries = journal.lock().clone();
        runs.push(entries);
    }
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn first_init_failure_aborts_remaining_modules() {
    let journal: Journal = Arc::default();
    let reg = registry(vec![
        Arc::new(Recorder::new("a", &journal)),
        Arc::new(Recorder::new("b", &journal).fail_init()),
        Arc::new(Recorder::new("c", &journal)),
    ]);

    let err = boot(reg, opts(&["app"])).await.unwrap_err();
    match err {
        BootError::Registry(RegistryError::Init { module, source }) => {
            assert_eq!(module, "b");
            assert_eq!(source.to_string(), "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let entries = journal.lock().clone();
    assert!(entries.contains(&"init:a".to_string()));
    assert!(!entries.contains(&"init:c".to_string()));
}

#[tokio::test]
async fn precondition_violation_stops_before_any_initialize() {
    let journal: Journal = Arc::default();
    let reg = registry(vec![
        Arc::new(Recorder::new("a", &journal)),
        Arc::new(Recorder::new("b", &journal).veto()),
        Arc::new(Recorder::new("c", &journal)),
    ]);

    let err = boot(reg, opts(&["app"])).await.unwrap_err();
    assert!(matches!(
        err,
        BootError::Registry(RegistryError::Precondition(ref v)) if v.module == "b"
    ));
    let entries = journal.lock().clone();
    assert!(entries.iter().all(|e| !e.starts_with("init:")));
    assert!(!entries.contains(&"check:c".to_string()));
}

#[tokio::test]
async fn invoked_subcommand_reaches_the_context() {
    let journal: Journal = Arc::default();
    let rec = Arc::new(Recorder::new("a", &journal));
    let reg = registry(vec![rec.clone()]);

    let booted = boot(reg, opts(&["app", "serve"])).await.unwrap();
    assert_eq!(booted.command(), "serve");
    assert_eq!(rec.seen_command.lock().as_deref(), Some("serve"));
}

#[tokio::test]
async fn root_command_name_when_no_subcommand() {
    let reg = registry(vec![Arc::new(LevelFlag)]);
    let booted = boot(reg, opts(&["app"])).await.unwrap();
    assert_eq!(booted.command(), "app");
}

#[tokio::test]
async fn explicit_flag_beats_default_and_environment() {
    std::env::set_var("MODKIT_RUNNER_ENV__SETTINGS__LOG__LEVEL", "warn");

    let booted = boot(
        registry(vec![Arc::new(LevelFlag)]),
        BootOptions::new(cli(), "MODKIT_RUNNER_ENV").with_args(["app"]),
    )
    .await
    .unwrap();
    assert_eq!(
        booted.config().current().get_str("settings.log.level"),
        Some("warn")
    );

    let booted = boot(
        registry(vec![Arc::new(LevelFlag)]),
        BootOptions::new(cli(), "MODKIT_RUNNER_ENV").with_args(["app", "serve", "--level", "debug"]),
    )
    .await
    .unwrap();
    assert_eq!(
        booted.config().current().get_str("settings.log.level"),
        Some("debug")
    );
}

#[tokio::test]
async fn default_applies_without_flag_or_environment() {
    let booted = boot(registry(vec![Arc::new(LevelFlag)]), opts(&["app"]))
        .await
        .unwrap();
    assert_eq!(
        booted.config().current().get_str("settings.log.level"),
        Some("info")
    );
}

#[tokio::test]
async fn help_and_usage_errors_surface_as_cli_errors() {
    let err = boot(registry(vec![Arc::new(LevelFlag)]), opts(&["app", "--help"]))
        .await
        .unwrap_err();
    match err {
        BootError::Cli(e) => assert_eq!(e.kind(), clap::error::ErrorKind::DisplayHelp),
        other => panic!("unexpected error: {other:?}"),
    }

    let err = boot(registry(vec![Arc::new(LevelFlag)]), opts(&["app", "--nope"]))
        .await
        .unwrap_err();
    assert!(matches!(err, BootError::Cli(ref e) if e.exit_code() == 2));
}

#[tokio::test]
async fn shutdown_cancels_the_process_token() {
    let cancel = CancellationToken::new();
    let booted = boot(
        registry(vec![Arc::new(LevelFlag)]),
        opts(&["app"]).with_cancel(cancel.clone()),
    )
    .await
    .unwrap();
    assert!(!cancel.is_cancelled());
    booted.shutdown().await;
    assert!(cancel.is_cancelled());
}
