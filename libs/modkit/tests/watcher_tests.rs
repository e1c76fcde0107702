//! Config file edits re-run `initialize` on watched modules.

use async_trait::async_trait;
use clap::Command;
use modkit::{boot, BootOptions, Module, ModuleCtx, ModuleRegistry, Watcher};
use runtime::{LoadSpec, LogConfig, LogLevel, LoggerOptions, LogSink};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct FileConfig {
    path: PathBuf,
}

#[async_trait]
impl Module for FileConfig {
    fn name(&self) -> &'static str {
        "config"
    }

    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        ctx.config().load(&LoadSpec {
            file: Some(self.path.clone()),
            ..LoadSpec::default()
        })?;
        Ok(())
    }
}

#[derive(Default)]
struct LogSetup {
    runs: AtomicUsize,
}

#[async_trait]
impl Module for LogSetup {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn deps(&self) -> &'static [&'static str] {
        &["config"]
    }

    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let cfg: LogConfig = ctx.section_required("settings.log")?;
        ctx.logger().configure(&cfg, &LoggerOptions::default())?;
        Ok(())
    }
}

fn write_config(path: &Path, level: &str, log_file: &Path) {
    let doc = format!(
        "settings:\n  log:\n    level: {level}\n    format: json\n    output: {}\n",
        log_file.display()
    );
    std::fs::write(path, doc).unwrap();
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn level_change_in_file_takes_effect_without_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("app.yaml");
    let log_path = dir.path().join("app.log");
    write_config(&cfg_path, "info", &log_path);

    let logger = Arc::new(LogSetup::default());
    let registry = ModuleRegistry::builder()
        .with(Arc::new(FileConfig {
            path: cfg_path.clone(),
        }))
        .with(logger.clone())
        .build()
        .unwrap();

    let sink = LogSink::new();
    let booted = boot(
        registry,
        BootOptions::new(Command::new("app"), "MODKIT_WATCH_TEST")
            .with_args(["app"])
            .with_logger(sink.clone()),
    )
    .await
    .unwrap();

    assert!(!sink.enabled(LogLevel::Debug));
    sink.debug("dropped before reload");

    let watcher = Arc::new(Watcher::new(
        booted.config().clone(),
        vec![logger.clone() as Arc<dyn Module>],
        Duration::from_millis(50),
    ));
    let lc = watcher.spawn(booted.ctx().clone()).unwrap();
    // let the OS watch settle before editing
    tokio::time::sleep(Duration::from_millis(200)).await;

    write_config(&cfg_path, "debug", &log_path);
    eventually("debug level after reload", || sink.enabled(LogLevel::Debug)).await;
    assert!(watcher.reload_count() >= 1);
    assert!(logger.runs.load(Ordering::SeqCst) >= 2);

    sink.debug("emitted after reload");
    sink.flush();
    let written = std::fs::read_to_string(&log_path).unwrap();
    assert!(written.contains("emitted after reload"));
    assert!(!written.contains("dropped before reload"));

    // a broken edit is reported and the running configuration stays
    std::fs::write(&cfg_path, "settings: [unclosed\n").unwrap();
    eventually("failed reload", || watcher.failure_count() >= 1).await;
    assert!(sink.enabled(LogLevel::Debug));
    assert_eq!(
        booted.config().current().get_str("settings.log.level"),
        Some("debug")
    );

    lc.stop(Duration::from_secs(1)).await.unwrap();
    booted.shutdown().await;
    assert_eq!(sink.open_file_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_of_writes_reinitializes_once() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("app.yaml");
    let log_path = dir.path().join("app.log");
    write_config(&cfg_path, "info", &log_path);

    let logger = Arc::new(LogSetup::default());
    let registry = ModuleRegistry::builder()
        .with(Arc::new(FileConfig {
            path: cfg_path.clone(),
        }))
        .with(logger.clone())
        .build()
        .unwrap();
    let sink = LogSink::new();
    let booted = boot(
        registry,
        BootOptions::new(Command::new("app"), "MODKIT_WATCH_BURST")
            .with_args(["app"])
            .with_logger(sink.clone()),
    )
    .await
    .unwrap();
    assert_eq!(logger.runs.load(Ordering::SeqCst), 1);

    let debounce = Duration::from_millis(400);
    let watcher = Arc::new(Watcher::new(
        booted.config().clone(),
        vec![logger.clone() as Arc<dyn Module>],
        debounce,
    ));
    let lc = watcher.spawn(booted.ctx().clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    for level in ["warn", "error", "info", "warn", "debug"] {
        write_config(&cfg_path, level, &log_path);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    eventually("reload after burst", || watcher.reload_count() >= 1).await;
    // several windows later nothing else has fired
    tokio::time::sleep(debounce * 3).await;
    assert_eq!(watcher.reload_count(), 1);
    assert_eq!(watcher.failure_count(), 0);
    assert_eq!(logger.runs.load(Ordering::SeqCst), 2);
    // the last write wins
    assert_eq!(sink.current_config().unwrap().level, "debug");

    lc.stop(Duration::from_secs(1)).await.unwrap();
    booted.shutdown().await;
}

#[tokio::test]
async fn spawn_without_backing_file_fails() {
    let registry = ModuleRegistry::builder().build().unwrap();
    let booted = boot(
        registry,
        BootOptions::new(Command::new("app"), "MODKIT_WATCH_NOFILE").with_args(["app"]),
    )
    .await
    .unwrap();

    let watcher = Arc::new(Watcher::new(
        booted.config().clone(),
        Vec::new(),
        Duration::from_millis(50),
    ));
    assert!(watcher.spawn(booted.ctx().clone()).is_err());
}
