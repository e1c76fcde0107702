//! Re-initializes modules when the configuration file changes.
//!
//! ```text
//! ConfigChanges::next() → ConfigStore::reload() → initialize(dep) for each dependent
//! ```
//!
//! Failures are logged and the loop keeps going with the configuration that
//! was in effect before; only cancellation ends it.

use async_trait::async_trait;
use runtime::{ConfigChanges, ConfigStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::context::ModuleCtx;
use crate::contracts::Module;
use crate::lifecycle::{Lifecycle, Runnable};

pub struct Watcher {
    store: Arc<ConfigStore>,
    dependents: Vec<Arc<dyn Module>>,
    debounce: Duration,
    reloads: AtomicU64,
    failures: AtomicU64,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field(
                "dependents",
                &self.dependents.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("debounce", &self.debounce)
            .field("reloads", &self.reload_count())
            .finish()
    }
}

impl Watcher {
    pub fn new(
        store: Arc<ConfigStore>,
        dependents: Vec<Arc<dyn Module>>,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            dependents,
            debounce,
            reloads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Completed cycles in which the config was reloaded successfully.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Acquire)
    }

    /// Cycles in which the reload itself failed.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    /// Subscribe to the backing file and run the watch loop in the background.
    ///
    /// Subscribing happens here, so a missing backing file or an OS watch
    /// failure is reported to the caller rather than from inside the task.
    pub fn spawn(self: &Arc<Self>, ctx: ModuleCtx) -> anyhow::Result<Lifecycle> {
        let changes = self.store.watch(self.debounce)?;
        let task = Arc::new(WatchTask {
            watcher: self.clone(),
            changes: tokio::sync::Mutex::new(changes),
            ctx,
        });
        let lc = Lifecycle::new();
        let token = task.ctx.cancellation_token().child_token();
        lc.start_runnable(token, task)?;
        Ok(lc)
    }

    /// One reload cycle.
    pub async fn apply_change(&self, ctx: &ModuleCtx) {
        if let Err(e) = self.store.reload() {
            self.failures.fetch_add(1, Ordering::AcqRel);
            tracing::error!(error = %e, "config reload failed; keeping previous configuration");
            return;
        }
        for dep in &self.dependents {
            let scoped = ctx.clone().for_module(dep.name());
            if let Err(e) = dep.initialize(&scoped).await {
                tracing::error!(
                    module = dep.name(),
                    error = %e,
                    "re-initialization after config change failed"
                );
            }
        }
        let n = self.reloads.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(reloads = n, "configuration reloaded");
    }
}

struct WatchTask {
    watcher: Arc<Watcher>,
    changes: tokio::sync::Mutex<ConfigChanges>,
    ctx: ModuleCtx,
}

#[async_trait]
impl Runnable for WatchTask {
    async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut changes = self.changes.lock().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                ev = changes.next() => {
                    if ev.is_none() {
                        break;
                    }
                }
            }
            self.watcher.apply_change(&self.ctx).await;
        }
        changes.cancel();
        tracing::debug!("config watcher stopped");
        Ok(())
    }
}
