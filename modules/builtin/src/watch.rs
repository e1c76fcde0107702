use async_trait::async_trait;
use modkit::{Lifecycle, Module, ModuleCtx, Watcher};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Re-initializes `dependents` whenever the loaded config file changes.
///
/// Dependents are shared with the registry, so the instance that was
/// initialized at boot is the one that gets reconfigured.
pub struct WatchModule {
    dependents: Vec<Arc<dyn Module>>,
    debounce: Duration,
    running: Mutex<Option<(Arc<Watcher>, Lifecycle)>>,
}

impl std::fmt::Debug for WatchModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchModule")
            .field(
                "dependents",
                &self.dependents.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("debounce", &self.debounce)
            .field("active", &self.is_active())
            .finish()
    }
}

impl WatchModule {
    pub fn new(dependents: Vec<Arc<dyn Module>>) -> Self {
        Self {
            dependents,
            debounce: DEFAULT_DEBOUNCE,
            running: Mutex::new(None),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn is_active(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|(_, lc)| lc.is_running())
    }

    /// The running watcher, if any.
    pub fn watcher(&self) -> Option<Arc<Watcher>> {
        self.running.lock().as_ref().map(|(w, _)| w.clone())
    }
}

#[async_trait]
impl Module for WatchModule {
    fn name(&self) -> &'static str {
        "watch"
    }

    fn deps(&self) -> &'static [&'static str] {
        &["config"]
    }

    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let Some(path) = ctx.config().source() else {
            tracing::info!("no configuration file loaded; config watcher disabled");
            return Ok(());
        };
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|(_, lc)| lc.is_running()) {
            return Ok(());
        }

        let watcher = Arc::new(Watcher::new(
            ctx.config().clone(),
            self.dependents.clone(),
            self.debounce,
        ));
        let lc = watcher.spawn(ctx.clone())?;
        tracing::info!(
            path = %path.display(),
            debounce = ?self.debounce,
            dependents = ?self.dependents.iter().map(|m| m.name()).collect::<Vec<_>>(),
            "watching configuration file"
        );
        *running = Some((watcher, lc));
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        let running = self.running.lock().take();
        if let Some((watcher, lc)) = running {
            let reason = lc.stop(STOP_TIMEOUT).await?;
            tracing::debug!(?reason, reloads = watcher.reload_count(), "config watcher stopped");
        }
        Ok(())
    }
}
