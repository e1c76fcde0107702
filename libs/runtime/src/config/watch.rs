use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ConfigError;

/// Stream of debounced "the config file changed" notifications.
///
/// Dropping the stream cancels it and releases the file-system watch.
pub struct ConfigChanges {
    rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
    // Kept alive for as long as the stream exists.
    _watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for ConfigChanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigChanges")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ConfigChanges {
    /// Build a stream over an arbitrary source of raw change signals.
    pub fn from_raw(raw: mpsc::UnboundedReceiver<()>, debounce: Duration) -> Self {
        let cancel = CancellationToken::new();
        let rx = spawn_debounce(raw, debounce, cancel.clone());
        Self {
            rx,
            cancel,
            _watcher: None,
        }
    }

    /// Wait for the next change.
    ///
    /// Returns `None` once the stream is cancelled or its source is gone.
    pub async fn next(&mut self) -> Option<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            v = self.rx.recv() => v,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ConfigChanges {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Trailing-edge debounce: a notification is sent once no raw signal has
/// arrived for `window`. Any burst collapses into a single notification.
///
/// The returned channel holds at most one pending notification.
pub fn spawn_debounce(
    mut raw: mpsc::UnboundedReceiver<()>,
    window: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                ev = raw.recv() => if ev.is_none() { return },
            }

            // quiet period, restarted by every new signal
            let mut source_closed = false;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    ev = raw.recv() => match ev {
                        Some(()) => continue,
                        None => {
                            source_closed = true;
                            break;
                        }
                    },
                    _ = tokio::time::sleep(window) => break,
                }
            }

            match tx.try_send(()) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
                Err(mpsc::error::TrySendError::Closed(())) => return,
            }
            if source_closed {
                return;
            }
        }
    });

    rx
}

/// Watch a single file through its parent directory so that editors which
/// replace the file on save are still observed.
pub(crate) fn watch_file(path: &Path, debounce: Duration) -> Result<ConfigChanges, ConfigError> {
    let file_name: OsString = path
        .file_name()
        .ok_or(ConfigError::NoBackingFile)?
        .to_os_string();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                && event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
            if relevant {
                let _ = raw_tx.send(());
            }
        }
        Err(e) => tracing::warn!(error = %e, "config file watcher error"),
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    tracing::debug!(path = %path.display(), ?debounce, "watching config file");

    let mut changes = ConfigChanges::from_raw(raw_rx, debounce);
    changes._watcher = Some(watcher);
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::{timeout, Instant};

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_notification() {
        let (tx, raw) = mpsc::unbounded_channel();
        let mut changes = ConfigChanges::from_raw(raw, Duration::from_millis(100));

        for _ in 0..5 {
            tx.send(()).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let started = Instant::now();
        assert_eq!(changes.next().await, Some(()));
        // trailing edge: fires a full window after the last signal
        assert!(started.elapsed() >= Duration::from_millis(80));

        let second = timeout(Duration::from_secs(1), changes.next()).await;
        assert!(second.is_err(), "burst produced more than one notification");
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_notify_separately() {
        let (tx, raw) = mpsc::unbounded_channel();
        let mut changes = ConfigChanges::from_raw(raw, Duration::from_millis(50));

        tx.send(()).unwrap();
        tx.send(()).unwrap();
        assert_eq!(changes.next().await, Some(()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(()).unwrap();
        assert_eq!(changes.next().await, Some(()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_ends_the_stream() {
        let (_tx, raw) = mpsc::unbounded_channel();
        let mut changes = ConfigChanges::from_raw(raw, Duration::from_millis(50));
        changes.cancel();
        assert!(changes.is_cancelled());
        assert_eq!(changes.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_source_flushes_pending_signal() {
        let (tx, raw) = mpsc::unbounded_channel();
        let mut changes = ConfigChanges::from_raw(raw, Duration::from_millis(50));
        tx.send(()).unwrap();
        drop(tx);
        assert_eq!(changes.next().await, Some(()));
        assert_eq!(changes.next().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn file_modification_is_observed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.yaml");
        fs::write(&path, "settings:\n  log:\n    level: info\n").unwrap();

        let mut changes = watch_file(&path, Duration::from_millis(50)).unwrap();
        // unrelated files in the same directory are ignored
        fs::write(dir.path().join("other.yaml"), "x: 1\n").unwrap();
        fs::write(&path, "settings:\n  log:\n    level: debug\n").unwrap();

        let got = timeout(Duration::from_secs(5), changes.next()).await;
        assert_eq!(got.ok().flatten(), Some(()));
    }
}
