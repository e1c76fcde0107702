//! Start/stop control for background loops such as the config watcher.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// State of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Stopped,
    Running,
    Stopping,
}

impl Status {
    const fn from_u8(x: u8) -> Self {
        match x {
            1 => Status::Running,
            2 => Status::Stopping,
            _ => Status::Stopped,
        }
    }
}

/// Why a job stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The job had already returned on its own.
    Finished,
    /// The job returned after its token was cancelled.
    Cancelled,
    /// The job ignored cancellation and was aborted.
    Timeout,
}

/// A long-running loop owned by a [`Lifecycle`].
///
/// Takes `self` by `Arc` so the spawned future is `'static`.
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    /// Must return soon after `cancel` fires.
    async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("already started")]
    AlreadyStarted,
}

struct Job {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns at most one spawned job: start once, stop with a deadline.
pub struct Lifecycle {
    job: Mutex<Option<Job>>,
    status: Arc<AtomicU8>,
    /// `true` while no job is executing.
    idle: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            job: Mutex::new(None),
            status: Arc::new(AtomicU8::new(Status::Stopped as u8)),
            idle: Arc::new(idle),
        }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.status() == Status::Running
    }

    /// Spawn `make(token)` under a fresh token.
    pub fn start<F, Fut>(&self, make: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.start_with_token(CancellationToken::new(), make)
    }

    /// Run a [`Runnable`] under `token`; cancelling the token from outside
    /// ends the job the same way [`Lifecycle::stop`] does.
    pub fn start_runnable<R: Runnable>(
        &self,
        token: CancellationToken,
        job: Arc<R>,
    ) -> Result<(), LifecycleError> {
        self.start_with_token(token, move |cancel| job.run(cancel))
    }

    #[tracing::instrument(skip_all, level = "debug")]
    pub fn start_with_token<F, Fut>(
        &self,
        token: CancellationToken,
        make: F,
    ) -> Result<(), LifecycleError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut slot = self.job.lock();
        if self.status() != Status::Stopped {
            return Err(LifecycleError::AlreadyStarted);
        }
        self.status.store(Status::Running as u8, Ordering::Release);
        self.idle.send_replace(false);

        let status = self.status.clone();
        let idle = self.idle.clone();
        let cancel = token.clone();
        // the future is built inside the task so a panicking `make` still
        // unwinds through the join handle
        let handle = tokio::spawn(async move {
            if let Err(e) = make(cancel).await {
                tracing::error!(error = %format!("{e:#}"), "background job failed");
            }
            status.store(Status::Stopped as u8, Ordering::Release);
            idle.send_replace(true);
        });
        *slot = Some(Job {
            cancel: token,
            handle,
        });
        tracing::debug!("background job started");
        Ok(())
    }

    /// Cancel the job and wait up to `timeout` for it to return; past the
    /// deadline it is aborted.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn stop(&self, timeout: Duration) -> Result<StopReason, LifecycleError> {
        let Some(job) = self.job.lock().take() else {
            return Ok(StopReason::Finished);
        };
        let mut idle = self.idle.subscribe();
        let reason = if *idle.borrow() {
            StopReason::Finished
        } else {
            self.status.store(Status::Stopping as u8, Ordering::Release);
            job.cancel.cancel();
            match tokio::time::timeout(timeout, idle.wait_for(|done| *done)).await {
                Ok(_) => StopReason::Cancelled,
                Err(_) => StopReason::Timeout,
            }
        };

        if reason == StopReason::Timeout {
            tracing::warn!(?timeout, "background job ignored cancellation; aborting");
            job.handle.abort();
        }
        match job.handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => tracing::debug!("background job aborted"),
            Err(e) => tracing::warn!(error = %e, "background job panicked"),
        }

        self.status.store(Status::Stopped as u8, Ordering::Release);
        self.idle.send_replace(true);
        tracing::debug!(?reason, "background job stopped");
        Ok(reason)
    }

    /// Resolve once no job is executing.
    pub async fn wait_stopped(&self) {
        let mut idle = self.idle.subscribe();
        // the sender lives in `self`, so the channel cannot close here
        let _ = idle.wait_for(|done| *done).await;
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if let Some(job) = self.job.get_mut().take() {
            job.cancel.cancel();
            job.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::time::sleep;

    struct Counter {
        ticks: AtomicU32,
    }

    #[async_trait]
    impl Runnable for Counter {
        async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
            loop {
                tokio::select! {
                    _ = sleep(Duration::from_millis(5)) => {
                        self.ticks.fetch_add(1, Ordering::Relaxed);
                    }
                    _ = cancel.cancelled() => return Ok(()),
                }
            }
        }
    }

    #[tokio::test]
    async fn stop_cancels_a_running_job() {
        let lc = Lifecycle::new();
        assert_eq!(lc.status(), Status::Stopped);

        lc.start(|cancel| async move {
            cancel.cancelled().await;
            Ok(())
        })
        .unwrap();
        assert!(lc.is_running());

        let reason = lc.stop(Duration::from_millis(200)).await.unwrap();
        assert_eq!(reason, StopReason::Cancelled);
        assert_eq!(lc.status(), Status::Stopped);
    }

    #[tokio::test]
    async fn external_token_ends_the_job() {
        let lc = Lifecycle::new();
        let job = Arc::new(Counter {
            ticks: AtomicU32::new(0),
        });
        let parent = CancellationToken::new();
        lc.start_runnable(parent.child_token(), job.clone()).unwrap();

        sleep(Duration::from_millis(40)).await;
        assert!(job.ticks.load(Ordering::Relaxed) > 0);

        parent.cancel();
        lc.wait_stopped().await;
        assert_eq!(lc.status(), Status::Stopped);
        assert_eq!(
            lc.stop(Duration::from_millis(10)).await.unwrap(),
            StopReason::Finished
        );
    }

    #[tokio::test]
    async fn job_that_ignores_cancellation_is_aborted() {
        let lc = Lifecycle::new();
        lc.start(|_cancel| async move {
            sleep(Duration::from_secs(1000)).await;
            Ok(())
        })
        .unwrap();

        let reason = lc.stop(Duration::from_millis(30)).await.unwrap();
        assert_eq!(reason, StopReason::Timeout);
        assert_eq!(lc.status(), Status::Stopped);
    }

    #[tokio::test]
    async fn cannot_start_twice_but_can_restart_after_stop() {
        let lc = Lifecycle::new();
        lc.start(|cancel| async move {
            cancel.cancelled().await;
            Ok(())
        })
        .unwrap();
        assert!(matches!(
            lc.start(|_| async { Ok(()) }),
            Err(LifecycleError::AlreadyStarted)
        ));

        lc.stop(Duration::from_millis(100)).await.unwrap();
        lc.start(|cancel| async move {
            cancel.cancelled().await;
            Ok(())
        })
        .unwrap();
        assert!(lc.is_running());
        lc.stop(Duration::from_millis(100)).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_stops_are_safe() {
        let lc = Arc::new(Lifecycle::new());
        lc.start(|cancel| async move {
            cancel.cancelled().await;
            Ok(())
        })
        .unwrap();

        let (a, b) = (lc.clone(), lc.clone());
        let (r1, r2) = tokio::join!(
            async move { a.stop(Duration::from_millis(100)).await },
            async move { b.stop(Duration::from_millis(100)).await },
        );
        assert!(r1.is_ok() && r2.is_ok());
        assert_eq!(lc.status(), Status::Stopped);
    }
}
