use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// Resolve on SIGINT / SIGTERM (Ctrl+C and console close events on Windows).
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?; // Ctrl+C
        tokio::select! {
            _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "shutdown requested"),
            _ = sigint.recv()  => tracing::info!(signal = "SIGINT", "shutdown requested"),
        }
        Ok(())
    }

    #[cfg(windows)]
    {
        use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close, ctrl_shutdown};

        let mut c = ctrl_c()?;
        let mut br = ctrl_break()?;
        let mut cl = ctrl_close()?;
        let mut sh = ctrl_shutdown()?;
        tokio::select! {
            _ = c.recv()  => {},
            _ = br.recv() => {},
            _ = cl.recv() => {},
            _ = sh.recv() => {},
        }
        tracing::info!("shutdown requested");
        Ok(())
    }
}

/// Wait for a signal or for `cancel`, whichever comes first, then cancel
/// `cancel` so every task bound to it winds down.
pub async fn wait_for_shutdown_or(cancel: &CancellationToken) {
    let signalled = async {
        if let Err(e) = wait_for_shutdown().await {
            tracing::warn!(error = %e, "signal handler unavailable; falling back to ctrl_c()");
            let _ = tokio::signal::ctrl_c().await;
        }
    };
    tokio::select! {
        _ = signalled => {}
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}
