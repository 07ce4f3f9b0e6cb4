//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP forces a rebuild, not a shutdown

use std::io;

/// Wait for SIGINT or SIGTERM, calling `on_reload` for every SIGHUP.
#[cfg(unix)]
pub async fn wait_for_termination<F: FnMut()>(mut on_reload: F) -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                tracing::info!("SIGINT received, shutting down");
                return Ok(());
            }
            _ = terminate.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                return Ok(());
            }
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, forcing rebuild");
                on_reload();
            }
        }
    }
}

/// Wait for Ctrl+C. There is no reload signal on this platform.
#[cfg(not(unix))]
pub async fn wait_for_termination<F: FnMut()>(_on_reload: F) -> io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl+C received, shutting down");
    Ok(())
}
