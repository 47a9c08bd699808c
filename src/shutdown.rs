use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Cancel the returned token on the first SIGTERM or SIGINT.
///
/// Both handlers are registered before this returns, so a signal that
/// arrives while the pool is starting is not lost. Must be called from
/// within a tokio runtime.
pub fn install_shutdown_handler() -> Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = name, "Shutdown signal received, stopping workers");
        trigger.cancel();
    });

    Ok(token)
}
