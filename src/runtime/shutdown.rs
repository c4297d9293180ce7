//! # Shutdown
//!
//! Translates SIGTERM and SIGINT into cancellation of the controller.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler, only SIGINT will stop the controller"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for SIGINT");
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT");
}

/// Cancel `cancel` on the first SIGTERM or SIGINT
pub fn spawn_signal_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = wait_for_signal() => {
                info!("Initiating graceful shutdown, waiting for in-flight reconciliations to complete...");
                cancel.cancel();
            }
        }
    })
}
