//! SIGINT/SIGTERM handling.
//!
//! A signal trips the session's cancellation token; validation workers
//! notice it at their next claimed file and the run ends as interrupted.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Spawn a task that cancels `token` on the first SIGINT or SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            received = wait_for_signal() => {
                if received {
                    token.cancel();
                }
            }
            _ = token.cancelled() => {}
        }
    })
}

/// Wait for SIGINT or SIGTERM. Returns false if no handler could be installed.
async fn wait_for_signal() -> bool {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<bool>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => stream.recv().await.is_some(),
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<bool>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<bool>();

    tokio::select! {
        received = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), interrupting");
            received
        }
        received = terminate => {
            info!("Received SIGTERM, interrupting");
            received
        }
    }
}
