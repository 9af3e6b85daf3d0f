//! OS signal handling.
//!
//! # Responsibilities
//! - Listen for SIGINT (Ctrl+C) and, on unix, SIGTERM
//! - Translate them into shutdown requests
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - The first signal starts a graceful drain; the next one escalates to forced

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use crate::lifecycle::shutdown::ShutdownMode;

/// Wait for the first termination signal.
pub async fn wait_for_signal() -> ShutdownMode {
    wait_any().await;
    ShutdownMode::Graceful
}

/// Wait for a further termination signal while a drain is running.
pub async fn escalation() {
    wait_any().await;
}

async fn wait_any() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(signal = "SIGINT", "Shutdown signal received"),
        _ = terminate => tracing::info!(signal = "SIGTERM", "Shutdown signal received"),
    }
}
