use std::sync::atomic::Ordering;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;

use crate::admin::AdminState;
use crate::lifecycle::shutdown::ShutdownMode;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub shutting_down: bool,
    pub drained: bool,
    pub in_flight: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShutdownParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShutdownAccepted {
    pub mode: ShutdownMode,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let status = state.gate.snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        shutting_down: status.shutting_down,
        drained: status.drained,
        in_flight: status.in_flight,
    })
}

/// Ask the lifecycle loop to shut down.
///
/// A graceful request while shutdown is already requested or under way (from
/// a signal, say) is a conflict. A forced request always goes through so an
/// operator can escalate a slow drain. The request counts as made only once
/// the lifecycle loop has accepted it.
pub async fn post_shutdown(
    State(state): State<AdminState>,
    Query(params): Query<ShutdownParams>,
) -> Result<(StatusCode, Json<ShutdownAccepted>), (StatusCode, &'static str)> {
    let mode = if params.force {
        ShutdownMode::Forced
    } else {
        ShutdownMode::Graceful
    };

    if mode == ShutdownMode::Graceful {
        let claimed = state
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if !claimed || state.gate.is_shutting_down() {
            return Err((StatusCode::CONFLICT, "Shutdown already requested"));
        }
    }

    match state.requests.try_send(mode) {
        Ok(()) => {
            state.requested.store(true, Ordering::SeqCst);
            tracing::info!(?mode, "Shutdown requested via admin API");
            Ok((StatusCode::ACCEPTED, Json(ShutdownAccepted { mode })))
        }
        Err(TrySendError::Full(_)) => Err((StatusCode::CONFLICT, "Shutdown already requested")),
        Err(TrySendError::Closed(_)) => {
            if mode == ShutdownMode::Graceful {
                state.requested.store(false, Ordering::SeqCst);
            }
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "Lifecycle loop is no longer listening",
            ))
        }
    }
}
