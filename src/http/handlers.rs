//! Built-in routes of the stock server.
//!
//! `/health` reports drain state to load balancers; everything else is an echo
//! handler whose optional `delay_ms` query parameter simulates slow work.

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::any,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::http::request::RequestIdExt;
use crate::lifecycle::drain::GracefulShutdown;

/// Upper bound for simulated work.
const MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Default, Deserialize)]
pub struct EchoParams {
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EchoResponse {
    pub method: String,
    pub path: String,
    pub request_id: Option<String>,
}

/// Application routes served behind the drain gate by default.
pub fn app() -> Router {
    Router::new()
        .route("/", any(echo))
        .route("/{*path}", any(echo))
}

/// Liveness/readiness probe: 200 while serving, 503 once draining.
pub async fn health(State(gate): State<GracefulShutdown>) -> impl IntoResponse {
    if gate.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "ok")
    }
}

pub async fn echo(Query(params): Query<EchoParams>, request: Request<Body>) -> Json<EchoResponse> {
    if params.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(params.delay_ms.min(MAX_DELAY_MS))).await;
    }

    Json(EchoResponse {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        request_id: request.request_id().map(str::to_owned),
    })
}
