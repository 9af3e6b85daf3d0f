//! Admin API.
//!
//! Served on its own listener and never behind the drain gate, so it keeps
//! answering while the main server drains.

pub mod auth;
pub mod handlers;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::drain::GracefulShutdown;
use crate::lifecycle::shutdown::ShutdownMode;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub gate: GracefulShutdown,
    pub api_key: Arc<str>,
    pub requests: mpsc::Sender<ShutdownMode>,
    pub requested: Arc<AtomicBool>,
}

impl AdminState {
    pub fn new(gate: GracefulShutdown, api_key: &str, requests: mpsc::Sender<ShutdownMode>) -> Self {
        Self {
            gate,
            api_key: Arc::from(api_key),
            requests,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/shutdown", post(post_shutdown))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API starting");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header::AUTHORIZATION, Method, Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> (AdminState, mpsc::Receiver<ShutdownMode>) {
        let (tx, rx) = mpsc::channel(4);
        (AdminState::new(GracefulShutdown::new(), "secret", tx), rx)
    }

    fn request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_token() {
        let (state, _rx) = state();
        let router = setup_admin_router(state);

        let response = router
            .clone()
            .oneshot(request(Method::GET, "/admin/status", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(request(Method::GET, "/admin/status", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_reflects_drain_state() {
        let (state, _rx) = state();
        let gate = state.gate.clone();
        let _guard = gate.admit();
        gate.shutdown();

        let response = setup_admin_router(state)
            .oneshot(request(Method::GET, "/admin/status", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let status: handlers::SystemStatus = serde_json::from_slice(&body).unwrap();
        assert!(status.shutting_down);
        assert!(!status.drained);
        assert_eq!(status.in_flight, 1);
    }

    #[tokio::test]
    async fn shutdown_requests_are_forwarded_once() {
        let (state, mut rx) = state();
        let router = setup_admin_router(state);

        let response = router
            .clone()
            .oneshot(request(Method::POST, "/admin/shutdown", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await, Some(ShutdownMode::Graceful));

        let response = router
            .clone()
            .oneshot(request(Method::POST, "/admin/shutdown", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = router
            .oneshot(request(Method::POST, "/admin/shutdown?force=true", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await, Some(ShutdownMode::Forced));
    }

    #[tokio::test]
    async fn graceful_request_conflicts_with_running_drain() {
        let (state, mut rx) = state();
        state.gate.shutdown();
        let router = setup_admin_router(state);

        let response = router
            .clone()
            .oneshot(request(Method::POST, "/admin/shutdown", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(rx.try_recv().is_err());

        let response = router
            .oneshot(request(Method::POST, "/admin/shutdown?force=true", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await, Some(ShutdownMode::Forced));
    }

    #[tokio::test]
    async fn undelivered_request_is_not_recorded() {
        let (state, rx) = state();
        drop(rx);
        let requested = state.requested.clone();

        let response = setup_admin_router(state)
            .oneshot(request(Method::POST, "/admin/shutdown", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!requested.load(std::sync::atomic::Ordering::SeqCst));
    }
}
