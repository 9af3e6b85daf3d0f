//! Drain gate middleware.
//! Admits requests through the graceful-drain coordinator.

use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::lifecycle::drain::{Admission, GracefulShutdown};
use crate::observability::metrics;

/// Seconds a rejected client is told to wait before retrying.
const RETRY_AFTER_SECS: &str = "5";

/// Response sent for requests arriving after shutdown started.
pub fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [
            (header::CONNECTION, "close"),
            (header::RETRY_AFTER, RETRY_AFTER_SECS),
        ],
        "Server is shutting down",
    )
        .into_response()
}

/// Middleware function gating requests on the drain coordinator.
///
/// The completion guard is held until the inner stack produced a response; if
/// the client goes away and the future is dropped, dropping the guard completes
/// the request instead.
pub async fn drain_middleware(
    State(gate): State<GracefulShutdown>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let guard = match gate.admit() {
        Admission::Admitted(guard) => guard,
        Admission::Rejected => {
            tracing::debug!(
                method = %request.method(),
                path = %request.uri().path(),
                "Rejecting request during shutdown"
            );
            metrics::record_rejected();
            return unavailable();
        }
    };
    metrics::set_in_flight(gate.active_count());

    let start_time = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;

    metrics::record_request(&method, response.status().as_u16(), start_time);
    guard.complete();
    metrics::set_in_flight(gate.active_count());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(gate: GracefulShutdown, reached: Arc<AtomicBool>) -> Router {
        let observed = gate.clone();
        Router::new()
            .route(
                "/",
                get(move || {
                    let reached = reached.clone();
                    let observed = observed.clone();
                    async move {
                        reached.store(true, Ordering::SeqCst);
                        observed.active_count().to_string()
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(gate, drain_middleware))
    }

    fn request() -> Request<Body> {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn admitted_request_is_counted_while_running() {
        let gate = GracefulShutdown::new();
        let reached = Arc::new(AtomicBool::new(false));

        let response = app(gate.clone(), reached.clone()).oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"1");
        assert!(reached.load(Ordering::SeqCst));
        assert_eq!(gate.active_count(), 0);
    }

    #[tokio::test]
    async fn rejected_request_never_reaches_handler() {
        let gate = GracefulShutdown::new();
        let reached = Arc::new(AtomicBool::new(false));
        gate.shutdown();

        let response = app(gate.clone(), reached.clone()).oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::CONNECTION).unwrap(), "close");
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        assert!(!reached.load(Ordering::SeqCst));
        assert_eq!(gate.active_count(), 0);
    }

    #[tokio::test]
    async fn dropped_request_completes() {
        let gate = GracefulShutdown::new();
        let router = Router::new()
            .route(
                "/",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    "late"
                }),
            )
            .layer(middleware::from_fn_with_state(gate.clone(), drain_middleware));

        let pending = tokio::spawn(router.oneshot(request()));
        while gate.active_count() == 0 {
            tokio::task::yield_now().await;
        }

        gate.shutdown();
        pending.abort();
        assert_eq!(gate.wait_drained(Duration::from_secs(5)).await, Ok(true));
        assert_eq!(gate.active_count(), 0);
    }
}
