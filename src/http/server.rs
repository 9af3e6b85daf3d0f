//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap the application Router with the request pipeline
//! - Wire up middleware (tracing, request ID, drain gate, timeout, body limit)
//! - Bind server to listener
//! - Stop accepting connections when the lifecycle says so

use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::http::handlers;
use crate::http::middleware::drain_middleware;
use crate::http::request::{propagate_request_id, set_request_id};
use crate::lifecycle::drain::GracefulShutdown;

/// HTTP server whose application routes are gated by a drain coordinator.
pub struct HttpServer {
    router: Router,
    config: ServerConfig,
    gate: GracefulShutdown,
}

impl HttpServer {
    /// Create a new HTTP server serving `app` behind `gate`.
    pub fn new(config: ServerConfig, app: Router, gate: GracefulShutdown) -> Self {
        let router = Self::build_router(&config, app, gate.clone());
        Self {
            router,
            config,
            gate,
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// `/health` sits outside the drain gate so probes keep working while draining.
    #[allow(deprecated)]
    fn build_router(config: &ServerConfig, app: Router, gate: GracefulShutdown) -> Router {
        let gated = app
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(middleware::from_fn_with_state(gate.clone(), drain_middleware));

        Router::new()
            .route("/health", get(handlers::health))
            .with_state(gate)
            .merge(gated)
            .layer(propagate_request_id())
            .layer(set_request_id())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Returns once `shutdown` fires and open connections have closed.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!(in_flight = self.gate.active_count(), "HTTP server stopped");
        Ok(())
    }

    /// The fully layered router, for driving the pipeline without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The coordinator gating this server.
    pub fn gate(&self) -> &GracefulShutdown {
        &self.gate
    }
}
