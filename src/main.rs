//! graceful-gate server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                    GRACEFUL GATE                     │
//!   Client Request   │  ┌──────────┐   ┌────────────┐   ┌───────────────┐   │
//!   ─────────────────┼─▶│ http     │──▶│ drain gate │──▶│  application  │   │
//!                    │  │ server   │   │ (admit/503)│   │    router     │   │
//!                    │  └──────────┘   └─────┬──────┘   └───────────────┘   │
//!                    │                       │ in-flight count              │
//!                    │                       ▼                              │
//!   SIGINT/SIGTERM   │  ┌──────────┐   ┌────────────┐   ┌───────────────┐   │
//!   ─────────────────┼─▶│ signals  │──▶│ lifecycle  │──▶│ stop listeners│   │
//!   Admin API        │  │ / admin  │   │ drain/force│   │               │   │
//!   ─────────────────┼─▶└──────────┘   └────────────┘   └───────────────┘   │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use graceful_gate::admin::{self, AdminState};
use graceful_gate::config::{load_layered, override_bind};
use graceful_gate::http::{handlers, HttpServer};
use graceful_gate::lifecycle::{shutdown, signals, GracefulShutdown, Shutdown};
use graceful_gate::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "graceful-gate")]
#[command(about = "HTTP server with graceful request draining", long_about = None)]
struct Args {
    /// Config files, merged in order (later files override earlier ones).
    #[arg(short, long = "config")]
    config: Vec<PathBuf>,

    /// Override listener.bind_address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_layered(&args.config)?;
    if let Some(bind) = args.bind {
        config = override_bind(config, bind)?;
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "graceful-gate starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        drain_timeout_secs = config.shutdown.drain_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gate = GracefulShutdown::new();
    let stop = Shutdown::new();
    let (requests_tx, mut requests_rx) = mpsc::channel(4);
    let mut servers = JoinSet::new();

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config.clone(), handlers::app(), gate.clone());
    servers.spawn(server.run(listener, stop.subscribe()));

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState::new(gate.clone(), &config.admin.api_key, requests_tx.clone());
        servers.spawn(admin::serve(admin_listener, state, stop.subscribe()));
    }

    let mode = tokio::select! {
        mode = signals::wait_for_signal() => mode,
        Some(mode) = requests_rx.recv() => mode,
    };

    let escalation = async {
        tokio::select! {
            _ = signals::escalation() => {}
            _ = shutdown::forced_request(&mut requests_rx) => {}
        }
    };
    let outcome = shutdown::drain(&gate, mode, &config.shutdown, escalation).await;
    tracing::info!(?outcome, "Drain finished");

    stop.trigger();
    let grace = Duration::from_secs(config.shutdown.serve_grace_secs);
    let stopped = tokio::time::timeout(grace, async {
        while let Some(result) = servers.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Server exited with error"),
                Err(e) => tracing::error!(error = %e, "Server task failed"),
            }
        }
    })
    .await;

    if stopped.is_err() {
        tracing::warn!(
            grace_secs = config.shutdown.serve_grace_secs,
            "Connections still open after grace period, aborting"
        );
        servers.abort_all();
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
