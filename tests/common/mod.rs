//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use graceful_gate::admin::{self, AdminState};
use graceful_gate::config::ServerConfig;
use graceful_gate::http::{handlers, HttpServer};
use graceful_gate::lifecycle::{GracefulShutdown, Shutdown, ShutdownMode};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const ADMIN_KEY: &str = "test-admin-key";

/// A running HTTP server bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub gate: GracefulShutdown,
    pub stop: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start the stock server (echo app behind the drain gate).
pub async fn spawn_server(config: ServerConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let gate = GracefulShutdown::new();
    let stop = Shutdown::new();

    let server = HttpServer::new(config, handlers::app(), gate.clone());
    let handle = tokio::spawn(server.run(listener, stop.subscribe()));

    TestServer {
        addr,
        gate,
        stop,
        handle,
    }
}

/// Start the admin API for `gate`, returning its address and the request channel.
#[allow(dead_code)]
pub async fn spawn_admin(
    gate: GracefulShutdown,
    stop: &Shutdown,
) -> (SocketAddr, mpsc::Receiver<ShutdownMode>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(4);

    let state = AdminState::new(gate, ADMIN_KEY, tx);
    tokio::spawn(admin::serve(listener, state, stop.subscribe()));
    (addr, rx)
}

/// HTTP client without connection pooling, so every request opens a new connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Wait until at least `count` requests are in flight.
pub async fn wait_for_in_flight(gate: &GracefulShutdown, count: i64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while gate.active_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("requests never became in flight");
}
