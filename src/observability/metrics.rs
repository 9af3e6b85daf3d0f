//! Metrics collection and exposition.
//!
//! # Metrics
//! - `server_requests_total` (counter): completed requests by method, status
//! - `server_request_duration_seconds` (histogram): latency distribution
//! - `server_requests_in_flight` (gauge): admitted, not yet completed
//! - `server_requests_rejected_total` (counter): refused while draining
//! - `server_drain_completed_total` (counter): drains by `forced` label
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; it is a no-op until a recorder is installed
//! - Prometheus exporter runs on its own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start_time: Instant) {
    metrics::counter!(
        "server_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("server_request_duration_seconds", "method" => method.to_string())
        .record(start_time.elapsed().as_secs_f64());
}

pub fn set_in_flight(count: i64) {
    metrics::gauge!("server_requests_in_flight").set(count as f64);
}

pub fn record_rejected() {
    metrics::counter!("server_requests_rejected_total").increment(1);
}

pub fn record_drain_completed(forced: bool) {
    metrics::counter!("server_drain_completed_total", "forced" => forced.to_string()).increment(1);
}
