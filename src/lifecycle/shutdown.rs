//! Shutdown coordination for the server.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::config::ShutdownConfig;
use crate::lifecycle::drain::GracefulShutdown;
use crate::observability::metrics;

/// Coordinator for stopping the listeners.
///
/// Provides a broadcast channel that every server loop subscribes to. It is
/// triggered after the drain, so connections stay open while work finishes.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (servers still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// How a shutdown request wants the drain to be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// Stop admitting work and wait for in-flight work up to the drain timeout.
    Graceful,
    /// Finalize the drain immediately.
    Forced,
}

/// How the drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// All in-flight work completed.
    Drained,
    /// The drain was forced; `in_flight` units were abandoned.
    Forced { in_flight: i64 },
    /// The deadline passed and forcing is disabled.
    TimedOut { in_flight: i64 },
}

/// Run the drain sequence for a shutdown request.
///
/// `escalation` resolves when the operator asks again (e.g. a second signal);
/// a graceful drain still running at that point is forced.
pub async fn drain<E>(
    gate: &GracefulShutdown,
    mode: ShutdownMode,
    config: &ShutdownConfig,
    escalation: E,
) -> DrainOutcome
where
    E: Future<Output = ()>,
{
    if mode == ShutdownMode::Forced {
        return force(gate);
    }

    gate.shutdown();
    let timeout = Duration::from_secs(config.drain_timeout_secs);
    tracing::info!(
        in_flight = gate.active_count(),
        timeout_secs = config.drain_timeout_secs,
        "Draining in-flight requests"
    );

    let drained = tokio::select! {
        drained = gate.wait_drained(timeout) => drained.unwrap_or(false),
        _ = escalation => {
            tracing::warn!("Shutdown requested again, forcing drain");
            return force(gate);
        }
    };

    if drained {
        // Nothing left in flight: finalize so listeners registered earlier fire too.
        gate.force_shutdown();
        metrics::record_drain_completed(false);
        return DrainOutcome::Drained;
    }

    let in_flight = gate.active_count();
    if config.force_on_timeout {
        tracing::warn!(in_flight, "Drain deadline exceeded");
        return force(gate);
    }

    tracing::error!(in_flight, "Drain deadline exceeded, leaving work in flight");
    DrainOutcome::TimedOut { in_flight }
}

/// Resolve on the first forced request from `requests`.
///
/// Graceful requests while a drain is running are ignored. A closed channel
/// never escalates.
pub async fn forced_request(requests: &mut mpsc::Receiver<ShutdownMode>) {
    while let Some(mode) = requests.recv().await {
        match mode {
            ShutdownMode::Forced => return,
            ShutdownMode::Graceful => tracing::debug!("Ignoring repeated graceful shutdown request"),
        }
    }
    std::future::pending::<()>().await
}

fn force(gate: &GracefulShutdown) -> DrainOutcome {
    let in_flight = gate.active_count();
    gate.force_shutdown();
    metrics::record_drain_completed(true);
    DrainOutcome::Forced { in_flight }
}
