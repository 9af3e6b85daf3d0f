//! Graceful-drain coordinator.
//!
//! # Responsibilities
//! - Gate admission of new work once shutdown has been requested
//! - Count admitted work units that have not completed yet
//! - Block (or await) callers until that count reaches zero
//! - Notify one-shot listeners when the drain completes
//!
//! # Design Decisions
//! - The counter is a lock-free atomic; the mutex only guards the drained transition
//! - Admission increments before reading the flag, completion decrements before reading it
//! - Listener bodies run after the lock is released
//! - `force_shutdown` finalizes bookkeeping without waiting for in-flight work
//!
//! ```text
//! admit() ──▶ active += 1 ──▶ shutdown? ──yes──▶ active -= 1 ──▶ Rejected
//!                                 │
//!                                 no
//!                                 ▼
//!                      Admitted(CompletionGuard)
//!                                 │ complete / drop
//!                                 ▼
//!                      active -= 1 ──▶ shutdown && active == 0? ──▶ drained
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;

/// Errors returned by the drain coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrainError {
    /// A wait was requested before `shutdown()` was called.
    #[error("handler is not shutting down; call shutdown() first")]
    NotShuttingDown,
}

/// One-shot callback invoked when the drain completes.
///
/// The argument reports whether the drain completed successfully.
pub type ShutdownListener = Box<dyn FnOnce(bool) + Send + 'static>;

/// Outcome of an admission attempt.
#[must_use = "dropping an admission completes the work unit immediately"]
#[derive(Debug)]
pub enum Admission {
    /// The unit was admitted; the guard must live until the unit finishes.
    Admitted(CompletionGuard),
    /// Shutdown is in progress and the unit must not be processed.
    Rejected,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Point-in-time view of the coordinator, used by the admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainStatus {
    pub shutting_down: bool,
    pub drained: bool,
    pub in_flight: i64,
}

struct DrainState {
    drained: bool,
    listeners: Vec<ShutdownListener>,
}

struct Inner {
    active: AtomicI64,
    shutdown: AtomicBool,
    state: Mutex<DrainState>,
    cond: Condvar,
    /// Mirrors `DrainState::drained` for async waiters.
    drained_tx: watch::Sender<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, DrainState> {
        // Listener bodies never run under this lock, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn active(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Completion routine, called once per admitted (or rejected) unit.
    fn complete_one(&self) {
        if self.release() == Some(0) && self.is_shutting_down() {
            self.finish_if_quiescent();
        }
    }

    /// Decrement the counter, returning the new count. `None` on underflow.
    fn release(&self) -> Option<i64> {
        let active = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        if active < 0 {
            self.active.fetch_add(1, Ordering::SeqCst);
            tracing::error!(active, "Work unit completed more times than it was admitted");
            return None;
        }
        Some(active)
    }

    /// Finish the drain if nothing is in flight.
    ///
    /// The count is read again under the lock: a unit admitted between the
    /// decrement and the flag check keeps the drain open, and the completion
    /// that brings the count back to zero finishes it.
    fn finish_if_quiescent(&self) {
        let listeners = {
            let mut state = self.lock();
            if self.active() != 0 {
                return;
            }
            self.finish_drain(&mut state)
        };
        run_listeners(listeners);
    }

    /// Marks the coordinator drained and hands back the listeners to fire.
    ///
    /// Must be called with the state lock held. Only the first call has any effect.
    fn finish_drain(&self, state: &mut DrainState) -> Vec<ShutdownListener> {
        if state.drained {
            return Vec::new();
        }
        state.drained = true;
        self.cond.notify_all();
        self.drained_tx.send_replace(true);
        tracing::info!(
            in_flight = self.active(),
            listeners = state.listeners.len(),
            "Drain complete"
        );
        std::mem::take(&mut state.listeners)
    }
}

fn run_listeners(listeners: Vec<ShutdownListener>) {
    for listener in listeners {
        invoke_listener(listener);
    }
}

fn invoke_listener(listener: ShutdownListener) {
    if panic::catch_unwind(AssertUnwindSafe(move || listener(true))).is_err() {
        tracing::error!("Shutdown listener panicked");
    }
}

/// Coordinates graceful shutdown of a server pipeline.
///
/// Cloning is cheap; every clone refers to the same coordinator. Build one per
/// server lifetime and hand clones to the admission path and the shutdown path.
/// A coordinator is not reusable once it has been shut down.
#[derive(Clone)]
pub struct GracefulShutdown {
    inner: Arc<Inner>,
}

impl GracefulShutdown {
    /// Create a coordinator that admits work until `shutdown()` is called.
    pub fn new() -> Self {
        let (drained_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                active: AtomicI64::new(0),
                shutdown: AtomicBool::new(false),
                state: Mutex::new(DrainState {
                    drained: false,
                    listeners: Vec::new(),
                }),
                cond: Condvar::new(),
                drained_tx,
            }),
        }
    }

    /// Decide whether a new unit of work may run.
    ///
    /// The counter is incremented before the shutdown flag is read, so a unit is
    /// either counted before any drain check observes the counter or rejected.
    pub fn admit(&self) -> Admission {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        if self.inner.is_shutting_down() {
            self.inner.complete_one();
            return Admission::Rejected;
        }
        Admission::Admitted(CompletionGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Forward a unit of work to `next` if it is admitted.
    ///
    /// `next` receives the completion guard and owns it for the lifetime of the
    /// unit. Returns `None` when the unit was rejected; `next` is not called then.
    pub fn handle<T, F>(&self, next: F) -> Option<T>
    where
        F: FnOnce(CompletionGuard) -> T,
    {
        match self.admit() {
            Admission::Admitted(guard) => Some(next(guard)),
            Admission::Rejected => None,
        }
    }

    /// Stop admitting new work. Already-admitted work is unaffected.
    ///
    /// Non-blocking and idempotent. Does not inspect the in-flight count.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::SeqCst) {
            tracing::info!(in_flight = self.active_count(), "Shutdown requested, rejecting new work");
        }
    }

    /// Shut down and finalize the drain immediately, even with work in flight.
    ///
    /// Waiters in [`await_shutdown`](Self::await_shutdown) return `true` and
    /// listeners are told the drain succeeded. This does not mean the in-flight
    /// work finished; it only means the shutdown bookkeeping is done. Units that
    /// complete afterwards decrement the counter as usual.
    pub fn force_shutdown(&self) {
        let listeners = {
            let mut state = self.inner.lock();
            self.shutdown();
            if !state.drained && self.active_count() > 0 {
                tracing::warn!(
                    in_flight = self.active_count(),
                    "Forcing shutdown with work possibly in flight"
                );
            }
            self.inner.finish_drain(&mut state)
        };
        run_listeners(listeners);
    }

    /// Block until in-flight work reaches zero or the timeout elapses.
    ///
    /// Returns `Ok(true)` once drained, `Ok(false)` on timeout, and
    /// `Err(DrainError::NotShuttingDown)` if `shutdown()` was never called.
    /// Safe to call from many threads at once; every waiter is woken on drain.
    pub fn await_shutdown(&self, timeout: Duration) -> Result<bool, DrainError> {
        let mut state = self.inner.lock();
        if !self.inner.is_shutting_down() {
            return Err(DrainError::NotShuttingDown);
        }

        let deadline = Instant::now() + timeout;
        while !state.drained && self.inner.active() > 0 {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (next, _) = self
                .inner
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        Ok(true)
    }

    /// Async counterpart of [`await_shutdown`](Self::await_shutdown) for tokio callers.
    pub async fn wait_drained(&self, timeout: Duration) -> Result<bool, DrainError> {
        if !self.inner.is_shutting_down() {
            return Err(DrainError::NotShuttingDown);
        }

        let mut drained = self.inner.drained_tx.subscribe();
        let quiescent = async {
            loop {
                if *drained.borrow_and_update() || self.inner.active() <= 0 {
                    return;
                }
                // The sender lives as long as `self`, so this only fails on a closed channel.
                if drained.changed().await.is_err() {
                    return;
                }
            }
        };
        Ok(tokio::time::timeout(timeout, quiescent).await.is_ok())
    }

    /// Register a one-shot listener for drain completion.
    ///
    /// If the drain already completed, or shutdown was requested and nothing is
    /// in flight, the listener runs synchronously before this call returns and
    /// is not stored. Otherwise it fires exactly once when the drain completes.
    pub fn add_shutdown_listener<F>(&self, listener: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let mut state = self.inner.lock();
        let fire_now =
            state.drained || (self.inner.is_shutting_down() && self.inner.active() == 0);
        if !fire_now {
            state.listeners.push(Box::new(listener));
            return;
        }
        drop(state);
        invoke_listener(Box::new(listener));
    }

    /// Current number of admitted, not yet completed units.
    pub fn active_count(&self) -> i64 {
        self.inner.active()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_shutting_down()
    }

    pub fn is_drained(&self) -> bool {
        self.inner.lock().drained
    }

    pub fn snapshot(&self) -> DrainStatus {
        let state = self.inner.lock();
        DrainStatus {
            shutting_down: self.inner.is_shutting_down(),
            drained: state.drained,
            in_flight: self.inner.active(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GracefulShutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GracefulShutdown")
            .field("active", &self.inner.active())
            .field("shutdown", &self.inner.is_shutting_down())
            .finish()
    }
}

/// Completion hook for one admitted unit of work.
///
/// Completes the unit exactly once: explicitly through [`complete`](Self::complete)
/// or implicitly on drop, which covers early returns, panics and dropped futures.
#[must_use = "dropping the guard completes the work unit immediately"]
pub struct CompletionGuard {
    inner: Arc<Inner>,
}

impl CompletionGuard {
    /// Mark the unit as finished.
    pub fn complete(self) {
        drop(self);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.inner.complete_one();
    }
}

impl fmt::Debug for CompletionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionGuard").finish_non_exhaustive()
    }
}
