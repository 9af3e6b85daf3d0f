//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Drain (drain.rs):
//!     admit → work runs with CompletionGuard → complete → drained when idle
//!
//! Shutdown (shutdown.rs):
//!     Request received → Stop admitting → Wait for in-flight work → Force on deadline
//!     → Stop accepting connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Second SIGTERM/SIGINT → Escalate to forced shutdown
//! ```
//!
//! # Design Decisions
//! - One drain coordinator per server, passed explicitly (no globals)
//! - Admission stops before connections stop, so keep-alive clients get 503
//! - Shutdown has timeout: forced drain after deadline

pub mod drain;
pub mod shutdown;
pub mod signals;

pub use drain::{Admission, CompletionGuard, DrainError, DrainStatus, GracefulShutdown};
pub use shutdown::{DrainOutcome, Shutdown, ShutdownMode};
