//! HTTP middleware.

pub mod drain;

pub use drain::{drain_middleware, unavailable};
