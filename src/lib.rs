//! HTTP server with graceful request draining.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::{GracefulShutdown, Shutdown};
