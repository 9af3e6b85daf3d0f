//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config files (TOML, base first, overrides after)
//!     → loader.rs (parse & deep-merge layers & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared by value/reference with all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_layered, override_bind, ConfigError};
pub use schema::AdminConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::ServerConfig;
pub use schema::ShutdownConfig;
