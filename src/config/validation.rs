//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Detect conflicting listeners
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ServerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("admin.api_key must not be empty when the admin API is enabled")]
    EmptyApiKey,
    #[error("admin.bind_address conflicts with listener.bind_address ({0})")]
    AddressConflict(String),
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = check_address(
        &mut errors,
        "listener.bind_address",
        &config.listener.bind_address,
    );

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.request_secs",
        });
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::Zero {
            field: "security.max_body_size",
        });
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::EmptyApiKey);
        }
        let admin = check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if let (Some(listener), Some(admin)) = (listener, admin) {
            if listener == admin && listener.port() != 0 {
                errors.push(ValidationError::AddressConflict(admin.to_string()));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    value: &str,
) -> Option<SocketAddr> {
    match value.parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            errors.push(ValidationError::InvalidAddress {
                field,
                value: value.to_string(),
            });
            None
        }
    }
}
