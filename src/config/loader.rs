//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    load_layered(&[path])
}

/// Load several TOML files in order and deep-merge them before validating.
///
/// Later files override earlier ones key by key; nested tables are merged
/// rather than replaced. An empty list yields the defaults.
pub fn load_layered<P: AsRef<Path>>(paths: &[P]) -> Result<ServerConfig, ConfigError> {
    let mut merged = toml::Table::new();
    for path in paths {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let layer: toml::Table = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), keys = layer.len(), "Config layer loaded");
        deep_merge(&mut merged, layer);
    }

    let config: ServerConfig =
        toml::Value::Table(merged)
            .try_into()
            .map_err(|source| ConfigError::Parse {
                path: paths
                    .last()
                    .map(|p| p.as_ref().to_path_buf())
                    .unwrap_or_default(),
                source,
            })?;

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Replace `listener.bind_address` and validate the result again.
pub fn override_bind(mut config: ServerConfig, bind: String) -> Result<ServerConfig, ConfigError> {
    config.listener.bind_address = bind;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Merge `overlay` into `base`, recursing into tables present in both.
pub fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
