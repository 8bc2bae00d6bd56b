//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into an [`OrchestratorConfig`], and
//! run validation before returning. This is the primary entry point for
//! loading configuration at startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Defining the config schema (that belongs to `mod.rs`)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::OrchestratorConfig;

/// Environment variable naming the config file used by [`load_from_env`].
pub const CONFIG_PATH_ENV: &str = "ESCALATOR_CONFIG";

/// Load an [`OrchestratorConfig`] from a TOML file.
///
/// # Returns
///
/// - `Ok(OrchestratorConfig)` if the file is readable, well-formed, and valid.
/// - `Err(ConfigError::Io)` if the file cannot be read.
/// - `Err(ConfigError::Parse)` if the TOML is malformed.
/// - `Err(ConfigError::Validation)` if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_file(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load an [`OrchestratorConfig`] from a TOML string.
///
/// `source_name` identifies the source in error messages.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<OrchestratorConfig, ConfigError> {
    let config: OrchestratorConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

/// Load from the file named by `ESCALATOR_CONFIG`, or return the defaults
/// when the variable is unset.
///
/// # Errors
///
/// Same as [`load_from_file`] when the variable is set.
pub fn load_from_env() -> Result<OrchestratorConfig, ConfigError> {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => load_from_file(Path::new(&path)),
        _ => {
            tracing::debug!("{CONFIG_PATH_ENV} not set, using default configuration");
            Ok(OrchestratorConfig::default())
        }
    }
}
