//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`OrchestratorConfig`] that
//! cannot be expressed through the type system alone (range checks,
//! uniqueness, cross-field invariants).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use std::collections::HashSet;

use super::{OrchestratorConfig, ProviderConfig};

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "defaults.confidence_threshold").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Validate all semantic constraints on an [`OrchestratorConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &OrchestratorConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Providers ────────────────────────────────────────────────────
    check_provider("providers.openai", &config.providers.openai, &mut errors);
    check_provider("providers.anthropic", &config.providers.anthropic, &mut errors);

    // ── Catalog ──────────────────────────────────────────────────────
    let mut seen = HashSet::new();
    for (i, model) in config.models.iter().enumerate() {
        if model.id.trim().is_empty() {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].id"),
                value: String::new(),
                reason: "model id must not be empty".into(),
            });
        } else if !seen.insert(model.id.as_str()) {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].id"),
                value: model.id.clone(),
                reason: "duplicate model id".into(),
            });
        }

        for (name, rate) in [
            ("input_cost_per_million", model.input_cost_per_million),
            ("output_cost_per_million", model.output_cost_per_million),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                errors.push(ConfigError::InvalidField {
                    field: format!("models[{i}].{name}"),
                    value: rate.to_string(),
                    reason: "rate must be a finite, non-negative number".into(),
                });
            }
        }
    }

    // ── Policy defaults ──────────────────────────────────────────────
    let threshold = config.defaults.confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        errors.push(ConfigError::InvalidField {
            field: "defaults.confidence_threshold".into(),
            value: threshold.to_string(),
            reason: "must be between 0.0 and 1.0".into(),
        });
    }

    if config.defaults.attempt_timeout_ms == Some(0) {
        errors.push(ConfigError::InvalidField {
            field: "defaults.attempt_timeout_ms".into(),
            value: "0".into(),
            reason: "timeout must be at least 1ms when set".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_provider(path: &str, provider: &ProviderConfig, errors: &mut Vec<ConfigError>) {
    if provider.timeout_ms == 0 {
        errors.push(ConfigError::InvalidField {
            field: format!("{path}.timeout_ms"),
            value: "0".into(),
            reason: "timeout must be at least 1ms".into(),
        });
    }

    if let Some(url) = &provider.base_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(ConfigError::InvalidField {
                field: format!("{path}.base_url"),
                value: url.clone(),
                reason: "must be an http(s) URL".into(),
            });
        }
    }

    if let Some(var) = &provider.api_key_env {
        if var.trim().is_empty() {
            errors.push(ConfigError::InvalidField {
                field: format!("{path}.api_key_env"),
                value: String::new(),
                reason: "environment variable name must not be empty".into(),
            });
        }
    }
}
