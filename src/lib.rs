//! # escalation-orchestrator
//!
//! Cost-capped escalation of AI tasks across an ordered list of model
//! backends.
//!
//! ## Architecture
//!
//! A caller hands a [`TaskRequest`] and a [`TaskPolicy`] to
//! [`Orchestrator::run_task`]. The controller walks the policy's model list
//! (cheapest first), invoking one backend at a time:
//! ```text
//! TaskPolicy.models ─► invoke ─► ledger + budget check ─► validators ─► scorer
//!        ▲                                                               │
//!        └────────────────────── escalate ◄──────────────────────────────┘
//! ```
//! The first attempt that validates and scores at or above the threshold is
//! accepted. Exceeding the run's budget cap terminates immediately.

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod escalation;
pub mod ledger;
pub mod metrics;
pub mod registry;
pub mod scoring;
pub mod task;
pub mod validation;
pub mod worker;

// Re-exports for convenience
pub use config::LogFormat;
pub use escalation::Orchestrator;
pub use ledger::BudgetLedger;
pub use registry::{ModelDescriptor, ModelRegistry, ProviderKind};
pub use scoring::{FieldPresenceScorer, FixedScorer, Scorer, TextHeuristicScorer};
pub use task::{
    AttemptDisposition, AttemptResult, AttemptSummary, OrchestrationResult, OutputShape,
    RunOutcome, TaskPolicy, TaskRequest,
};
pub use validation::{
    FieldOneOf, JsonShape, MinLength, RequiredFields, ValidationOutcome, Validator,
    ValidatorPipeline,
};
pub use worker::{BackendReply, ModelInvoker, ProviderBinding, ProviderInvoker};

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), OrchestratorError> {
    let format = std::env::var(LOG_FORMAT_ENV)
        .map(|v| LogFormat::from_env_value(&v))
        .unwrap_or_default();
    init_tracing_with_format(format)
}

/// Initialise the global tracing subscriber with an explicit output format.
///
/// Same as [`init_tracing`] but ignores `LOG_FORMAT`; the filter still comes
/// from `RUST_LOG`.
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if a global subscriber is already set.
pub fn init_tracing_with_format(format: LogFormat) -> Result<(), OrchestratorError> {
    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level orchestrator errors.
///
/// Expected escalation events (a bad answer, a low score, a failed backend
/// call) are *not* errors at this level; they are recorded in the
/// [`OrchestrationResult`]. `run_task` only returns `Err` for programmer
/// errors such as an empty model list.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A backend call failed (network, auth, HTTP status, or malformed payload).
    #[error("transport failure: {0}")]
    Transport(String),

    /// A backend call exceeded the per-attempt timeout.
    #[error("model {model} timed out after {after_ms}ms")]
    Timeout {
        /// Model that was being invoked.
        model: String,
        /// Configured timeout in milliseconds.
        after_ms: u64,
    },

    /// The model id is not in the registry (unknown, or its provider has no
    /// credentials configured).
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The caller supplied a policy that can never run.
    #[error("invalid task policy: {0}")]
    InvalidPolicy(String),

    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    /// Return `true` if this error came from a single backend call and should
    /// trigger escalation rather than abort the caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_includes_message() {
        let err = OrchestratorError::ConfigError("OPENAI_API_KEY not set".to_string());
        assert!(err.to_string().contains("OPENAI_API_KEY not set"));
    }

    #[test]
    fn test_timeout_display_names_model_and_duration() {
        let err = OrchestratorError::Timeout {
            model: "gpt-4o-mini".to_string(),
            after_ms: 1500,
        };
        let msg = err.to_string();
        assert!(msg.contains("gpt-4o-mini"));
        assert!(msg.contains("1500ms"));
    }

    #[test]
    fn test_is_transport_classifies_variants() {
        assert!(OrchestratorError::Transport("boom".into()).is_transport());
        assert!(OrchestratorError::Timeout {
            model: "m".into(),
            after_ms: 1
        }
        .is_transport());
        assert!(!OrchestratorError::InvalidPolicy("empty".into()).is_transport());
        assert!(!OrchestratorError::ModelNotFound("m".into()).is_transport());
    }

    #[test]
    fn test_init_tracing_second_call_returns_err() {
        let _ = init_tracing();
        let result = init_tracing();
        assert!(result.is_err(), "double init must return Err, not panic");
    }

    #[test]
    fn test_init_tracing_with_format_leaves_environment_untouched() {
        let before = std::env::var(LOG_FORMAT_ENV).ok();
        let _ = init_tracing_with_format(LogFormat::Json);
        let second = init_tracing_with_format(LogFormat::Pretty);
        assert!(second.is_err());
        assert_eq!(std::env::var(LOG_FORMAT_ENV).ok(), before);
    }
}
