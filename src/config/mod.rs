//! # Stage: Declarative Orchestrator Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML file that names provider endpoints, the model
//! catalog with its pricing, and default policy limits.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same config
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Total: every field has a default, so an empty file is a valid config
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Reading API keys (that belongs to `worker`, via the env var names here)
//! - Building the registry or invoker (that belongs to `escalation`)

pub mod loader;
pub mod validation;

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::registry::{default_catalog, ModelDescriptor, ProviderKind};

// ── Default value functions ──────────────────────────────────────────────

/// Default per-request HTTP timeout for provider calls: 30 000ms.
fn default_provider_timeout_ms() -> u64 {
    30_000
}

/// Default acceptance threshold.
fn default_confidence_threshold() -> f64 {
    0.7
}

/// Default run budget: 50¢.
fn default_max_budget_cents() -> u64 {
    50
}

/// Default enabled state: true.
fn default_true() -> bool {
    true
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for an orchestrator instance.
///
/// # Example
///
/// ```toml
/// [providers.openai]
/// api_key_env = "OPENAI_API_KEY"
///
/// [[models]]
/// id = "gpt-4o-mini"
/// provider = "openai"
/// input_cost_per_million = 0.15
/// output_cost_per_million = 0.60
///
/// [defaults]
/// confidence_threshold = 0.75
/// max_budget_cents = 30
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OrchestratorConfig {
    /// Provider endpoints and credential sources.
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Local echo backend for smoke tests.
    #[serde(default)]
    pub echo: EchoConfig,
    /// Model catalog. Empty means the built-in catalog.
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    /// Defaults applied by callers that do not set their own limits.
    #[serde(default)]
    pub defaults: PolicyDefaults,
    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl OrchestratorConfig {
    /// The model catalog to register, converted to descriptors.
    ///
    /// Falls back to [`default_catalog`] when no models are configured.
    pub fn catalog(&self) -> Vec<ModelDescriptor> {
        if self.models.is_empty() {
            return default_catalog();
        }
        self.models.iter().map(ModelEntry::to_descriptor).collect()
    }

    /// Per-attempt timeout, if configured.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.defaults.attempt_timeout_ms.map(Duration::from_millis)
    }
}

// ── Providers ────────────────────────────────────────────────────────────

/// Endpoint settings for every remote provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProvidersConfig {
    /// OpenAI chat completions.
    #[serde(default)]
    pub openai: ProviderConfig,
    /// Anthropic messages.
    #[serde(default)]
    pub anthropic: ProviderConfig,
}

/// One provider's endpoint settings.
///
/// `None` fields fall back to the provider's standard value.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProviderConfig {
    /// Whether the provider may be used at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// API base URL override (e.g. a proxy).
    pub base_url: Option<String>,
    /// HTTP timeout per request in milliseconds.
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: None,
            base_url: None,
            timeout_ms: default_provider_timeout_ms(),
        }
    }
}

impl ProviderConfig {
    /// Configured key variable, or `fallback`.
    pub fn api_key_env_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.api_key_env.as_deref().unwrap_or(fallback)
    }

    /// HTTP timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Echo backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EchoConfig {
    /// Register the echo provider. Off by default.
    #[serde(default)]
    pub enabled: bool,
    /// Simulated latency per call.
    #[serde(default)]
    pub delay_ms: u64,
}

// ── Catalog ──────────────────────────────────────────────────────────────

/// One catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ModelEntry {
    /// Model id as sent to the provider.
    pub id: String,
    /// Serving provider.
    pub provider: ProviderKind,
    /// USD per million input tokens.
    pub input_cost_per_million: f64,
    /// USD per million output tokens.
    pub output_cost_per_million: f64,
}

impl ModelEntry {
    /// Convert to a registry descriptor.
    pub fn to_descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::new(
            self.id.clone(),
            self.provider,
            self.input_cost_per_million,
            self.output_cost_per_million,
        )
    }
}

// ── Policy defaults ──────────────────────────────────────────────────────

/// Limits callers start from when building a policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PolicyDefaults {
    /// Acceptance threshold in `[0, 1]`.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Run budget in cents.
    #[serde(default = "default_max_budget_cents")]
    pub max_budget_cents: u64,
    /// Per-attempt timeout; a timed-out attempt escalates like any other
    /// transport failure. `None` disables it.
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_budget_cents: default_max_budget_cents(),
            attempt_timeout_ms: None,
        }
    }
}

// ── Observability ────────────────────────────────────────────────────────

/// Logging and metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Register Prometheus metrics at startup.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            metrics_enabled: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    #[default]
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

impl LogFormat {
    /// Value understood by `LOG_FORMAT` in [`crate::init_tracing`].
    pub fn as_env_value(&self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }

    /// Parse a `LOG_FORMAT` value. Anything other than `"json"` is pretty.
    pub fn from_env_value(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Export the JSON Schema for [`OrchestratorConfig`].
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(OrchestratorConfig);
    serde_json::to_string_pretty(&schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_provider_timeout_ms_returns_30000() {
        assert_eq!(default_provider_timeout_ms(), 30_000);
    }

    #[test]
    fn test_default_policy_limits() {
        let d = PolicyDefaults::default();
        assert!((d.confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(d.max_budget_cents, 50);
        assert!(d.attempt_timeout_ms.is_none());
    }

    #[test]
    fn test_empty_models_falls_back_to_default_catalog() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.catalog().len(), default_catalog().len());
    }

    #[test]
    fn test_configured_models_replace_default_catalog() {
        let config = OrchestratorConfig {
            models: vec![ModelEntry {
                id: "only".into(),
                provider: ProviderKind::Anthropic,
                input_cost_per_million: 1.0,
                output_cost_per_million: 2.0,
            }],
            ..OrchestratorConfig::default()
        };
        let catalog = config.catalog();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].id(), "only");
    }

    #[test]
    fn test_api_key_env_falls_back() {
        let p = ProviderConfig::default();
        assert_eq!(p.api_key_env_or("OPENAI_API_KEY"), "OPENAI_API_KEY");
        let p = ProviderConfig {
            api_key_env: Some("MY_KEY".into()),
            ..ProviderConfig::default()
        };
        assert_eq!(p.api_key_env_or("OPENAI_API_KEY"), "MY_KEY");
    }

    #[test]
    fn test_log_format_deserializes_from_snake_case() {
        let fmt: LogFormat = serde_json::from_str("\"json\"").expect("test: deserialization");
        assert_eq!(fmt, LogFormat::Json);
        assert_eq!(fmt.as_env_value(), "json");
    }

    #[test]
    fn test_log_format_from_env_value_defaults_to_pretty() {
        assert_eq!(LogFormat::from_env_value("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_env_value("verbose"), LogFormat::Pretty);
        assert_eq!(
            LogFormat::from_env_value(LogFormat::Json.as_env_value()),
            LogFormat::Json
        );
    }

    #[test]
    fn test_export_schema_produces_valid_json() {
        let schema = export_schema().expect("test: schema export");
        let parsed: serde_json::Value =
            serde_json::from_str(&schema).expect("test: schema is valid JSON");
        assert!(parsed.get("properties").is_some() || parsed.get("$ref").is_some());
    }
}
