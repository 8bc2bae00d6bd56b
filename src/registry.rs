//! # Stage: Model Registry & Cost Model
//!
//! ## Responsibility
//! Map a model id to its provider and per-token pricing, and compute the
//! cost of one attempt in integer cents.
//!
//! ## Guarantees
//! - Read-only after construction: safe for unsynchronised concurrent reads
//!   behind an `Arc`.
//! - Only models whose provider has credentials are ever registered, so
//!   `resolve` doubles as the availability check.
//! - Cost rounding is always *up*: budget checks never under-count spend.
//! - Deterministic: cost is a pure function of `(model, in, out)` computed
//!   with integer arithmetic, no floating-point drift.
//!
//! ## NOT Responsible For
//! - Calling the providers (that belongs to `worker`)
//! - Accumulating spend (that belongs to `ledger`)

use std::collections::HashMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::OrchestratorError;

/// Micro-dollars per US dollar.
const MICROS_PER_USD: u128 = 1_000_000;

/// `tokens · micro-dollars-per-million` ÷ this = cents.
///
/// 1e6 tokens per rate unit × 1e4 micro-dollars per cent.
const CENT_DIVISOR: u128 = 10_000_000_000;

/// Provider family a model belongs to.
///
/// # Panics
///
/// This type never panics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI chat completions API.
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// In-process echo backend for smoke tests; needs no credentials.
    Echo,
}

impl ProviderKind {
    /// Stable lowercase label used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Echo => "echo",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one model: who serves it and what it costs.
///
/// Rates are held as integer micro-dollars per million tokens.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    id: String,
    provider: ProviderKind,
    input_micro_per_million: u64,
    output_micro_per_million: u64,
}

impl ModelDescriptor {
    /// Create a descriptor from USD-per-million-token rates.
    ///
    /// Negative or non-finite rates are treated as zero.
    pub fn new(
        id: impl Into<String>,
        provider: ProviderKind,
        input_usd_per_million: f64,
        output_usd_per_million: f64,
    ) -> Self {
        Self {
            id: id.into(),
            provider,
            input_micro_per_million: usd_to_micro(input_usd_per_million),
            output_micro_per_million: usd_to_micro(output_usd_per_million),
        }
    }

    /// Model identifier as sent to the provider.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Provider serving this model.
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Input rate in USD per million tokens.
    pub fn input_usd_per_million(&self) -> f64 {
        micro_to_usd(self.input_micro_per_million)
    }

    /// Output rate in USD per million tokens.
    pub fn output_usd_per_million(&self) -> f64 {
        micro_to_usd(self.output_micro_per_million)
    }

    /// Cost of one attempt in cents, rounded up.
    ///
    /// `ceil((in·in_rate + out·out_rate) / 1e6 · 100)` with rates in USD per
    /// million tokens, evaluated exactly in `u128`.
    ///
    /// # Panics
    ///
    /// This function never panics.
    ///
    /// # Example
    ///
    /// ```rust
    /// use escalation_orchestrator::{ModelDescriptor, ProviderKind};
    /// let m = ModelDescriptor::new("m", ProviderKind::OpenAi, 3.0, 15.0);
    /// // 1000·3 + 1000·15 = 18 000 µ$·M⁻¹ → $0.018 → 1.8¢ → 2¢
    /// assert_eq!(m.cost(1000, 1000), 2);
    /// ```
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> u64 {
        let micro_numerator = u128::from(input_tokens) * u128::from(self.input_micro_per_million)
            + u128::from(output_tokens) * u128::from(self.output_micro_per_million);
        let cents = micro_numerator.div_ceil(CENT_DIVISOR);
        u64::try_from(cents).unwrap_or(u64::MAX)
    }
}

/// Read-only catalog of available models.
///
/// Built once at startup; wrap in an `Arc` and share freely.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
    index: HashMap<String, usize>,
}

impl ModelRegistry {
    /// Build a registry from descriptors, keeping catalog order.
    ///
    /// When an id appears twice the first entry wins.
    pub fn new(descriptors: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let mut models = Vec::new();
        let mut index = HashMap::new();
        for descriptor in descriptors {
            if index.contains_key(descriptor.id()) {
                tracing::warn!(model = descriptor.id(), "duplicate model id ignored");
                continue;
            }
            index.insert(descriptor.id().to_string(), models.len());
            models.push(descriptor);
        }
        Self { models, index }
    }

    /// Build a registry from a catalog, excluding every model whose provider
    /// is not credentialed.
    ///
    /// # Arguments
    ///
    /// * `catalog` — Every model the deployment knows about.
    /// * `has_credentials` — Availability predicate per provider.
    pub fn from_catalog<F>(catalog: impl IntoIterator<Item = ModelDescriptor>, has_credentials: F) -> Self
    where
        F: Fn(ProviderKind) -> bool,
    {
        let (kept, dropped): (Vec<_>, Vec<_>) = catalog
            .into_iter()
            .partition(|m| has_credentials(m.provider()));

        for model in &dropped {
            tracing::info!(
                model = model.id(),
                provider = %model.provider(),
                "model excluded: provider has no credentials"
            );
        }

        Self::new(kept)
    }

    /// Look up a model by id.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ModelNotFound`] if the id is unknown or
    /// its provider was not credentialed at startup.
    pub fn resolve(&self, id: &str) -> Result<&ModelDescriptor, OrchestratorError> {
        self.index
            .get(id)
            .and_then(|&i| self.models.get(i))
            .ok_or_else(|| OrchestratorError::ModelNotFound(id.to_string()))
    }

    /// Return `true` if the id resolves.
    pub fn is_available(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Cost of an attempt against `id`, in cents.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ModelNotFound`] for unknown ids.
    pub fn cost(&self, id: &str, input_tokens: u64, output_tokens: u64) -> Result<u64, OrchestratorError> {
        Ok(self.resolve(id)?.cost(input_tokens, output_tokens))
    }

    /// Ids of every registered model, in catalog order.
    pub fn available_ids(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.id()).collect()
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Return `true` if no model is registered.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Built-in catalog used when the configuration declares no models.
///
/// Ordered cheapest first. Prices are USD per million tokens.
pub fn default_catalog() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("echo-local", ProviderKind::Echo, 0.0, 0.0),
        ModelDescriptor::new("gpt-4o-mini", ProviderKind::OpenAi, 0.15, 0.60),
        ModelDescriptor::new("claude-3-5-haiku-latest", ProviderKind::Anthropic, 0.80, 4.00),
        ModelDescriptor::new("gpt-4o", ProviderKind::OpenAi, 2.50, 10.00),
        ModelDescriptor::new("claude-sonnet-4-20250514", ProviderKind::Anthropic, 3.00, 15.00),
    ]
}

// ── Helpers ────────────────────────────────────────────────────────────

fn usd_to_micro(usd: f64) -> u64 {
    if !usd.is_finite() || usd <= 0.0 {
        return 0;
    }
    (usd * MICROS_PER_USD as f64).round() as u64
}

fn micro_to_usd(micro: u64) -> f64 {
    micro as f64 / MICROS_PER_USD as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonnet() -> ModelDescriptor {
        ModelDescriptor::new("sonnet", ProviderKind::Anthropic, 3.0, 15.0)
    }

    #[test]
    fn test_cost_rounds_fraction_of_a_cent_up() {
        // 1000 input tokens at $3/M = $0.003 = 0.3¢ → 1¢
        assert_eq!(sonnet().cost(1000, 0), 1);
    }

    #[test]
    fn test_cost_exact_cent_is_not_bumped() {
        // 10 000 output tokens at $15/M = $0.15 = 15¢ exactly
        assert_eq!(sonnet().cost(0, 10_000), 15);
    }

    #[test]
    fn test_cost_zero_tokens_is_zero() {
        assert_eq!(sonnet().cost(0, 0), 0);
    }

    #[test]
    fn test_cost_is_deterministic() {
        let m = sonnet();
        assert_eq!(m.cost(1234, 5678), m.cost(1234, 5678));
    }

    #[test]
    fn test_doubling_output_tokens_roughly_doubles_output_term() {
        let m = ModelDescriptor::new("out-only", ProviderKind::OpenAi, 0.0, 10.0);
        let single = m.cost(0, 50_000);
        let double = m.cost(0, 100_000);
        assert_eq!(single, 50);
        assert_eq!(double, 100);

        // With ceiling rounding, the doubled value is within one cent of 2×.
        let odd_single = m.cost(0, 1_234);
        let odd_double = m.cost(0, 2_468);
        assert!(odd_double <= odd_single * 2);
        assert!(odd_double + 1 >= odd_single * 2);
    }

    #[test]
    fn test_cost_handles_fractional_rates_exactly() {
        let mini = ModelDescriptor::new("mini", ProviderKind::OpenAi, 0.15, 0.60);
        // 200 000·0.15 + 100 000·0.60 = 30 000 + 60 000 µ$ → $0.09 → 9¢
        assert_eq!(mini.cost(200_000, 100_000), 9);
    }

    #[test]
    fn test_negative_rate_clamps_to_zero() {
        let m = ModelDescriptor::new("weird", ProviderKind::OpenAi, -1.0, f64::NAN);
        assert_eq!(m.cost(1_000_000, 1_000_000), 0);
        assert_eq!(m.input_usd_per_million(), 0.0);
    }

    #[test]
    fn test_rate_accessors_round_trip_usd() {
        let m = sonnet();
        assert!((m.input_usd_per_million() - 3.0).abs() < 1e-9);
        assert!((m.output_usd_per_million() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_unknown_returns_model_not_found() {
        let registry = ModelRegistry::new(vec![sonnet()]);
        let err = registry.resolve("gpt-9").unwrap_err();
        assert!(matches!(err, OrchestratorError::ModelNotFound(id) if id == "gpt-9"));
    }

    #[test]
    fn test_from_catalog_excludes_uncredentialed_providers() {
        let registry = ModelRegistry::from_catalog(default_catalog(), |p| p != ProviderKind::OpenAi);
        assert!(!registry.is_available("gpt-4o-mini"));
        assert!(!registry.is_available("gpt-4o"));
        assert!(registry.is_available("claude-3-5-haiku-latest"));
        assert!(registry.is_available("echo-local"));
    }

    #[test]
    fn test_available_ids_keep_catalog_order() {
        let registry = ModelRegistry::from_catalog(default_catalog(), |_| true);
        assert_eq!(
            registry.available_ids(),
            vec![
                "echo-local",
                "gpt-4o-mini",
                "claude-3-5-haiku-latest",
                "gpt-4o",
                "claude-sonnet-4-20250514"
            ]
        );
    }

    #[test]
    fn test_duplicate_ids_keep_first_entry() {
        let registry = ModelRegistry::new(vec![
            ModelDescriptor::new("m", ProviderKind::OpenAi, 1.0, 1.0),
            ModelDescriptor::new("m", ProviderKind::Anthropic, 9.0, 9.0),
        ]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("m").unwrap().provider(), ProviderKind::OpenAi);
    }

    #[test]
    fn test_registry_cost_delegates_to_descriptor() {
        let registry = ModelRegistry::new(vec![sonnet()]);
        assert_eq!(registry.cost("sonnet", 1000, 0).unwrap(), 1);
        assert!(registry.cost("missing", 1, 1).is_err());
    }

    #[test]
    fn test_provider_kind_serde_name_matches_display() {
        let json = serde_json::to_string(&ProviderKind::OpenAi).expect("test: serialization");
        assert_eq!(json, "\"openai\"");
        assert_eq!(ProviderKind::OpenAi.to_string(), "openai");
        assert_eq!(
            serde_json::to_string(&ProviderKind::Anthropic).expect("test: serialization"),
            "\"anthropic\""
        );
    }
}
