//! Task request, policy, and result types.
//!
//! A [`TaskRequest`] says *what* to ask; a [`TaskPolicy`] says *who* to ask,
//! in which order, how much may be spent, and how to judge the answers. Both
//! are built per call and dropped after `run_task` returns.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::scoring::Scorer;
use crate::validation::Validator;
use crate::OrchestratorError;

/// Shape of output the caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputShape {
    /// A JSON document; providers that support it are asked for JSON mode.
    Structured,
    /// Plain prose.
    #[default]
    FreeText,
}

/// One generation or classification request.
///
/// # Example
///
/// ```rust
/// use escalation_orchestrator::{OutputShape, TaskRequest};
/// let req = TaskRequest::new("Is this message a booking confirmation?")
///     .with_system_prompt("Answer as JSON.")
///     .with_shape(OutputShape::Structured)
///     .with_max_output_tokens(200);
/// assert_eq!(req.max_output_tokens, 200);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Optional system prompt.
    pub system_prompt: Option<String>,
    /// Required user prompt.
    pub user_prompt: String,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Expected output shape.
    pub shape: OutputShape,
}

impl TaskRequest {
    /// Create a free-text request with default sampling settings.
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: None,
            user_prompt: user_prompt.into(),
            max_output_tokens: 1024,
            temperature: 0.3,
            shape: OutputShape::FreeText,
        }
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Set the maximum number of output tokens.
    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the expected output shape.
    pub fn with_shape(mut self, shape: OutputShape) -> Self {
        self.shape = shape;
        self
    }
}

/// Escalation policy for one run.
///
/// Validators and the scorer are shared strategy objects, so a policy is
/// cheap to clone and can be reused across runs of the same feature.
#[derive(Clone)]
pub struct TaskPolicy {
    /// Model ids, preferred (cheapest) first.
    pub models: Vec<String>,
    /// Minimum confidence for acceptance, in `[0, 1]`.
    pub confidence_threshold: f64,
    /// Maximum cumulative spend for the run, in cents.
    pub max_budget_cents: u64,
    /// Optional cap on attempts; `None` means one per model.
    pub max_attempts: Option<usize>,
    /// Structural checks, run in order without short-circuit.
    pub validators: Vec<Arc<dyn Validator>>,
    /// Trust scorer.
    pub scorer: Arc<dyn Scorer>,
}

impl fmt::Debug for TaskPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPolicy")
            .field("models", &self.models)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("max_budget_cents", &self.max_budget_cents)
            .field("max_attempts", &self.max_attempts)
            .field(
                "validators",
                &self.validators.iter().map(|v| v.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl TaskPolicy {
    /// Start building a policy over `models` scored by `scorer`.
    ///
    /// Defaults: threshold 0.7, budget 50¢, one attempt per model, no
    /// validators.
    pub fn builder<I, S>(models: I, scorer: Arc<dyn Scorer>) -> TaskPolicyBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TaskPolicyBuilder {
            policy: TaskPolicy {
                models: models.into_iter().map(Into::into).collect(),
                confidence_threshold: 0.7,
                max_budget_cents: 50,
                max_attempts: None,
                validators: Vec::new(),
                scorer,
            },
        }
    }

    /// Check the policy for programmer errors.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidPolicy`] when the model list is
    /// empty or names a model twice, the threshold is outside `[0, 1]`, or
    /// `max_attempts` is zero.
    pub fn check(&self) -> Result<(), OrchestratorError> {
        if self.models.is_empty() {
            return Err(OrchestratorError::InvalidPolicy(
                "model list is empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for id in &self.models {
            if !seen.insert(id.as_str()) {
                return Err(OrchestratorError::InvalidPolicy(format!(
                    "model '{id}' listed more than once"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(OrchestratorError::InvalidPolicy(format!(
                "confidence threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(OrchestratorError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`TaskPolicy`].
pub struct TaskPolicyBuilder {
    policy: TaskPolicy,
}

impl TaskPolicyBuilder {
    /// Set the confidence threshold.
    pub fn confidence_threshold(mut self, threshold: f64) -> Self {
        self.policy.confidence_threshold = threshold;
        self
    }

    /// Set the run budget in cents.
    pub fn max_budget_cents(mut self, cents: u64) -> Self {
        self.policy.max_budget_cents = cents;
        self
    }

    /// Limit the number of attempts.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.policy.max_attempts = Some(attempts);
        self
    }

    /// Append a validator.
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.policy.validators.push(validator);
        self
    }

    /// Finish, checking for programmer errors.
    ///
    /// # Errors
    ///
    /// See [`TaskPolicy::check`].
    pub fn build(self) -> Result<TaskPolicy, OrchestratorError> {
        self.policy.check()?;
        Ok(self.policy)
    }
}

/// Outcome of one attempt against one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptResult {
    /// Raw model output.
    pub content: String,
    /// Model that produced it.
    pub model_id: String,
    /// Billed input tokens.
    pub input_tokens: u64,
    /// Billed output tokens.
    pub output_tokens: u64,
    /// Cost in cents, rounded up.
    pub cost_cents: u64,
    /// Zero-based position in the escalation path.
    pub attempt_index: usize,
    /// Scorer output; `0.0` until scored.
    pub confidence: f64,
    /// Validator messages; empty means valid.
    pub validation_errors: Vec<String>,
}

impl AttemptResult {
    /// Return `true` if every validator passed.
    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptDisposition {
    /// Valid and confident; the run stops here.
    Accepted,
    /// Backend call failed; no cost charged.
    TransportFailure,
    /// Validators rejected the content.
    ValidationFailure,
    /// Valid, but scored below the threshold.
    LowConfidence,
    /// This attempt pushed the run over its budget.
    BudgetExceeded,
}

impl AttemptDisposition {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::TransportFailure => "transport_failure",
            Self::ValidationFailure => "validation_failure",
            Self::LowConfidence => "low_confidence",
            Self::BudgetExceeded => "budget_exceeded",
        }
    }
}

/// One line of the per-run attempt trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptSummary {
    /// Model tried.
    pub model_id: String,
    /// Zero-based attempt index.
    pub attempt_index: usize,
    /// How it ended.
    pub disposition: AttemptDisposition,
    /// Cents charged for this attempt.
    pub cost_cents: u64,
    /// Score, when the attempt got far enough to be scored.
    pub confidence: Option<f64>,
    /// Transport error or joined validator messages.
    pub detail: Option<String>,
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// An attempt was accepted.
    Accepted,
    /// No model in the policy has a credentialed provider.
    ProviderUnavailable,
    /// The last permitted attempt failed in transport.
    HardFailure,
    /// Cumulative cost went over the cap.
    BudgetExceeded,
    /// Every permitted model was tried without acceptance.
    Exhausted,
}

impl RunOutcome {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::HardFailure => "hard_failure",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Everything a caller learns from one `run_task` call.
///
/// `success == false` means "no usable result"; the caller applies its own
/// fallback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestrationResult {
    /// Correlation id for this run's log lines.
    pub run_id: String,
    /// `true` iff an attempt was accepted.
    pub success: bool,
    /// Terminal state.
    pub outcome: RunOutcome,
    /// The accepted attempt.
    pub result: Option<AttemptResult>,
    /// Cents spent across all attempts of this run.
    pub total_cost_cents: u64,
    /// Number of attempts made (equals `escalation_path.len()`).
    pub attempts: usize,
    /// Model ids actually tried, in order.
    pub escalation_path: Vec<String>,
    /// Per-attempt trail.
    pub attempt_log: Vec<AttemptSummary>,
    /// Terminal error message when unsuccessful.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::FixedScorer;
    use crate::validation::MinLength;

    fn scorer() -> Arc<dyn Scorer> {
        Arc::new(FixedScorer::new(0.9))
    }

    #[test]
    fn test_task_request_defaults_to_free_text() {
        let req = TaskRequest::new("hello");
        assert_eq!(req.shape, OutputShape::FreeText);
        assert!(req.system_prompt.is_none());
        assert_eq!(req.user_prompt, "hello");
    }

    #[test]
    fn test_builder_applies_every_setting() {
        let policy = TaskPolicy::builder(["a", "b"], scorer())
            .confidence_threshold(0.8)
            .max_budget_cents(30)
            .max_attempts(1)
            .validator(Arc::new(MinLength::new(3)))
            .build()
            .expect("test: valid policy");
        assert_eq!(policy.models, vec!["a", "b"]);
        assert_eq!(policy.max_budget_cents, 30);
        assert_eq!(policy.max_attempts, Some(1));
        assert_eq!(policy.validators.len(), 1);
    }

    #[test]
    fn test_empty_model_list_is_invalid_policy() {
        let result = TaskPolicy::builder(Vec::<String>::new(), scorer()).build();
        assert!(matches!(result, Err(OrchestratorError::InvalidPolicy(_))));
    }

    #[test]
    fn test_duplicate_model_id_is_invalid_policy() {
        let result = TaskPolicy::builder(["m1", "m1", "m2"], scorer()).build();
        match result {
            Err(OrchestratorError::InvalidPolicy(msg)) => assert!(msg.contains("'m1'")),
            other => panic!("expected InvalidPolicy, got {other:?}"),
        }
    }

    #[test]
    fn test_threshold_outside_unit_range_is_invalid() {
        let result = TaskPolicy::builder(["a"], scorer())
            .confidence_threshold(1.5)
            .build();
        assert!(matches!(result, Err(OrchestratorError::InvalidPolicy(_))));
    }

    #[test]
    fn test_zero_max_attempts_is_invalid() {
        let result = TaskPolicy::builder(["a"], scorer()).max_attempts(0).build();
        assert!(matches!(result, Err(OrchestratorError::InvalidPolicy(_))));
    }

    #[test]
    fn test_policy_debug_lists_validator_names() {
        let policy = TaskPolicy::builder(["a"], scorer())
            .validator(Arc::new(MinLength::new(3)))
            .build()
            .expect("test: valid policy");
        let debug = format!("{policy:?}");
        assert!(debug.contains("min_length"));
    }

    #[test]
    fn test_outcome_labels_are_snake_case() {
        let json = serde_json::to_string(&RunOutcome::BudgetExceeded).expect("test: serialize");
        assert_eq!(json, "\"budget_exceeded\"");
        assert_eq!(RunOutcome::BudgetExceeded.as_str(), "budget_exceeded");
        assert_eq!(AttemptDisposition::LowConfidence.as_str(), "low_confidence");
    }
}
