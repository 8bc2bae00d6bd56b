//! # Stage: Escalation Controller
//!
//! ## Responsibility
//! Drive one task through its policy's model list, one backend call at a
//! time, until an attempt is accepted or the run terminates.
//!
//! ```text
//! Pending ─► Attempting(i) ─┬─► Accepted
//!                ▲          ├─► BudgetExceeded
//!                │          ├─► HardFailure
//!                └─ Escalating ◄┤
//!                           └─► Exhausted
//! ```
//!
//! ## Guarantees
//! - Sequential: exactly one backend call in flight per run.
//! - Caller order: models are tried in the order the policy lists them.
//! - Budget before acceptance: a run is never reported successful once its
//!   cumulative cost exceeds the cap.
//! - Every charged cent is added to the shared ledger under the task id.
//! - Expected escalation events never surface as `Err`.
//!
//! ## NOT Responsible For
//! - Retrying a model (escalation to the next model is the only retry)
//! - Substituting a fallback answer (callers own that)

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::ledger::BudgetLedger;
use crate::metrics;
use crate::registry::{ModelDescriptor, ModelRegistry};
use crate::scoring::clamp_score;
use crate::task::{
    AttemptDisposition, AttemptResult, AttemptSummary, OrchestrationResult, RunOutcome,
    TaskPolicy, TaskRequest,
};
use crate::validation::ValidatorPipeline;
use crate::worker::{ModelInvoker, ProviderInvoker};
use crate::OrchestratorError;

/// Shared escalation service.
///
/// Construct once at startup and hand out clones; every clone shares the
/// same registry, invoker, and ledger.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use escalation_orchestrator::config::OrchestratorConfig;
/// use escalation_orchestrator::{FixedScorer, Orchestrator, TaskPolicy, TaskRequest};
///
/// # async fn demo() -> Result<(), escalation_orchestrator::OrchestratorError> {
/// let orchestrator = Orchestrator::from_config(&OrchestratorConfig::default());
/// let policy = TaskPolicy::builder(["gpt-4o-mini", "gpt-4o"], Arc::new(FixedScorer::new(0.9)))
///     .max_budget_cents(20)
///     .build()?;
/// let outcome = orchestrator
///     .run_task("email-reply", &TaskRequest::new("Draft a reply"), &policy)
///     .await?;
/// println!("success={} cost={}¢", outcome.success, outcome.total_cost_cents);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<ModelRegistry>,
    invoker: Arc<dyn ModelInvoker>,
    ledger: Arc<BudgetLedger>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("models", &self.registry.available_ids())
            .field("ledger_total_cents", &self.ledger.grand_total())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Assemble an orchestrator from its parts.
    pub fn new(
        registry: Arc<ModelRegistry>,
        invoker: Arc<dyn ModelInvoker>,
        ledger: Arc<BudgetLedger>,
    ) -> Self {
        Self {
            registry,
            invoker,
            ledger,
        }
    }

    /// Build provider bindings from the environment and register only the
    /// catalog models whose provider ended up credentialed.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let invoker = ProviderInvoker::from_config(config);
        let registry =
            ModelRegistry::from_catalog(config.catalog(), |kind| invoker.has_credentials(kind));

        info!(
            target: "escalation::startup",
            models = ?registry.available_ids(),
            "orchestrator ready"
        );

        Self::new(
            Arc::new(registry),
            Arc::new(invoker),
            Arc::new(BudgetLedger::new()),
        )
    }

    /// Run `request` through `policy`'s escalation path.
    ///
    /// # Returns
    ///
    /// An [`OrchestrationResult`] for every run, successful or not. Inspect
    /// `success` / `outcome`; `false` means no usable result.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidPolicy`] only for programmer
    /// errors in `policy` (see [`TaskPolicy::check`]).
    #[tracing::instrument(
        target = "escalation::run",
        skip(self, request, policy),
        fields(run_id = tracing::field::Empty)
    )]
    pub async fn run_task(
        &self,
        task_id: &str,
        request: &TaskRequest,
        policy: &TaskPolicy,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        policy.check()?;

        let mut run = RunState::new(Uuid::new_v4().to_string());
        tracing::Span::current().record("run_id", run.run_id.as_str());

        let available: Vec<&ModelDescriptor> = policy
            .models
            .iter()
            .filter_map(|id| match self.registry.resolve(id) {
                Ok(model) => Some(model),
                Err(_) => {
                    debug!(target: "escalation::run", model = %id, "model unavailable, skipped");
                    None
                }
            })
            .collect();

        if available.is_empty() {
            warn!(
                target: "escalation::run",
                requested = ?policy.models,
                "no models available for task"
            );
            return Ok(run.finish(
                RunOutcome::ProviderUnavailable,
                None,
                Some(format!(
                    "no models available: none of {:?} has a credentialed provider",
                    policy.models
                )),
            ));
        }

        let limit = policy
            .max_attempts
            .map_or(available.len(), |cap| cap.min(available.len()));
        let pipeline = ValidatorPipeline::new(policy.validators.clone());

        for (index, model) in available.into_iter().take(limit).enumerate() {
            run.path.push(model.id().to_string());

            let started = Instant::now();
            let reply = self.invoker.invoke(model, request).await;
            metrics::record_attempt_latency(model.id(), started.elapsed());

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(
                        target: "escalation::run",
                        model = model.id(),
                        attempt = index,
                        error = %e,
                        "attempt failed in transport"
                    );
                    run.log(
                        model.id(),
                        index,
                        AttemptDisposition::TransportFailure,
                        0,
                        None,
                        Some(e.to_string()),
                    );

                    if index + 1 == limit {
                        return Ok(run.finish(
                            RunOutcome::HardFailure,
                            None,
                            Some(format!("last permitted model {} failed: {e}", model.id())),
                        ));
                    }
                    continue;
                }
            };

            run.total_cost_cents = run.total_cost_cents.saturating_add(reply.cost_cents);
            self.ledger.add_cost(task_id, reply.cost_cents);

            let mut attempt = AttemptResult {
                content: reply.content,
                model_id: model.id().to_string(),
                input_tokens: reply.input_tokens,
                output_tokens: reply.output_tokens,
                cost_cents: reply.cost_cents,
                attempt_index: index,
                confidence: 0.0,
                validation_errors: Vec::new(),
            };

            if run.total_cost_cents > policy.max_budget_cents {
                warn!(
                    target: "escalation::run",
                    model = model.id(),
                    attempt = index,
                    spent_cents = run.total_cost_cents,
                    cap_cents = policy.max_budget_cents,
                    "budget exceeded"
                );
                run.log(
                    model.id(),
                    index,
                    AttemptDisposition::BudgetExceeded,
                    attempt.cost_cents,
                    None,
                    None,
                );
                let cap = policy.max_budget_cents;
                let spent = run.total_cost_cents;
                return Ok(run.finish(
                    RunOutcome::BudgetExceeded,
                    None,
                    Some(format!("budget exceeded: spent {spent}¢ of {cap}¢ cap")),
                ));
            }

            attempt.validation_errors = pipeline.run(&attempt).errors;
            attempt.confidence = clamp_score(policy.scorer.score(&attempt, request));

            let disposition = if !attempt.is_valid() {
                AttemptDisposition::ValidationFailure
            } else if attempt.confidence < policy.confidence_threshold {
                AttemptDisposition::LowConfidence
            } else {
                AttemptDisposition::Accepted
            };

            debug!(
                target: "escalation::run",
                model = model.id(),
                attempt = index,
                cost_cents = attempt.cost_cents,
                confidence = attempt.confidence,
                disposition = disposition.as_str(),
                "attempt scored"
            );

            let detail = (!attempt.validation_errors.is_empty())
                .then(|| attempt.validation_errors.join("; "));
            run.log(
                model.id(),
                index,
                disposition,
                attempt.cost_cents,
                Some(attempt.confidence),
                detail,
            );

            if disposition == AttemptDisposition::Accepted {
                return Ok(run.finish(RunOutcome::Accepted, Some(attempt), None));
            }
        }

        let tried = run.path.len();
        Ok(run.finish(
            RunOutcome::Exhausted,
            None,
            Some(format!(
                "exhausted: {tried} permitted model(s) tried without an acceptable result"
            )),
        ))
    }

    /// Cumulative cents per task id since start (or the last reset).
    pub fn cost_summary(&self) -> HashMap<String, u64> {
        self.ledger.summary()
    }

    /// Cumulative cents across every task.
    pub fn total_cost(&self) -> u64 {
        self.ledger.grand_total()
    }

    /// Clear all spend tracking. Administrative only.
    pub fn reset_tracking(&self) {
        self.ledger.reset();
    }

    /// The registry this orchestrator resolves models against.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// The shared spend ledger.
    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }
}

/// Accumulator for one run.
struct RunState {
    run_id: String,
    total_cost_cents: u64,
    path: Vec<String>,
    attempt_log: Vec<AttemptSummary>,
}

impl RunState {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            total_cost_cents: 0,
            path: Vec::new(),
            attempt_log: Vec::new(),
        }
    }

    fn log(
        &mut self,
        model_id: &str,
        attempt_index: usize,
        disposition: AttemptDisposition,
        cost_cents: u64,
        confidence: Option<f64>,
        detail: Option<String>,
    ) {
        metrics::record_attempt(model_id, disposition, cost_cents);
        self.attempt_log.push(AttemptSummary {
            model_id: model_id.to_string(),
            attempt_index,
            disposition,
            cost_cents,
            confidence,
            detail,
        });
    }

    fn finish(
        self,
        outcome: RunOutcome,
        result: Option<AttemptResult>,
        error: Option<String>,
    ) -> OrchestrationResult {
        metrics::record_run(outcome);

        let success = outcome == RunOutcome::Accepted;
        if success {
            info!(
                target: "escalation::run",
                attempts = self.path.len(),
                total_cost_cents = self.total_cost_cents,
                "run accepted"
            );
        } else {
            warn!(
                target: "escalation::run",
                outcome = outcome.as_str(),
                attempts = self.path.len(),
                total_cost_cents = self.total_cost_cents,
                "run finished without an acceptable result"
            );
        }

        OrchestrationResult {
            run_id: self.run_id,
            success,
            outcome,
            result,
            total_cost_cents: self.total_cost_cents,
            attempts: self.path.len(),
            escalation_path: self.path,
            attempt_log: self.attempt_log,
            error,
        }
    }
}
