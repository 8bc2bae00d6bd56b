//! Demo binary for escalation-orchestrator
//!
//! Parses a booking-confirmation message through the escalation path and
//! prints the result and the spend ledger.
//!
//! ## Environment Variables
//!
//! - `ESCALATOR_CONFIG` — path to a TOML config (default: built-in catalog
//!   with the local echo model enabled)
//! - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` — enable the remote tiers
//! - `LOG_FORMAT=json` — structured JSON output (overrides `observability.log_format`)
//! - `RUST_LOG=info` — log level filter

use std::sync::Arc;

use escalation_orchestrator::config::loader::{load_from_env, CONFIG_PATH_ENV};
use escalation_orchestrator::{
    init_tracing_with_format, metrics, FieldOneOf, FieldPresenceScorer, JsonShape, LogFormat,
    Orchestrator, OutputShape, RequiredFields, TaskPolicy, TaskRequest, LOG_FORMAT_ENV,
};
use tracing::info;

const SYSTEM_PROMPT: &str = "You classify inbound messages. Reply with a JSON object: \
{\"is_confirmation\": bool, \"booking_reference\": string|null, \
\"status\": \"confirmed\"|\"cancelled\"|\"unknown\", \"confidence\": number between 0 and 1}.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;
    if std::env::var(CONFIG_PATH_ENV).is_err() {
        config.echo.enabled = true;
    }
    let log_format = std::env::var(LOG_FORMAT_ENV)
        .map(|v| LogFormat::from_env_value(&v))
        .unwrap_or(config.observability.log_format);

    let _ = init_tracing_with_format(log_format);
    if config.observability.metrics_enabled {
        metrics::init_metrics()?;
    }

    info!("Starting escalation-orchestrator demo");

    let orchestrator = Orchestrator::from_config(&config);
    info!(models = ?orchestrator.registry().available_ids(), "Registry built");

    let scorer = Arc::new(
        FieldPresenceScorer::new()
            .expect_field("is_confirmation", 0.15)
            .expect_field("status", 0.15)
            .expect_field("booking_reference", 0.1)
            .with_self_report("confidence", 0.3),
    );
    let policy = TaskPolicy::builder(
        [
            "echo-local",
            "gpt-4o-mini",
            "claude-3-5-haiku-latest",
            "gpt-4o",
        ],
        scorer,
    )
    .confidence_threshold(config.defaults.confidence_threshold)
    .max_budget_cents(config.defaults.max_budget_cents)
    .validator(Arc::new(JsonShape))
    .validator(Arc::new(RequiredFields::new(["is_confirmation", "status"])))
    .validator(Arc::new(FieldOneOf::new(
        "status",
        ["confirmed", "cancelled", "unknown"],
    )))
    .build()?;

    let messages = [
        (
            "confirmation-parse",
            "Hi! Your table for two at Luca is confirmed for Friday 7pm. Ref LX-4471.",
        ),
        (
            "confirmation-parse",
            r#"{"is_confirmation": true, "booking_reference": "QA-1", "status": "confirmed", "confidence": 0.95}"#,
        ),
    ];

    for (task_id, message) in messages {
        let request = TaskRequest::new(message)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_shape(OutputShape::Structured)
            .with_max_output_tokens(200)
            .with_temperature(0.0);

        let outcome = orchestrator.run_task(task_id, &request, &policy).await?;
        info!(
            success = outcome.success,
            outcome = outcome.outcome.as_str(),
            attempts = outcome.attempts,
            cost_cents = outcome.total_cost_cents,
            "Run finished"
        );
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    println!("\n=== Cost summary (cents) ===");
    let mut summary: Vec<_> = orchestrator.cost_summary().into_iter().collect();
    summary.sort();
    for (task, cents) in summary {
        println!("  {task}: {cents}");
    }
    println!("  total: {}", orchestrator.total_cost());

    if config.observability.metrics_enabled {
        println!("\n=== Metrics ===\n{}", metrics::gather_metrics());
    }

    Ok(())
}
