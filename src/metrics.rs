//! Prometheus metrics for escalation runs.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The recording helpers
//! (`record_attempt`, `record_run`, …) are no-ops if `init_metrics` was never
//! called, so the orchestrator is always safe to run and observability
//! simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `escalation_attempts_total` | Counter | `model`, `disposition` |
//! | `escalation_runs_total` | Counter | `outcome` |
//! | `escalation_spend_cents_total` | IntCounter | `model` |
//! | `escalation_attempt_duration_seconds` | Histogram | `model` |

use crate::task::{AttemptDisposition, RunOutcome};
use crate::OrchestratorError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the orchestrator, stored in a single
/// [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Attempts by model and disposition.
    pub attempts_total: CounterVec,
    /// Finished runs by terminal outcome.
    pub runs_total: CounterVec,
    /// Cents charged per model.
    pub spend_cents_total: IntCounterVec,
    /// Backend call latency per model.
    pub attempt_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let _ = METRICS.set(build_metrics("escalation")?);
    Ok(())
}

/// Build a metrics bundle with every name prefixed by `prefix`.
fn build_metrics(prefix: &str) -> Result<Metrics, OrchestratorError> {
    let registry = Registry::new();

    let attempts_total = CounterVec::new(
        Opts::new(
            format!("{prefix}_attempts_total"),
            "Backend attempts by model and disposition",
        ),
        &["model", "disposition"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(attempts_total.clone()))
        .map_err(register_err)?;

    let runs_total = CounterVec::new(
        Opts::new(format!("{prefix}_runs_total"), "Finished runs by outcome"),
        &["outcome"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(runs_total.clone()))
        .map_err(register_err)?;

    let spend_cents_total = IntCounterVec::new(
        Opts::new(
            format!("{prefix}_spend_cents_total"),
            "Cents charged per model",
        ),
        &["model"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(spend_cents_total.clone()))
        .map_err(register_err)?;

    let attempt_duration = HistogramVec::new(
        HistogramOpts::new(
            format!("{prefix}_attempt_duration_seconds"),
            "Backend call duration per model",
        ),
        &["model"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(attempt_duration.clone()))
        .map_err(register_err)?;

    Ok(Metrics {
        registry,
        attempts_total,
        runs_total,
        spend_cents_total,
        attempt_duration,
    })
}

fn init_err(e: prometheus::Error) -> OrchestratorError {
    OrchestratorError::Other(format!("metrics init failed: {e}"))
}

fn register_err(e: prometheus::Error) -> OrchestratorError {
    OrchestratorError::Other(format!("metrics registration failed: {e}"))
}

/// Return a reference to the initialised [`Metrics`], or `None` if
/// [`init_metrics`] has not been called yet.
fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one attempt and, when it was charged, its spend.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_attempt(model: &str, disposition: AttemptDisposition, cost_cents: u64) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .attempts_total
            .get_metric_with_label_values(&[model, disposition.as_str()])
        {
            c.inc();
        }
        if cost_cents > 0 {
            if let Ok(c) = m.spend_cents_total.get_metric_with_label_values(&[model]) {
                c.inc_by(cost_cents);
            }
        }
    }
}

/// Record how long one backend call took.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_attempt_latency(model: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.attempt_duration.get_metric_with_label_values(&[model]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count one finished run.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_run(outcome: RunOutcome) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.runs_total.get_metric_with_label_values(&[outcome.as_str()]) {
            c.inc();
        }
    }
}

/// Gather all registered metrics as a raw list of metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// A structured snapshot of key counters, for dashboards.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Finished runs keyed by outcome label.
    pub runs_by_outcome: HashMap<String, u64>,
    /// Attempts keyed by `"model:disposition"`.
    pub attempts: HashMap<String, u64>,
    /// Cents keyed by model.
    pub spend_cents: HashMap<String, u64>,
}

/// Return a structured summary of current counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been initialised.
pub fn get_metrics_summary() -> MetricsSummary {
    metrics().map_or_else(MetricsSummary::default, summarize)
}

fn summarize(m: &Metrics) -> MetricsSummary {
    let mut summary = MetricsSummary::default();

    for family in m.runs_total.collect() {
        for metric in family.get_metric() {
            let outcome = label(metric, "outcome");
            let value = metric.get_counter().get_value() as u64;
            summary.runs_by_outcome.insert(outcome.to_string(), value);
        }
    }

    for family in m.attempts_total.collect() {
        for metric in family.get_metric() {
            let key = format!(
                "{}:{}",
                label(metric, "model"),
                label(metric, "disposition")
            );
            let value = metric.get_counter().get_value() as u64;
            summary.attempts.insert(key, value);
        }
    }

    for family in m.spend_cents_total.collect() {
        for metric in family.get_metric() {
            let model = label(metric, "model");
            let value = metric.get_counter().get_value() as u64;
            summary.spend_cents.insert(model.to_string(), value);
        }
    }

    summary
}

fn label<'a>(metric: &'a prometheus::proto::Metric, name: &str) -> &'a str {
    metric
        .get_label()
        .iter()
        .find(|l| l.get_name() == name)
        .map_or("unknown", |l| l.get_value())
}
