//! Escalation controller benchmarks.
//!
//! The echo provider is the floor: pure controller overhead (filtering,
//! validation, scoring, ledger update) with zero backend latency.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

use escalation_orchestrator::worker::EchoBinding;
use escalation_orchestrator::{
    BudgetLedger, FieldPresenceScorer, JsonShape, ModelDescriptor, ModelRegistry, Orchestrator,
    ProviderBinding, ProviderInvoker, ProviderKind, RequiredFields, TaskPolicy, TaskRequest,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn echo_orchestrator(models: &[String]) -> Orchestrator {
    let registry = ModelRegistry::new(
        models
            .iter()
            .map(|id| ModelDescriptor::new(id.clone(), ProviderKind::Echo, 0.15, 0.60)),
    );
    let invoker =
        ProviderInvoker::new().with_binding(ProviderBinding::Echo(EchoBinding::with_delay(0)));
    Orchestrator::new(
        Arc::new(registry),
        Arc::new(invoker),
        Arc::new(BudgetLedger::new()),
    )
}

fn structured_policy(models: &[String]) -> TaskPolicy {
    let scorer = Arc::new(
        FieldPresenceScorer::new()
            .expect_field("status", 0.2)
            .with_self_report("confidence", 0.3),
    );
    TaskPolicy::builder(models.iter().cloned(), scorer)
        .max_budget_cents(1_000)
        .validator(Arc::new(JsonShape))
        .validator(Arc::new(RequiredFields::new(["status"])))
        .build()
        .expect("bench: valid policy")
}

fn model_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("echo-{i}")).collect()
}

// ---------------------------------------------------------------------------
// Bench: accepted on first attempt
// ---------------------------------------------------------------------------

fn bench_run_task_first_attempt_accepted(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let models = model_ids(3);
    let orch = echo_orchestrator(&models);
    let policy = structured_policy(&models);
    let request = TaskRequest::new(r#"{"status": "confirmed", "confidence": 0.9}"#);

    c.bench_function("run_task_first_attempt_accepted", |b| {
        b.to_async(&rt).iter(|| async {
            let out = orch.run_task("bench", black_box(&request), &policy).await;
            let _ = black_box(out);
        })
    });
}

// ---------------------------------------------------------------------------
// Bench: full escalation path to exhaustion
// ---------------------------------------------------------------------------

fn bench_run_task_exhaustion_by_path_length(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("run_task_exhaustion");
    group.sample_size(30);

    for len in [1usize, 4, 16] {
        let models = model_ids(len);
        let orch = echo_orchestrator(&models);
        let policy = structured_policy(&models);
        let request = TaskRequest::new("plain prose that never validates");

        group.bench_with_input(BenchmarkId::new("models", len), &len, |b, _| {
            b.to_async(&rt).iter(|| async {
                let out = orch.run_task("bench", &request, &policy).await;
                let _ = black_box(out);
            })
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Bench: cost model
// ---------------------------------------------------------------------------

fn bench_cost(c: &mut Criterion) {
    let model = ModelDescriptor::new("m", ProviderKind::Anthropic, 3.0, 15.0);
    c.bench_function("model_cost", |b| {
        b.iter(|| model.cost(black_box(12_345), black_box(6_789)))
    });
}

criterion_group!(
    benches,
    bench_run_task_first_attempt_accepted,
    bench_run_task_exhaustion_by_path_length,
    bench_cost
);
criterion_main!(benches);
