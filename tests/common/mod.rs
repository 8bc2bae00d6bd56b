//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use escalation_orchestrator::{
    BackendReply, BudgetLedger, ModelDescriptor, ModelInvoker, ModelRegistry, Orchestrator,
    OrchestratorError, ProviderKind, TaskRequest,
};

/// Canned behaviour for one model.
#[derive(Debug, Clone)]
pub enum Step {
    Reply { content: String, cost_cents: u64 },
    Fail(String),
}

/// Invoker that replays a fixed script per model id and records call order.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    script: HashMap<String, Step>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, model: &str, content: &str, cost_cents: u64) -> Self {
        self.script.insert(
            model.to_string(),
            Step::Reply {
                content: content.to_string(),
                cost_cents,
            },
        );
        self
    }

    pub fn fail(mut self, model: &str, message: &str) -> Self {
        self.script
            .insert(model.to_string(), Step::Fail(message.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Model ids in the order they were invoked.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("test: calls lock").clone()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        model: &ModelDescriptor,
        _request: &TaskRequest,
    ) -> Result<BackendReply, OrchestratorError> {
        self.calls
            .lock()
            .expect("test: calls lock")
            .push(model.id().to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.script.get(model.id()) {
            Some(Step::Reply {
                content,
                cost_cents,
            }) => Ok(BackendReply {
                content: content.clone(),
                input_tokens: 100,
                output_tokens: 50,
                cost_cents: *cost_cents,
            }),
            Some(Step::Fail(msg)) => Err(OrchestratorError::Transport(msg.clone())),
            None => Err(OrchestratorError::Transport(format!(
                "no script for {}",
                model.id()
            ))),
        }
    }
}

/// Registry with every id served by a credentialed provider.
pub fn registry(ids: &[&str]) -> ModelRegistry {
    ModelRegistry::new(
        ids.iter()
            .map(|id| ModelDescriptor::new(*id, ProviderKind::OpenAi, 1.0, 2.0)),
    )
}

pub fn orchestrator(ids: &[&str], invoker: Arc<ScriptedInvoker>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(registry(ids)),
        invoker,
        Arc::new(BudgetLedger::new()),
    )
}
