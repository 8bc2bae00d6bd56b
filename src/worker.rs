//! Model invocation seam and provider bindings
//!
//! Provides the [`ModelInvoker`] trait the escalation loop calls, and the
//! production implementation [`ProviderInvoker`], which dispatches to one
//! binding per provider family:
//! - [`OpenAiBinding`]: OpenAI chat completions
//! - [`AnthropicBinding`]: Anthropic messages
//! - [`EchoBinding`]: in-process echo for smoke tests
//!
//! Every binding normalises its provider's payload into a [`BackendReply`]
//! with content and token counts. Failures of any kind (network, non-2xx,
//! malformed body) surface as [`OrchestratorError::Transport`].
//!
//! ## Environment Variables
//!
//! - `OPENAI_API_KEY`: default credential source for OpenAI
//! - `ANTHROPIC_API_KEY`: default credential source for Anthropic
//!
//! Both names can be overridden per provider in the config file.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::registry::{ModelDescriptor, ProviderKind};
use crate::task::{OutputShape, TaskRequest};
use crate::OrchestratorError;

/// Default credential variable for OpenAI.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Default credential variable for Anthropic.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Normalised reply from one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    /// Generated text.
    pub content: String,
    /// Billed (or estimated) input tokens.
    pub input_tokens: u64,
    /// Billed (or estimated) output tokens.
    pub output_tokens: u64,
    /// Cost of the call in cents, rounded up.
    pub cost_cents: u64,
}

/// Trait for invoking a model on behalf of the escalation loop.
///
/// Implementations must be thread-safe (Send + Sync) so one invoker can be
/// shared by every concurrent run. The trait is object-safe to allow dynamic
/// dispatch via `Arc<dyn ModelInvoker>`.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Run `request` against `model`.
    ///
    /// # Errors
    ///
    /// Returns a transport-class error ([`OrchestratorError::is_transport`])
    /// when the call fails; the caller escalates on it.
    async fn invoke(
        &self,
        model: &ModelDescriptor,
        request: &TaskRequest,
    ) -> Result<BackendReply, OrchestratorError>;
}

/// Raw completion before pricing is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Completion {
    content: String,
    input_tokens: u64,
    output_tokens: u64,
}

// ============================================================================
// Echo Binding (Testing)
// ============================================================================

/// Echo binding for smoke tests
///
/// Returns the user prompt unchanged. Token counts are word counts, so runs
/// are deterministic and need no network.
#[derive(Debug, Clone, Default)]
pub struct EchoBinding {
    /// Simulated call latency
    pub delay_ms: u64,
}

impl EchoBinding {
    /// Echo with no latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo that sleeps `delay_ms` before answering.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self { delay_ms }
    }

    async fn complete(&self, request: &TaskRequest) -> Result<Completion, OrchestratorError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        let prompt_words = request
            .system_prompt
            .as_deref()
            .map_or(0, |s| s.split_whitespace().count())
            + request.user_prompt.split_whitespace().count();

        Ok(Completion {
            content: request.user_prompt.clone(),
            input_tokens: prompt_words as u64,
            output_tokens: request.user_prompt.split_whitespace().count() as u64,
        })
    }
}

// ============================================================================
// OpenAI Binding
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// OpenAI chat completions request payload
#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

/// OpenAI chat completions response
#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// OpenAI chat completions binding
///
/// ## Example
///
/// ```no_run
/// use escalation_orchestrator::worker::OpenAiBinding;
/// use std::time::Duration;
///
/// let binding = OpenAiBinding::new("sk-...")?
///     .with_base_url("http://localhost:8080/v1")
///     .with_timeout(Duration::from_secs(10));
/// # Ok::<(), escalation_orchestrator::OrchestratorError>(())
/// ```
#[derive(Clone)]
pub struct OpenAiBinding {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl fmt::Debug for OpenAiBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiBinding")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OpenAiBinding {
    /// Create a binding with the given key.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] if the key is blank.
    pub fn new(api_key: impl Into<String>) -> Result<Self, OrchestratorError> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: non_blank_key(api_key.into(), "OpenAI")?,
            base_url: OPENAI_BASE_URL.to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        })
    }

    /// Point at a different API root (proxy, mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = trim_base(base_url.into());
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn complete(
        &self,
        model: &str,
        request: &TaskRequest,
    ) -> Result<Completion, OrchestratorError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user_prompt,
        });

        let body = OpenAiRequest {
            model,
            messages,
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
            response_format: (request.shape == OutputShape::Structured).then_some(
                ResponseFormat {
                    kind: "json_object",
                },
            ),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestratorError::Transport(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Transport(format!(
                "OpenAI API error {status}: {error_text}"
            )));
        }

        let api_response: OpenAiResponse = response.json().await.map_err(|e| {
            OrchestratorError::Transport(format!("Failed to parse OpenAI response: {e}"))
        })?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| {
                OrchestratorError::Transport("No choices in OpenAI response".to_string())
            })?
            .message
            .content
            .unwrap_or_default();

        let (input_tokens, output_tokens) = match api_response.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => (estimate_prompt_tokens(request), estimate_tokens(&content)),
        };

        Ok(Completion {
            content,
            input_tokens,
            output_tokens,
        })
    }
}

// ============================================================================
// Anthropic Binding
// ============================================================================

/// Anthropic messages request payload
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
}

/// Anthropic messages response
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Anthropic messages binding
///
/// ## Example
///
/// ```no_run
/// use escalation_orchestrator::worker::AnthropicBinding;
///
/// let binding = AnthropicBinding::new("sk-ant-...")?;
/// # Ok::<(), escalation_orchestrator::OrchestratorError>(())
/// ```
#[derive(Clone)]
pub struct AnthropicBinding {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl fmt::Debug for AnthropicBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicBinding")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AnthropicBinding {
    /// Create a binding with the given key.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] if the key is blank.
    pub fn new(api_key: impl Into<String>) -> Result<Self, OrchestratorError> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: non_blank_key(api_key.into(), "Anthropic")?,
            base_url: ANTHROPIC_BASE_URL.to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        })
    }

    /// Point at a different API root (proxy, mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = trim_base(base_url.into());
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn complete(
        &self,
        model: &str,
        request: &TaskRequest,
    ) -> Result<Completion, OrchestratorError> {
        let body = AnthropicRequest {
            model,
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
            system: request.system_prompt.as_deref(),
            messages: vec![ChatMessage {
                role: "user",
                content: &request.user_prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestratorError::Transport(format!("Anthropic request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Transport(format!(
                "Anthropic API error {status}: {error_text}"
            )));
        }

        let api_response: AnthropicResponse = response.json().await.map_err(|e| {
            OrchestratorError::Transport(format!("Failed to parse Anthropic response: {e}"))
        })?;

        let content: String = api_response
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");

        let (input_tokens, output_tokens) = match api_response.usage {
            Some(u) => (u.input_tokens, u.output_tokens),
            None => (estimate_prompt_tokens(request), estimate_tokens(&content)),
        };

        Ok(Completion {
            content,
            input_tokens,
            output_tokens,
        })
    }
}

// ============================================================================
// Provider dispatch
// ============================================================================

/// One configured provider.
#[derive(Debug, Clone)]
pub enum ProviderBinding {
    /// OpenAI chat completions.
    OpenAi(OpenAiBinding),
    /// Anthropic messages.
    Anthropic(AnthropicBinding),
    /// Local echo.
    Echo(EchoBinding),
}

impl ProviderBinding {
    /// Provider family this binding serves.
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::OpenAi(_) => ProviderKind::OpenAi,
            Self::Anthropic(_) => ProviderKind::Anthropic,
            Self::Echo(_) => ProviderKind::Echo,
        }
    }

    async fn complete(
        &self,
        model: &str,
        request: &TaskRequest,
    ) -> Result<Completion, OrchestratorError> {
        match self {
            Self::OpenAi(b) => b.complete(model, request).await,
            Self::Anthropic(b) => b.complete(model, request).await,
            Self::Echo(b) => b.complete(request).await,
        }
    }
}

/// Production [`ModelInvoker`]: routes each call to the binding for the
/// model's provider, enforces the per-attempt timeout, and prices the reply.
///
/// ## Example
///
/// ```rust
/// use escalation_orchestrator::worker::{EchoBinding, ProviderBinding, ProviderInvoker};
/// use escalation_orchestrator::ProviderKind;
///
/// let invoker = ProviderInvoker::new().with_binding(ProviderBinding::Echo(EchoBinding::new()));
/// assert!(invoker.has_credentials(ProviderKind::Echo));
/// assert!(!invoker.has_credentials(ProviderKind::OpenAi));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProviderInvoker {
    bindings: HashMap<ProviderKind, ProviderBinding>,
    attempt_timeout: Option<Duration>,
}

impl ProviderInvoker {
    /// An invoker with no providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the binding for its provider.
    pub fn with_binding(mut self, binding: ProviderBinding) -> Self {
        self.bindings.insert(binding.kind(), binding);
        self
    }

    /// Abort any single call that runs longer than `timeout`.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Return `true` if a binding exists for `kind`.
    pub fn has_credentials(&self, kind: ProviderKind) -> bool {
        self.bindings.contains_key(&kind)
    }

    /// Build bindings from config, reading API keys from the environment.
    ///
    /// A provider with a missing or blank key is left unbound (and its
    /// models will therefore be excluded from the registry). Never fails.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let mut invoker = Self::new();
        invoker.attempt_timeout = config.attempt_timeout();

        let openai = &config.providers.openai;
        if openai.enabled {
            let var = openai.api_key_env_or(OPENAI_API_KEY_ENV);
            match read_key(var).map(OpenAiBinding::new) {
                Some(Ok(binding)) => {
                    let mut binding = binding.with_timeout(openai.timeout());
                    if let Some(url) = &openai.base_url {
                        binding = binding.with_base_url(url.clone());
                    }
                    invoker = invoker.with_binding(ProviderBinding::OpenAi(binding));
                }
                _ => tracing::info!(env = var, "OpenAI credentials not set; provider disabled"),
            }
        }

        let anthropic = &config.providers.anthropic;
        if anthropic.enabled {
            let var = anthropic.api_key_env_or(ANTHROPIC_API_KEY_ENV);
            match read_key(var).map(AnthropicBinding::new) {
                Some(Ok(binding)) => {
                    let mut binding = binding.with_timeout(anthropic.timeout());
                    if let Some(url) = &anthropic.base_url {
                        binding = binding.with_base_url(url.clone());
                    }
                    invoker = invoker.with_binding(ProviderBinding::Anthropic(binding));
                }
                _ => {
                    tracing::info!(env = var, "Anthropic credentials not set; provider disabled")
                }
            }
        }

        if config.echo.enabled {
            invoker = invoker.with_binding(ProviderBinding::Echo(EchoBinding::with_delay(
                config.echo.delay_ms,
            )));
        }

        invoker
    }
}

#[async_trait]
impl ModelInvoker for ProviderInvoker {
    async fn invoke(
        &self,
        model: &ModelDescriptor,
        request: &TaskRequest,
    ) -> Result<BackendReply, OrchestratorError> {
        let binding = self.bindings.get(&model.provider()).ok_or_else(|| {
            OrchestratorError::Transport(format!(
                "no binding for provider {} (model {})",
                model.provider(),
                model.id()
            ))
        })?;

        let start = Instant::now();
        let call = binding.complete(model.id(), request);
        let completion = match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                OrchestratorError::Timeout {
                    model: model.id().to_string(),
                    after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }
            })??,
            None => call.await?,
        };

        tracing::debug!(
            model = model.id(),
            provider = %model.provider(),
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "backend call completed"
        );

        Ok(BackendReply {
            cost_cents: model.cost(completion.input_tokens, completion.output_tokens),
            content: completion.content,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
        })
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

fn read_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|k| !k.trim().is_empty())
}

fn non_blank_key(key: String, provider: &str) -> Result<String, OrchestratorError> {
    if key.trim().is_empty() {
        return Err(OrchestratorError::ConfigError(format!(
            "{provider} API key is empty"
        )));
    }
    Ok(key)
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Rough token estimate for providers that omit usage: one token per four
/// characters, rounded up.
fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

fn estimate_prompt_tokens(request: &TaskRequest) -> u64 {
    request.system_prompt.as_deref().map_or(0, estimate_tokens) + estimate_tokens(&request.user_prompt)
}
