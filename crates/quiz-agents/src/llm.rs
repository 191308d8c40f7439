//! Language-model capability: `complete(prompt, context) -> text`.
//!
//! Strategy selection and answer synthesis depend only on [`LanguageModel`].
//! [`OpenAiCompatModel`] is the production backend: a Rig completions client
//! pointed at any OpenAI-compatible endpoint, with a per-request timeout and
//! exponential back-off on transient HTTP failures.
//!
//! That back-off belongs to the backend, not to the solving pipeline. Once
//! `complete` returns an error, the selector and synthesizer surface it as
//! `LLM_UNAVAILABLE` without calling the model again.

use std::time::Duration;

use async_trait::async_trait;
use rig::agent::Agent;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmConfig;

type OaiAgent = Agent<openai::completion::CompletionModel>;

#[derive(Debug, Error)]
pub enum LlmError {
    /// The client could not be constructed (bad URL, missing key).
    #[error("failed to build model client: {0}")]
    Client(String),

    /// The request reached the backend (or tried to) and failed.
    #[error("model request failed: {0}")]
    Request(String),

    /// No response within the configured budget.
    #[error("model request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The backend answered with nothing.
    #[error("model returned an empty response")]
    Empty,
}

impl LlmError {
    /// Whether repeating the identical request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Empty => true,
            Self::Request(msg) => is_transient_error(msg),
            Self::Client(_) => false,
        }
    }
}

/// Opaque text-completion capability.
///
/// `context` is the system-level instruction for the call; `prompt` is the
/// user turn. Output structure is best-effort only.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, LlmError>;
}

/// OpenAI-compatible chat completions backend.
pub struct OpenAiCompatModel {
    client: openai::CompletionsClient,
    model: String,
    temperature: f64,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAiCompatModel {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = openai::CompletionsClient::builder()
            .api_key(&config.api_key)
            .base_url(&config.base_url)
            .build()
            .map_err(|e| LlmError::Client(e.to_string()))?;

        Ok(Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: config.request_timeout(),
            max_retries: config.max_retries,
        })
    }

    fn agent(&self, context: &str) -> OaiAgent {
        self.client
            .agent(&self.model)
            .preamble(context)
            .temperature(self.temperature)
            .build()
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatModel {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, LlmError> {
        let agent = self.agent(context);
        debug!(
            model = %self.model,
            prompt_chars = prompt.len(),
            context_chars = context.len(),
            "model request"
        );

        let mut attempt = 0;
        loop {
            let err = match tokio::time::timeout(self.timeout, agent.prompt(prompt)).await {
                Ok(Ok(text)) if text.trim().is_empty() => LlmError::Empty,
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => LlmError::Request(e.to_string()),
                Err(_) => LlmError::Timeout(self.timeout),
            };

            if !err.is_transient() || attempt >= self.max_retries {
                return Err(err);
            }

            attempt += 1;
            let backoff = Duration::from_secs(2u64.pow(attempt));
            warn!(
                attempt,
                max_retries = self.max_retries,
                backoff_secs = backoff.as_secs(),
                error = %err,
                "transient model error, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

/// HTTP status and connection-level failures worth retrying.
fn is_transient_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    message.contains("502")
        || message.contains("503")
        || message.contains("504")
        || message.contains("429")
        || lower.contains("connection")
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("error sending request")
        || lower.contains("broken pipe")
        || lower.contains("reset by peer")
        || lower.contains("response contained no message")
}
