//! Text-generation collaborator
//!
//! Stages only see the [`Generator`] trait: one prompt in, one text out, for a
//! named endpoint (a model identifier). [`RigGenerator`] is the production
//! implementation on top of Rig's Ollama and Gemini clients.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::Prompt;
use rig::providers::{gemini, ollama};
use tracing::debug;

use crate::config::{Config, LlmProvider};
use crate::error::GenerationError;

/// System preamble shared by every generation call
const PIPELINE_PREAMBLE: &str = "You are part of a research writing pipeline. \
Follow the task instructions exactly and reply with the requested text only, \
formatted as Markdown, without meta-commentary.";

/// Phrases that mark a provider failure as worth retrying
const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "rate limit",
    "too many requests",
    "overloaded",
    "service unavailable",
    "connection refused",
    "connection reset",
    "connection closed",
    "error sending request",
    "resource_exhausted",
];

/// HTTP status codes worth retrying, matched as whole words
static TRANSIENT_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(429|5\d\d)\b").expect("static pattern"));

/// A text-generation capability addressed by endpoint (model) identifier.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for `prompt` using `endpoint`.
    async fn generate(&self, prompt: &str, endpoint: &str) -> Result<String, GenerationError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

enum Backend {
    Ollama(ollama::Client),
    Gemini(gemini::Client),
}

/// Rig-backed generator. Builds a one-shot agent per call so that each
/// endpoint id maps directly onto a model name.
pub struct RigGenerator {
    client: Backend,
    provider: LlmProvider,
    temperature: f64,
}

impl RigGenerator {
    /// Create a generator for the configured provider.
    ///
    /// Rig's Ollama client reads `OLLAMA_API_BASE_URL` and the Gemini client
    /// reads `GEMINI_API_KEY`; call [`Config::require_credentials`] first.
    pub fn from_config(config: &Config) -> Self {
        let client = match config.provider {
            LlmProvider::Ollama => {
                std::env::set_var("OLLAMA_API_BASE_URL", &config.ollama_host);
                Backend::Ollama(ollama::Client::from_env())
            }
            LlmProvider::Gemini => {
                if let Some(key) = &config.gemini_api_key {
                    std::env::set_var("GEMINI_API_KEY", key);
                }
                Backend::Gemini(gemini::Client::from_env())
            }
        };

        Self {
            client,
            provider: config.provider,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl Generator for RigGenerator {
    async fn generate(&self, prompt: &str, endpoint: &str) -> Result<String, GenerationError> {
        debug!(
            provider = %self.provider,
            endpoint = %endpoint,
            prompt_len = prompt.len(),
            "Sending generation request"
        );

        let response = match &self.client {
            Backend::Ollama(client) => {
                let agent = client
                    .agent(endpoint)
                    .preamble(PIPELINE_PREAMBLE)
                    .temperature(self.temperature)
                    .build();
                agent.prompt(prompt).await
            }
            Backend::Gemini(client) => {
                let agent = client
                    .agent(endpoint)
                    .preamble(PIPELINE_PREAMBLE)
                    .temperature(self.temperature)
                    .build();
                agent.prompt(prompt).await
            }
        };

        response.map_err(|e| classify_provider_error(e.to_string()))
    }

    fn name(&self) -> &str {
        self.provider.as_str()
    }
}

/// Classify a provider error message as transient or permanent.
pub fn classify_provider_error(message: String) -> GenerationError {
    let lower = message.to_lowercase();
    let transient = TRANSIENT_STATUS.is_match(&lower)
        || TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker));
    if transient {
        GenerationError::transient(message)
    } else {
        GenerationError::permanent(message)
    }
}
