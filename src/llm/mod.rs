//! LLM completion providers and per-user provider configuration.
//!
//! [`HttpLlmClient`] talks to the hosted providers directly over HTTP. Which provider, model and
//! key a user's request goes through is resolved by [`LlmConfigService`], which keeps the last
//! known configuration per user in the shared cache.

mod client;
mod config;

pub use client::HttpLlmClient;
pub use config::{
    LlmConfig, LlmConfigError, LlmConfigOverrides, LlmConfigResolver, LlmConfigService,
    api_key_fingerprint,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Base URLs for each supported provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmEndpoints {
    /// OpenAI-compatible chat completions host.
    pub openai: String,
    /// Google Generative Language host.
    pub gemini: String,
    /// Anthropic messages host.
    pub anthropic: String,
    /// Local Ollama runtime.
    pub ollama: String,
}

impl Default for LlmEndpoints {
    fn default() -> Self {
        Self {
            openai: DEFAULT_OPENAI_URL.to_string(),
            gemini: DEFAULT_GEMINI_URL.to_string(),
            anthropic: DEFAULT_ANTHROPIC_URL.to_string(),
            ollama: DEFAULT_OLLAMA_URL.to_string(),
        }
    }
}

/// Supported completion providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI chat completions.
    #[serde(alias = "OpenAI", alias = "OPENAI")]
    OpenAI,
    /// Google Gemini.
    #[serde(alias = "Gemini", alias = "GEMINI")]
    Gemini,
    /// Anthropic Claude.
    #[serde(alias = "Claude", alias = "CLAUDE", alias = "anthropic")]
    Claude,
    /// Local Ollama runtime.
    #[serde(alias = "Ollama", alias = "OLLAMA")]
    Ollama,
}

impl LlmProvider {
    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Gemini => "gemini",
            Self::Claude => "claude",
            Self::Ollama => "ollama",
        }
    }

    /// Whether requests to this provider must carry an API key.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = LlmError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "claude" | "anthropic" => Ok(Self::Claude),
            "ollama" => Ok(Self::Ollama),
            _ => Err(LlmError::UnsupportedProvider(value.to_string())),
        }
    }
}

/// One completion call.
#[derive(Clone)]
pub struct CompletionRequest {
    /// Full prompt text.
    pub prompt: String,
    /// Provider name, parsed case-insensitively.
    pub provider: String,
    /// Provider-specific model identifier.
    pub model: String,
    /// Credential for the provider.
    pub api_key: String,
}

impl fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("prompt_chars", &self.prompt.chars().count())
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &api_key_fingerprint(&self.api_key))
            .finish()
    }
}

/// Errors surfaced by completion providers.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider name is not one of the supported providers.
    #[error("Unsupported LLM provider: {0}")]
    UnsupportedProvider(String),
    /// Provider requires a key and none was supplied.
    #[error("Missing API key for provider {0}")]
    MissingApiKey(LlmProvider),
    /// Request could not be sent or the body could not be read.
    #[error("Failed to reach {provider}: {source}")]
    Http {
        /// Provider being called.
        provider: LlmProvider,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// Provider answered with a non-success status.
    #[error("{provider} returned {status}: {body}")]
    UnexpectedStatus {
        /// Provider being called.
        provider: LlmProvider,
        /// HTTP status code.
        status: u16,
        /// Response body, as returned.
        body: String,
    },
    /// Provider response did not have the expected shape.
    #[error("Malformed {provider} response: {message}")]
    InvalidResponse {
        /// Provider being called.
        provider: LlmProvider,
        /// What was wrong with the response.
        message: String,
    },
    /// Provider answered without any text.
    #[error("{0} returned an empty completion")]
    EmptyResponse(LlmProvider),
}

/// Text completion over a hosted or local model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `request.prompt` and return the answer text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}
