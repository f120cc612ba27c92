use super::{CompletionRequest, LlmClient, LlmEndpoints, LlmError, LlmProvider};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

const MAX_OUTPUT_TOKENS: u32 = 2000;
const TEMPERATURE: f32 = 0.7;
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Completion client for the hosted providers and a local Ollama runtime.
#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    http: Client,
    endpoints: LlmEndpoints,
}

impl HttpLlmClient {
    /// Build a client with its own connection pool.
    pub fn new(endpoints: LlmEndpoints) -> Result<Self, reqwest::Error> {
        let http = Client::builder().user_agent("docingest/llm").build()?;
        Ok(Self::with_http(http, endpoints))
    }

    /// Build a client on top of an existing `reqwest::Client`.
    pub fn with_http(http: Client, endpoints: LlmEndpoints) -> Self {
        Self { http, endpoints }
    }

    async fn openai(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let provider = LlmProvider::OpenAI;
        let url = endpoint(&self.endpoints.openai, "/v1/chat/completions");
        let payload = json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": MAX_OUTPUT_TOKENS,
            "temperature": TEMPERATURE,
        });
        let body: OpenAiResponse = send(
            provider,
            self.http
                .post(url)
                .bearer_auth(&request.api_key)
                .json(&payload),
        )
        .await?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| invalid(provider, "no choices in response"))
    }

    async fn gemini(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let provider = LlmProvider::Gemini;
        let url = endpoint(
            &self.endpoints.gemini,
            &format!("/v1beta/models/{}:generateContent", request.model),
        );
        let payload = json!({
            "contents": [{ "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
                "temperature": TEMPERATURE,
            },
        });
        let body: GeminiResponse = send(
            provider,
            self.http
                .post(url)
                .header("x-goog-api-key", &request.api_key)
                .json(&payload),
        )
        .await?;

        body.candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| invalid(provider, "no candidate text in response"))
    }

    async fn claude(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let provider = LlmProvider::Claude;
        let url = endpoint(&self.endpoints.anthropic, "/v1/messages");
        let payload = json!({
            "model": request.model,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        let body: ClaudeResponse = send(
            provider,
            self.http
                .post(url)
                .header("x-api-key", &request.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&payload),
        )
        .await?;

        body.content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| invalid(provider, "no content blocks in response"))
    }

    async fn ollama(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let provider = LlmProvider::Ollama;
        let url = endpoint(&self.endpoints.ollama, "/api/generate");
        let payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": { "temperature": TEMPERATURE },
        });
        let body: OllamaResponse = send(provider, self.http.post(url).json(&payload)).await?;

        if !body.done {
            return Err(invalid(
                provider,
                "response incomplete (streaming not supported)",
            ));
        }
        Ok(body.response)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let provider: LlmProvider = request.provider.parse()?;
        if provider.requires_api_key() && request.api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey(provider));
        }

        tracing::debug!(
            provider = %provider,
            model = %request.model,
            prompt_chars = request.prompt.chars().count(),
            "Requesting completion"
        );
        let text = match provider {
            LlmProvider::OpenAI => self.openai(&request).await?,
            LlmProvider::Gemini => self.gemini(&request).await?,
            LlmProvider::Claude => self.claude(&request).await?,
            LlmProvider::Ollama => self.ollama(&request).await?,
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse(provider));
        }
        Ok(text.to_string())
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

fn invalid(provider: LlmProvider, message: &str) -> LlmError {
    LlmError::InvalidResponse {
        provider,
        message: message.to_string(),
    }
}

async fn send<T: DeserializeOwned>(
    provider: LlmProvider,
    request: RequestBuilder,
) -> Result<T, LlmError> {
    let response = request
        .send()
        .await
        .map_err(|source| LlmError::Http { provider, source })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::UnexpectedStatus {
            provider,
            status: status.as_u16(),
            body,
        });
    }

    let body: Value = response
        .json()
        .await
        .map_err(|source| LlmError::Http { provider, source })?;
    serde_json::from_value(body).map_err(|error| LlmError::InvalidResponse {
        provider,
        message: error.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeBlock>,
}

#[derive(Debug, Deserialize)]
struct ClaudeBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}
