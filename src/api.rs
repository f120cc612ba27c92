//! HTTP surface for the ingestion server.
//!
//! - `POST /ingest` – Stream a document as newline-delimited JSON: one `{"metadata": ...}` line
//!   followed by `{"chunk": ...}` lines. Returns the aggregate ingestion response.
//! - `GET /documents/:doc_id/events` – Server-sent lifecycle events for one document, optionally
//!   narrowed with `?user_id=`. The first frame is always `connected`.
//! - `PUT /users/:user_id/llm-config` – Store the provider, model and key used for a user's
//!   summaries. `DELETE` clears it; `POST .../refresh` restarts its lifetime.
//! - `POST /documents/:doc_id/summary` – Summarize a paragraph-structured document and anchor
//!   the summary as its conversation root. Request-supplied LLM settings take precedence.
//! - `GET /metrics` – Ingestion counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::events::{EventBus, EventBusError};
use crate::ingest::{IngestError, IngestRequest, IngestResponse, IngestionStreamHandler};
use crate::llm::{
    LlmConfig, LlmConfigError, LlmConfigOverrides, LlmConfigService, LlmError, LlmProvider,
};
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::paragraphs::{ParagraphError, ProcessedFile};
use crate::storage::StorageError;
use crate::summary::{SummaryError, SummaryGenerator};
use async_stream::{stream, try_stream};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post, put},
};
use futures_util::{Stream, StreamExt, pin_mut};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handles every route works with.
#[derive(Clone)]
pub struct AppState {
    /// Stream handler driving `POST /ingest`.
    pub ingest: Arc<IngestionStreamHandler>,
    /// Bus the event stream subscribes to.
    pub events: Arc<EventBus>,
    /// Counters served by `GET /metrics`.
    pub metrics: Arc<IngestMetrics>,
    /// Per-user provider configuration.
    pub llm_configs: Arc<LlmConfigService>,
    /// Summaries for paragraph-structured documents.
    pub summaries: Arc<SummaryGenerator>,
}

/// Build the HTTP router exposing the ingestion API surface.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ingest", post(ingest_document))
        .route("/documents/:doc_id/events", get(document_events))
        .route("/documents/:doc_id/summary", post(summarize_document))
        .route(
            "/users/:user_id/llm-config",
            put(put_llm_config).delete(delete_llm_config),
        )
        .route("/users/:user_id/llm-config/refresh", post(refresh_llm_config))
        .route("/metrics", get(get_metrics))
        .route("/commands", get(get_commands))
        .with_state(state)
}

/// Longest NDJSON line accepted by `POST /ingest`.
pub const MAX_NDJSON_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Decode a newline-delimited JSON body into stream messages.
///
/// Blank lines are skipped and the final line needs no trailing newline. A body error, an
/// undecodable line or a line longer than [`MAX_NDJSON_LINE_BYTES`] ends the stream with that
/// error.
pub fn decode_ndjson<S, E>(body: S) -> impl Stream<Item = Result<IngestRequest, IngestError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    decode_ndjson_with_limit(body, MAX_NDJSON_LINE_BYTES)
}

fn decode_ndjson_with_limit<S, E>(
    body: S,
    max_line_bytes: usize,
) -> impl Stream<Item = Result<IngestRequest, IngestError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    try_stream! {
        let body = body;
        pin_mut!(body);
        let mut buffer: Vec<u8> = Vec::new();
        // Bytes of `buffer` already known to hold no newline.
        let mut scanned = 0usize;
        let mut line_number = 0usize;

        while let Some(frame) = body.next().await {
            let frame = frame.map_err(|error| IngestError::Transport(error.to_string()))?;
            buffer.extend_from_slice(&frame);
            while let Some(offset) = buffer[scanned..].iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=scanned + offset).collect();
                scanned = 0;
                line_number += 1;
                check_line_length(line.len() - 1, max_line_bytes, line_number)?;
                if let Some(message) = parse_line(&line, line_number)? {
                    yield message;
                }
            }
            scanned = buffer.len();
            check_line_length(buffer.len(), max_line_bytes, line_number + 1)?;
        }

        line_number += 1;
        if let Some(message) = parse_line(&buffer, line_number)? {
            yield message;
        }
    }
}

fn check_line_length(
    length: usize,
    max_line_bytes: usize,
    line_number: usize,
) -> Result<(), IngestError> {
    if length > max_line_bytes {
        return Err(IngestError::Malformed(format!(
            "line {line_number}: exceeds {max_line_bytes} bytes"
        )));
    }
    Ok(())
}

fn parse_line(line: &[u8], line_number: usize) -> Result<Option<IngestRequest>, IngestError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(line)
        .map(Some)
        .map_err(|error| IngestError::Malformed(format!("line {line_number}: {error}")))
}

/// Drive one NDJSON ingestion stream to completion.
async fn ingest_document(
    State(state): State<AppState>,
    body: Body,
) -> Result<Json<IngestResponse>, AppError> {
    let messages = decode_ndjson(body.into_data_stream());
    let response = state.ingest.ingest(messages).await?;
    tracing::info!(
        file_id = %response.file_id,
        success = response.success,
        chunks_received = response.chunks_received,
        processing_time_ms = response.processing_time_ms,
        "Ingest request completed"
    );
    Ok(Json(response))
}

/// Query parameters for the event stream.
#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    user_id: Option<String>,
}

/// Stream lifecycle events for one document. The subscription ends when the client goes away.
async fn document_events(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let cancel = CancellationToken::new();
    let subscription = state.events.subscribe(cancel.clone())?;
    let user_id = query.user_id.filter(|user| !user.is_empty());
    tracing::info!(doc_id = %doc_id, user_id = ?user_id, "Event subscriber connected");

    let frames = stream! {
        let _disconnect = cancel.drop_guard();
        yield Ok(Event::default()
            .event("connected")
            .data(json!({ "doc_id": doc_id, "user_id": user_id }).to_string()));

        pin_mut!(subscription);
        while let Some(event) = subscription.next().await {
            if !event.matches(&doc_id, user_id.as_deref()) {
                continue;
            }
            match Event::default().json_data(&event) {
                Ok(frame) => yield Ok(frame),
                Err(error) => {
                    tracing::warn!(doc_id = %doc_id, error = %error, "Failed to encode event frame");
                }
            }
        }
    };

    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

/// Request body for `PUT /users/:user_id/llm-config`.
#[derive(Deserialize)]
struct LlmConfigBody {
    api_key: String,
    model: String,
    provider: String,
}

/// Store a user's provider configuration.
async fn put_llm_config(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<LlmConfigBody>,
) -> Result<StatusCode, AppError> {
    let provider: LlmProvider = body
        .provider
        .parse()
        .map_err(|error: LlmError| AppError::BadRequest(error.to_string()))?;
    if body.model.trim().is_empty() {
        return Err(AppError::BadRequest("model cannot be empty".into()));
    }
    state
        .llm_configs
        .set_user_config(
            &user_id,
            LlmConfig {
                api_key: body.api_key,
                model: body.model,
                provider: provider.as_str().to_string(),
                user_id: user_id.clone(),
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Clear a user's provider configuration.
async fn delete_llm_config(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.llm_configs.delete(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Restart the lifetime of a user's stored configuration.
async fn refresh_llm_config(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.llm_configs.refresh_ttl(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for `POST /documents/:doc_id/summary`.
#[derive(Deserialize)]
struct SummaryBody {
    user_id: String,
    /// Processed-file payload: `{ "paragraphs": [{ "chapter", "content" }] }`.
    file: serde_json::Value,
    #[serde(default)]
    llm: LlmConfigOverrides,
}

/// Response body for `POST /documents/:doc_id/summary`.
#[derive(Serialize)]
struct SummaryResponse {
    file_id: String,
    title: String,
    sections: Vec<String>,
    summary: String,
}

/// Summarize a paragraph-structured document on behalf of a user.
async fn summarize_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Json(body): Json<SummaryBody>,
) -> Result<Json<SummaryResponse>, AppError> {
    let file = ProcessedFile::from_value(body.file)?;
    if let Some(provider) = body.llm.provider.as_deref().filter(|name| !name.is_empty()) {
        provider
            .parse::<LlmProvider>()
            .map_err(|error| AppError::BadRequest(error.to_string()))?;
    }

    let config = state
        .llm_configs
        .get_or_use_default(&body.user_id, &body.llm)
        .await?;
    let summary = state
        .summaries
        .summarize_paragraphs(&doc_id, config, &file)
        .await?;
    tracing::info!(
        doc_id = %doc_id,
        user_id = %body.user_id,
        paragraphs = file.paragraphs.len(),
        "Paragraph summary stored"
    );

    Ok(Json(SummaryResponse {
        file_id: doc_id,
        title: file.title().to_string(),
        sections: file.sections(),
        summary,
    }))
}

/// Return the ingestion counters.
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "ingest",
                method: "POST",
                path: "/ingest",
                description: "Stream a document as newline-delimited JSON: one metadata line, then chunk lines. Returns { \"success\", \"chunks_received\", \"chunks_stored\", \"chunks_failed\", \"processing_time_ms\", \"file_id\" }.",
                request_example: Some(json!([
                    { "metadata": { "file_id": "d1", "user_id": "u1", "filename": "paper.pdf", "estimated_chunks": 1 } },
                    { "chunk": { "chunk_id": "c1", "file_id": "d1", "chunk_index": 0, "chapter": "Intro", "chunk_text": "hello", "embedding_vector": [0.1, 0.2] } }
                ])),
            },
            CommandDescriptor {
                name: "document_events",
                method: "GET",
                path: "/documents/:doc_id/events",
                description: "Server-sent processing, completed and failed events for one document. Optional ?user_id= narrows the stream.",
                request_example: None,
            },
            CommandDescriptor {
                name: "set_llm_config",
                method: "PUT",
                path: "/users/:user_id/llm-config",
                description: "Store the provider, model and API key used to summarize the user's documents.",
                request_example: Some(json!({
                    "provider": "openai",
                    "model": "gpt-4o-mini",
                    "api_key": "sk-..."
                })),
            },
            CommandDescriptor {
                name: "delete_llm_config",
                method: "DELETE",
                path: "/users/:user_id/llm-config",
                description: "Forget the user's stored LLM configuration.",
                request_example: None,
            },
            CommandDescriptor {
                name: "refresh_llm_config",
                method: "POST",
                path: "/users/:user_id/llm-config/refresh",
                description: "Restart the lifetime of the user's stored LLM configuration.",
                request_example: None,
            },
            CommandDescriptor {
                name: "summarize_document",
                method: "POST",
                path: "/documents/:doc_id/summary",
                description: "Summarize a paragraph-structured document and store the summary as its conversation root. Optional llm settings override, and when complete replace, the stored configuration.",
                request_example: Some(json!({
                    "user_id": "u1",
                    "file": { "paragraphs": [{ "chapter": "Intro", "content": "hello" }] },
                    "llm": { "provider": "openai", "model": "gpt-4o-mini", "api_key": "sk-..." }
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    Ingest(IngestError),
    Events(EventBusError),
    LlmConfig(LlmConfigError),
    Paragraphs(ParagraphError),
    Summary(SummaryError),
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Ingest(error) if error.is_protocol_violation() => StatusCode::BAD_REQUEST,
            Self::Ingest(IngestError::AlreadyStreaming { .. }) => StatusCode::CONFLICT,
            Self::Ingest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Events(EventBusError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Events(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::LlmConfig(LlmConfigError::EmptyUserId) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::LlmConfig(LlmConfigError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::LlmConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Paragraphs(_) => StatusCode::BAD_REQUEST,
            Self::Summary(error) => summary_status(error),
        };
        let message = match self {
            Self::Ingest(error) => error.to_string(),
            Self::Events(error) => error.to_string(),
            Self::LlmConfig(error) => error.to_string(),
            Self::Paragraphs(error) => error.to_string(),
            Self::Summary(error) => error.to_string(),
            Self::BadRequest(message) => message,
        };
        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "Request failed");
        }
        (status, message).into_response()
    }
}

fn summary_status(error: &SummaryError) -> StatusCode {
    match error {
        SummaryError::Storage(StorageError::NotFound { .. })
        | SummaryError::Config(LlmConfigError::NotFound(_)) => StatusCode::NOT_FOUND,
        SummaryError::AlreadySummarized(_)
        | SummaryError::RootPointer {
            source: StorageError::RootAlreadySet { .. },
            ..
        } => StatusCode::CONFLICT,
        SummaryError::Llm(LlmError::UnsupportedProvider(_) | LlmError::MissingApiKey(_))
        | SummaryError::Config(LlmConfigError::EmptyUserId) => StatusCode::BAD_REQUEST,
        SummaryError::Llm(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ParagraphError> for AppError {
    fn from(inner: ParagraphError) -> Self {
        Self::Paragraphs(inner)
    }
}

impl From<SummaryError> for AppError {
    fn from(inner: SummaryError) -> Self {
        Self::Summary(inner)
    }
}

impl From<IngestError> for AppError {
    fn from(inner: IngestError) -> Self {
        Self::Ingest(inner)
    }
}

impl From<EventBusError> for AppError {
    fn from(inner: EventBusError) -> Self {
        Self::Events(inner)
    }
}

impl From<LlmConfigError> for AppError {
    fn from(inner: LlmConfigError) -> Self {
        Self::LlmConfig(inner)
    }
}
