#![deny(missing_docs)]

//! Core library for the streamed document ingestion server.

/// HTTP routing and REST handlers.
pub mod api;
/// JSON key/value caching with expiry.
pub mod cache;
/// Environment-driven configuration management.
pub mod config;
/// Document lifecycle events and their broadcast bus.
pub mod events;
/// Streamed document intake.
pub mod ingest;
/// LLM completion providers and per-user configuration.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Paragraph-structured document payloads.
pub mod paragraphs;
/// Record stores written by the ingestion core.
pub mod storage;
/// Document summaries anchored in the conversation tree.
pub mod summary;
/// Fire-and-forget background tasks.
pub mod tasks;
