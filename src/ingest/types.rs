//! Stream messages, the aggregate response and ingestion errors.

use crate::events::EventBusError;
use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// First message of every stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    /// Unique file identifier.
    pub file_id: String,
    /// Owning user.
    pub user_id: String,
    /// Display filename.
    pub filename: String,
    /// Content hash.
    pub file_hash: String,
    /// Size in bytes.
    pub file_size: i64,
    /// Page count.
    pub total_pages: i32,
    /// Producer's chunk estimate, used for progress percentages.
    pub estimated_chunks: i32,
}

/// One text chunk with its embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextChunk {
    /// Producer-assigned chunk id.
    pub chunk_id: String,
    /// Owning file; empty means the stream's document.
    pub file_id: String,
    /// Ordinal position.
    pub chunk_index: i32,
    /// Chapter label.
    pub chapter: String,
    /// Chunk text.
    pub chunk_text: String,
    /// Embedding vector; must not be empty.
    pub embedding_vector: Vec<f32>,
}

/// One message on the ingestion stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestRequest {
    /// Document metadata; must come first and only once.
    Metadata(DocumentMetadata),
    /// A chunk of the document.
    Chunk(TextChunk),
}

/// Single reply sent once the stream ends cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    /// `true` when no chunk failed.
    pub success: bool,
    /// Human readable outcome.
    pub message: String,
    /// Chunks read from the stream.
    pub chunks_received: i32,
    /// Chunks persisted.
    pub chunks_stored: i32,
    /// Chunks rejected.
    pub chunks_failed: i32,
    /// Wall-clock milliseconds since the metadata message arrived.
    pub processing_time_ms: i64,
    /// Document the stream carried.
    pub file_id: String,
}

/// Errors that end an ingestion stream without a response.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A chunk arrived before the metadata message.
    #[error("chunk '{chunk_id}' received before document metadata")]
    MetadataRequired {
        /// Offending chunk.
        chunk_id: String,
    },
    /// A second metadata message arrived on the same stream.
    #[error("duplicate metadata for document '{file_id}'")]
    DuplicateMetadata {
        /// Document already being streamed.
        file_id: String,
    },
    /// Another stream is already ingesting the same document.
    #[error("document '{file_id}' is already being ingested")]
    AlreadyStreaming {
        /// Contested document.
        file_id: String,
    },
    /// Metadata did not name a file.
    #[error("document metadata is missing a file id")]
    MissingFileId,
    /// The stream ended before any metadata.
    #[error("stream ended before document metadata was received")]
    EmptyStream,
    /// A message could not be decoded.
    #[error("malformed stream message: {0}")]
    Malformed(String),
    /// The transport failed mid-stream.
    #[error("stream transport failed: {0}")]
    Transport(String),
    /// Document metadata could not be persisted.
    #[error("failed to persist document metadata: {0}")]
    Storage(#[from] StorageError),
    /// A lifecycle event could not be published.
    #[error("failed to publish document event: {0}")]
    Publish(#[from] EventBusError),
}

impl IngestError {
    /// Whether the client broke the stream protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::MetadataRequired { .. }
                | Self::DuplicateMetadata { .. }
                | Self::MissingFileId
                | Self::EmptyStream
                | Self::Malformed(_)
        )
    }
}

/// Per-chunk failures; counted, never fatal to the stream.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Chunk carried no embedding.
    #[error("chunk '{chunk_id}' has an empty embedding vector")]
    EmptyEmbedding {
        /// Offending chunk.
        chunk_id: String,
    },
    /// Chunk names a different document than the stream.
    #[error("chunk '{chunk_id}' belongs to '{actual}', expected '{expected}'")]
    FileMismatch {
        /// Offending chunk.
        chunk_id: String,
        /// Document of the stream.
        expected: String,
        /// Document named by the chunk.
        actual: String,
    },
    /// Chunk could not be persisted.
    #[error("failed to persist chunk: {0}")]
    Storage(#[from] StorageError),
}
