//! Record stores consumed by the ingestion core.
//!
//! The traits describe the keyed record operations the pipeline needs; [`MemoryStore`]
//! implements all of them in process.

mod memory;
pub mod models;

pub use memory::MemoryStore;
pub use models::{ChatNode, ChunkRecord, DocumentPatch, DocumentRecord, DocumentStatus};

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by record stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No record exists under the requested key.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Kind of record looked up.
        entity: &'static str,
        /// Key that missed.
        id: String,
    },
    /// A record with the same key already exists.
    #[error("{entity} '{id}' already exists")]
    AlreadyExists {
        /// Kind of record written.
        entity: &'static str,
        /// Conflicting key.
        id: String,
    },
    /// Status update would move the document backwards.
    #[error("document '{file_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// Document being updated.
        file_id: String,
        /// Current status.
        from: models::DocumentStatus,
        /// Requested status.
        to: models::DocumentStatus,
    },
    /// Document already has a root conversation node.
    #[error("document '{file_id}' already has root node '{root}'")]
    RootAlreadySet {
        /// Document being updated.
        file_id: String,
        /// Existing root node id.
        root: String,
    },
    /// Record violates a storage constraint.
    #[error("record rejected: {0}")]
    Rejected(String),
}

/// Document metadata records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new record; fails when the id is taken.
    async fn create(&self, document: DocumentRecord) -> Result<(), StorageError>;

    /// Fetch a record by file id.
    async fn get_by_id(&self, file_id: &str) -> Result<DocumentRecord, StorageError>;

    /// Apply a partial update to an existing record.
    async fn update_metadata(&self, file_id: &str, patch: DocumentPatch)
    -> Result<(), StorageError>;

    /// Point the document at its root conversation node. A root is only ever set once.
    async fn update_root(&self, file_id: &str, root_id: &str) -> Result<(), StorageError>;
}

/// Text chunk records.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Persist one chunk.
    async fn create(&self, chunk: ChunkRecord) -> Result<(), StorageError>;

    /// All chunks of a document ordered by chunk index.
    async fn get_by_file_id(&self, file_id: &str) -> Result<Vec<ChunkRecord>, StorageError>;

    /// Number of chunks stored for a document.
    async fn count_by_file_id(&self, file_id: &str) -> Result<usize, StorageError>;
}

/// Conversation node records.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist one node.
    async fn create(&self, node: ChatNode) -> Result<(), StorageError>;

    /// Fetch a node by id.
    async fn get_node(&self, node_id: &str) -> Result<ChatNode, StorageError>;
}
