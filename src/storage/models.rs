//! Persisted records written by the ingestion core.

use super::StorageError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Processing lifecycle of a document record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Chunks are still being streamed.
    Processing,
    /// Ingestion finished without failed chunks.
    Completed,
    /// Ingestion finished with at least one failed chunk.
    Failed,
}

impl DocumentStatus {
    /// Lowercase name used in payloads and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Statuses only move forward out of `processing`; terminal states never change.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Processing, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata record for an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Unique file identifier.
    pub file_id: String,
    /// Owning user.
    pub user_id: String,
    /// Display filename.
    pub filename: String,
    /// Content hash reported by the producer.
    pub file_hash: String,
    /// Size in bytes.
    pub file_size: i64,
    /// Page count.
    pub total_pages: i32,
    /// Producer's chunk estimate.
    pub estimated_chunks: i32,
    /// Lifecycle status.
    pub status: DocumentStatus,
    /// Chunks received during ingestion.
    pub chunks_received: i32,
    /// Chunks persisted during ingestion.
    pub chunks_stored: i32,
    /// Chunks rejected during ingestion.
    pub chunks_failed: i32,
    /// Discovered section names in first-seen order.
    pub sections: Vec<String>,
    /// Root conversation node, set once the summary exists.
    pub root: Option<String>,
    /// Record creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Time the metadata message arrived.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Time ingestion was finalized.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl DocumentRecord {
    /// Fresh `processing` record for `file_id`.
    pub fn new(file_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            user_id: user_id.into(),
            filename: String::new(),
            file_hash: String::new(),
            file_size: 0,
            total_pages: 0,
            estimated_chunks: 0,
            status: DocumentStatus::Processing,
            chunks_received: 0,
            chunks_stored: 0,
            chunks_failed: 0,
            sections: Vec::new(),
            root: None,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply the fields present in `patch`, enforcing the status lifecycle.
    pub fn apply(&mut self, patch: DocumentPatch) -> Result<(), StorageError> {
        if let Some(status) = patch.status {
            if !self.status.can_transition_to(status) {
                return Err(StorageError::InvalidTransition {
                    file_id: self.file_id.clone(),
                    from: self.status,
                    to: status,
                });
            }
            self.status = status;
        }

        let DocumentPatch {
            status: _,
            user_id,
            filename,
            file_hash,
            file_size,
            total_pages,
            estimated_chunks,
            chunks_received,
            chunks_stored,
            chunks_failed,
            sections,
            started_at,
            completed_at,
        } = patch;

        if let Some(value) = user_id {
            self.user_id = value;
        }
        if let Some(value) = filename {
            self.filename = value;
        }
        if let Some(value) = file_hash {
            self.file_hash = value;
        }
        if let Some(value) = file_size {
            self.file_size = value;
        }
        if let Some(value) = total_pages {
            self.total_pages = value;
        }
        if let Some(value) = estimated_chunks {
            self.estimated_chunks = value;
        }
        if let Some(value) = chunks_received {
            self.chunks_received = value;
        }
        if let Some(value) = chunks_stored {
            self.chunks_stored = value;
        }
        if let Some(value) = chunks_failed {
            self.chunks_failed = value;
        }
        if let Some(value) = sections {
            self.sections = value;
        }
        if started_at.is_some() {
            self.started_at = started_at;
        }
        if completed_at.is_some() {
            self.completed_at = completed_at;
        }
        Ok(())
    }
}

/// Partial update for a [`DocumentRecord`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPatch {
    /// New lifecycle status.
    pub status: Option<DocumentStatus>,
    /// New owner.
    pub user_id: Option<String>,
    /// New display filename.
    pub filename: Option<String>,
    /// New content hash.
    pub file_hash: Option<String>,
    /// New byte size.
    pub file_size: Option<i64>,
    /// New page count.
    pub total_pages: Option<i32>,
    /// New chunk estimate.
    pub estimated_chunks: Option<i32>,
    /// Final received counter.
    pub chunks_received: Option<i32>,
    /// Final stored counter.
    pub chunks_stored: Option<i32>,
    /// Final failed counter.
    pub chunks_failed: Option<i32>,
    /// Replacement section list.
    pub sections: Option<Vec<String>>,
    /// Start timestamp.
    pub started_at: Option<OffsetDateTime>,
    /// Completion timestamp.
    pub completed_at: Option<OffsetDateTime>,
}

/// Persisted text chunk with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Producer-assigned chunk id.
    pub chunk_id: String,
    /// Owning document.
    pub file_id: String,
    /// Ordinal position within the document.
    pub chunk_index: i32,
    /// Chapter or section label.
    pub chapter: String,
    /// Chunk text.
    pub chunk_text: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Persistence time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Question/answer node in a document's conversation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatNode {
    /// Node id.
    pub id: String,
    /// Parent node; `None` for the tree root.
    pub parent_id: Option<String>,
    /// Document the conversation belongs to.
    pub file_id: String,
    /// Prompt or question.
    pub question: String,
    /// Answer text.
    pub answer: String,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ChatNode {
    /// New parentless node anchoring a document's conversation tree.
    pub fn root(file_id: &str, question: &str, answer: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: None,
            file_id: file_id.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_never_leave_terminal_states() {
        use DocumentStatus::*;
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut record = DocumentRecord::new("d1", "u1");
        record.filename = "paper.pdf".into();
        record
            .apply(DocumentPatch {
                sections: Some(vec!["Intro".into()]),
                chunks_stored: Some(3),
                ..DocumentPatch::default()
            })
            .expect("apply");

        assert_eq!(record.filename, "paper.pdf");
        assert_eq!(record.sections, vec!["Intro".to_string()]);
        assert_eq!(record.chunks_stored, 3);
        assert_eq!(record.status, DocumentStatus::Processing);
    }

    #[test]
    fn patch_rejects_reversed_status() {
        let mut record = DocumentRecord::new("d1", "u1");
        record.status = DocumentStatus::Completed;
        let error = record
            .apply(DocumentPatch {
                status: Some(DocumentStatus::Processing),
                filename: Some("ignored".into()),
                ..DocumentPatch::default()
            })
            .expect_err("reversal");

        assert!(matches!(error, StorageError::InvalidTransition { .. }));
        assert!(record.filename.is_empty());
    }

    #[test]
    fn root_nodes_have_no_parent() {
        let node = ChatNode::root("d1", "question", "answer");
        assert!(node.parent_id.is_none());
        assert!(!node.id.is_empty());
    }
}
