//! Document lifecycle events and the publish/subscribe bus that fans them out.
//!
//! Producers publish onto a single shared topic; every subscriber receives every event and is
//! responsible for its own filtering (see [`DocumentEvent::matches`]). Events travel through
//! the bus in serialized form so the transport stays payload-agnostic.

mod bus;

pub use bus::{DOCUMENT_EVENT_TOPIC, EventBus, EventBusError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Human status string for documents still streaming.
pub const STATUS_PROCESSING: &str = "processing";
/// Human status string for successfully finalized documents.
pub const STATUS_COMPLETED: &str = "completed";
/// Human status string for documents finalized without a generated summary.
pub const STATUS_COMPLETED_WITHOUT_SUMMARY: &str = "completed_without_summary";
/// Human status string for documents whose ingestion failed.
pub const STATUS_FAILED: &str = "failed";

/// Kind of lifecycle transition an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentEventType {
    /// Ingestion started or advanced.
    Processing,
    /// Ingestion finished successfully.
    Completed,
    /// Ingestion finished with failed chunks.
    Failed,
}

/// Chunk counters attached to progress-bearing events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Chunks read from the stream so far.
    pub chunks_received: i32,
    /// Chunks persisted successfully.
    pub chunks_stored: i32,
    /// Chunks rejected by validation or storage.
    pub chunks_failed: i32,
    /// Chunk total estimated by the producer.
    pub total_chunks: i32,
    /// Integer completion percentage in `0..=100`.
    pub percentage: u32,
}

/// Broadcast-only notification about a document's ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEvent {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: DocumentEventType,
    /// Document the event refers to.
    pub doc_id: String,
    /// Owner of the document.
    pub user_id: String,
    /// Human readable status.
    pub status: String,
    /// Free-text message.
    pub message: String,
    /// Generated summary, present on successful completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Sections discovered while streaming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<String>>,
    /// Counter snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressInfo>,
    /// Emission time, stamped by [`EventBus::publish`].
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl DocumentEvent {
    fn new(
        kind: DocumentEventType,
        doc_id: &str,
        user_id: &str,
        status: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            doc_id: doc_id.to_string(),
            user_id: user_id.to_string(),
            status: status.to_string(),
            message: message.into(),
            summary: None,
            sections: None,
            progress: None,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
    }

    /// Build a `processing` event.
    pub fn processing(doc_id: &str, user_id: &str, message: impl Into<String>) -> Self {
        Self::new(
            DocumentEventType::Processing,
            doc_id,
            user_id,
            STATUS_PROCESSING,
            message,
        )
    }

    /// Build a `completed` event.
    pub fn completed(doc_id: &str, user_id: &str, message: impl Into<String>) -> Self {
        Self::new(
            DocumentEventType::Completed,
            doc_id,
            user_id,
            STATUS_COMPLETED,
            message,
        )
    }

    /// Build a `failed` event.
    pub fn failed(doc_id: &str, user_id: &str, message: impl Into<String>) -> Self {
        Self::new(
            DocumentEventType::Failed,
            doc_id,
            user_id,
            STATUS_FAILED,
            message,
        )
    }

    /// Override the human status string.
    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    /// Attach a summary.
    pub fn with_summary(mut self, summary: String) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Attach the section list; empty lists are omitted from the payload.
    pub fn with_sections(mut self, sections: Vec<String>) -> Self {
        self.sections = (!sections.is_empty()).then_some(sections);
        self
    }

    /// Attach a progress snapshot.
    pub fn with_progress(mut self, progress: ProgressInfo) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Whether a subscriber scoped to `doc_id` (and optionally `user_id`) should see this event.
    pub fn matches(&self, doc_id: &str, user_id: Option<&str>) -> bool {
        if self.doc_id != doc_id {
            return false;
        }
        match user_id {
            Some(user) if !user.is_empty() => self.user_id == user,
            _ => true,
        }
    }
}
