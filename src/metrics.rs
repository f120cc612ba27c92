use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing finalized ingestion streams.
#[derive(Default)]
pub struct IngestMetrics {
    documents_completed: AtomicU64,
    documents_failed: AtomicU64,
    summaries_failed: AtomicU64,
    chunks_stored: AtomicU64,
    chunks_failed: AtomicU64,
}

impl IngestMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finalized document and its chunk outcome.
    pub fn record_document(&self, success: bool, chunks_stored: i32, chunks_failed: i32) {
        let documents = if success {
            &self.documents_completed
        } else {
            &self.documents_failed
        };
        documents.fetch_add(1, Ordering::Relaxed);
        self.chunks_stored
            .fetch_add(non_negative(chunks_stored), Ordering::Relaxed);
        self.chunks_failed
            .fetch_add(non_negative(chunks_failed), Ordering::Relaxed);
    }

    /// Record a completed document whose summary could not be generated.
    pub fn record_summary_failure(&self) {
        self.summaries_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_completed: self.documents_completed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            summaries_failed: self.summaries_failed.load(Ordering::Relaxed),
            chunks_stored: self.chunks_stored.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
        }
    }
}

fn non_negative(count: i32) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Streams finalized without failed chunks.
    pub documents_completed: u64,
    /// Streams finalized with at least one failed chunk.
    pub documents_failed: u64,
    /// Completed streams whose summary generation failed.
    pub summaries_failed: u64,
    /// Chunks persisted across all finalized streams.
    pub chunks_stored: u64,
    /// Chunks rejected across all finalized streams.
    pub chunks_failed: u64,
}
