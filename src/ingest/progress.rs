//! Counters and percentages reported while a document streams in.

use super::types::ChunkError;
use crate::events::ProgressInfo;

/// A progress event is published after every this-many received chunks.
pub const PROGRESS_EVENT_INTERVAL: i32 = 10;

/// `floor(100 * stored / total)` clamped to `0..=100`; zero when the total is unknown.
pub fn percentage(stored: i32, total: i32) -> u32 {
    if total <= 0 || stored <= 0 {
        return 0;
    }
    let value = i64::from(stored) * 100 / i64::from(total);
    value.clamp(0, 100) as u32
}

/// Whether the `received`-th chunk (1-indexed) triggers a progress event.
pub fn is_progress_tick(received: i32) -> bool {
    received > 0 && received % PROGRESS_EVENT_INTERVAL == 0
}

/// Per-stream chunk counters. `received == stored + failed` after every recorded chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCounters {
    /// Chunks read from the stream.
    pub received: i32,
    /// Chunks persisted.
    pub stored: i32,
    /// Chunks rejected or not persisted.
    pub failed: i32,
}

impl ChunkCounters {
    /// Count one chunk outcome.
    pub fn record(&mut self, outcome: &Result<(), ChunkError>) {
        self.received += 1;
        match outcome {
            Ok(()) => self.stored += 1,
            Err(_) => self.failed += 1,
        }
    }

    /// Whether any chunk failed.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Snapshot against the producer's estimate.
    pub fn progress(&self, total_chunks: i32) -> ProgressInfo {
        ProgressInfo {
            chunks_received: self.received,
            chunks_stored: self.stored,
            chunks_failed: self.failed,
            total_chunks,
            percentage: percentage(self.stored, total_chunks),
        }
    }
}
