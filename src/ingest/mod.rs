//! Streamed document intake.
//!
//! A stream carries one metadata message followed by any number of chunks. Each chunk is
//! validated, cleaned, folded into the document's accumulator and persisted; failures are
//! counted rather than fatal. At end of stream the handler summarizes successful documents,
//! publishes a terminal event and replies with the aggregate counts.

mod accumulator;
mod chunks;
mod handler;
pub mod progress;
pub mod sanitize;
mod types;

pub use accumulator::{AccumulatorRegistry, DocumentContext};
pub use chunks::ChunkService;
pub use handler::IngestionStreamHandler;
pub use progress::{ChunkCounters, PROGRESS_EVENT_INTERVAL};
pub use types::{
    ChunkError, DocumentMetadata, IngestError, IngestRequest, IngestResponse, TextChunk,
};
