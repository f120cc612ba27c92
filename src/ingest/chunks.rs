use super::accumulator::AccumulatorRegistry;
use super::progress::ChunkCounters;
use super::sanitize::strip_nul_owned;
use super::types::{ChunkError, DocumentMetadata, TextChunk};
use crate::storage::{
    ChunkRecord, ChunkStore, DocumentPatch, DocumentRecord, DocumentStatus, DocumentStore,
    StorageError,
};
use std::sync::Arc;
use time::OffsetDateTime;

/// Validates, cleans and persists stream messages while folding them into the accumulator.
#[derive(Clone)]
pub struct ChunkService {
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    accumulators: Arc<AccumulatorRegistry>,
}

impl ChunkService {
    /// Wire the service to its stores and accumulator registry.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkStore>,
        accumulators: Arc<AccumulatorRegistry>,
    ) -> Self {
        Self {
            documents,
            chunks,
            accumulators,
        }
    }

    /// Registry holding the open document contexts.
    pub fn accumulators(&self) -> &Arc<AccumulatorRegistry> {
        &self.accumulators
    }

    /// Open the document's context, seeded with its filename. Returns `false` when another
    /// stream already holds a context for the same file.
    pub fn open_context(&self, metadata: &DocumentMetadata) -> bool {
        self.accumulators
            .open(&metadata.file_id, &format!("{}\n", metadata.filename))
            .is_some()
    }

    /// Persist the document metadata with status `processing`.
    pub async fn process_metadata(&self, metadata: &DocumentMetadata) -> Result<(), StorageError> {
        let started_at = OffsetDateTime::now_utc();
        let patch = DocumentPatch {
            status: Some(DocumentStatus::Processing),
            user_id: Some(metadata.user_id.clone()),
            filename: Some(metadata.filename.clone()),
            file_hash: Some(metadata.file_hash.clone()),
            file_size: Some(metadata.file_size),
            total_pages: Some(metadata.total_pages),
            estimated_chunks: Some(metadata.estimated_chunks),
            started_at: Some(started_at),
            ..DocumentPatch::default()
        };

        match self
            .documents
            .update_metadata(&metadata.file_id, patch.clone())
            .await
        {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound { .. }) => {
                let mut record = DocumentRecord::new(&metadata.file_id, &metadata.user_id);
                record.apply(patch)?;
                self.documents.create(record).await
            }
            Err(error) => Err(error),
        }
    }

    /// Validate, clean, accumulate and persist one chunk of `file_id`.
    pub async fn process_chunk(&self, file_id: &str, chunk: TextChunk) -> Result<(), ChunkError> {
        let TextChunk {
            chunk_id,
            file_id: chunk_file_id,
            chunk_index,
            chapter,
            chunk_text,
            embedding_vector,
        } = chunk;

        if embedding_vector.is_empty() {
            return Err(ChunkError::EmptyEmbedding { chunk_id });
        }
        if !chunk_file_id.is_empty() && chunk_file_id != file_id {
            return Err(ChunkError::FileMismatch {
                chunk_id,
                expected: file_id.to_string(),
                actual: chunk_file_id,
            });
        }

        let chapter = strip_nul_owned(chapter);
        let chunk_text = strip_nul_owned(chunk_text);
        self.accumulators.append_text(file_id, &chapter, &chunk_text);

        self.chunks
            .create(ChunkRecord {
                chunk_id,
                file_id: file_id.to_string(),
                chunk_index,
                chapter,
                chunk_text,
                embedding: embedding_vector,
                created_at: OffsetDateTime::now_utc(),
            })
            .await?;
        Ok(())
    }

    /// Section list discovered so far for `file_id`.
    pub fn sections(&self, file_id: &str) -> Vec<String> {
        self.accumulators.snapshot(file_id)
    }

    /// Write the terminal status, final counters and sections onto the document record.
    pub async fn record_outcome(
        &self,
        file_id: &str,
        counters: ChunkCounters,
        sections: &[String],
    ) -> Result<(), StorageError> {
        let status = if counters.has_failures() {
            DocumentStatus::Failed
        } else {
            DocumentStatus::Completed
        };
        let patch = DocumentPatch {
            status: Some(status),
            chunks_received: Some(counters.received),
            chunks_stored: Some(counters.stored),
            chunks_failed: Some(counters.failed),
            sections: (!sections.is_empty()).then(|| sections.to_vec()),
            completed_at: Some(OffsetDateTime::now_utc()),
            ..DocumentPatch::default()
        };
        self.documents.update_metadata(file_id, patch).await
    }

    /// Drop the document's context.
    pub fn discard(&self, file_id: &str) -> bool {
        self.accumulators.discard(file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn service() -> (ChunkService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = ChunkService::new(
            store.clone(),
            store.clone(),
            Arc::new(AccumulatorRegistry::new()),
        );
        (service, store)
    }

    fn metadata() -> DocumentMetadata {
        DocumentMetadata {
            file_id: "d1".into(),
            user_id: "u1".into(),
            filename: "paper.pdf".into(),
            estimated_chunks: 2,
            ..DocumentMetadata::default()
        }
    }

    fn chunk(id: &str, chapter: &str, text: &str, embedding: Vec<f32>) -> TextChunk {
        TextChunk {
            chunk_id: id.into(),
            file_id: "d1".into(),
            chunk_index: 0,
            chapter: chapter.into(),
            chunk_text: text.into(),
            embedding_vector: embedding,
        }
    }

    #[tokio::test]
    async fn metadata_creates_then_refreshes_record() {
        let (service, store) = service();
        service.process_metadata(&metadata()).await.expect("create");

        let record = store.get_by_id("d1").await.expect("record");
        assert_eq!(record.status, DocumentStatus::Processing);
        assert_eq!(record.filename, "paper.pdf");
        assert!(record.started_at.is_some());

        let mut renamed = metadata();
        renamed.filename = "paper-v2.pdf".into();
        service.process_metadata(&renamed).await.expect("refresh");
        assert_eq!(
            store.get_by_id("d1").await.expect("record").filename,
            "paper-v2.pdf"
        );
    }

    #[test]
    fn context_opens_once_per_live_document() {
        let (service, _store) = service();
        assert!(service.open_context(&metadata()));
        assert_eq!(
            service.accumulators().full_text("d1").as_deref(),
            Some("paper.pdf\n")
        );

        let mut renamed = metadata();
        renamed.filename = "paper-v2.pdf".into();
        assert!(!service.open_context(&renamed));
        assert_eq!(
            service.accumulators().full_text("d1").as_deref(),
            Some("paper.pdf\n")
        );
    }

    #[tokio::test]
    async fn empty_embedding_is_never_persisted() {
        let (service, store) = service();
        service.process_metadata(&metadata()).await.expect("metadata");

        let result = service
            .process_chunk("d1", chunk("c1", "Intro", "hello", Vec::new()))
            .await;
        assert!(matches!(result, Err(ChunkError::EmptyEmbedding { .. })));
        assert_eq!(store.count_by_file_id("d1").await.expect("count"), 0);
        assert!(service.sections("d1").is_empty());
    }

    #[tokio::test]
    async fn nul_bytes_are_stripped_before_storage() {
        let (service, store) = service();
        service.process_metadata(&metadata()).await.expect("metadata");
        service
            .process_chunk("d1", chunk("c1", "In\0tro", "he\0llo\0", vec![0.1]))
            .await
            .expect("stored");

        let stored = store.get_by_file_id("d1").await.expect("chunks");
        assert_eq!(stored[0].chapter, "Intro");
        assert_eq!(stored[0].chunk_text, "hello");
        assert_eq!(service.sections("d1"), vec!["Intro"]);
    }

    #[tokio::test]
    async fn chunk_for_other_document_is_rejected() {
        let (service, _store) = service();
        let mut foreign = chunk("c1", "Intro", "hello", vec![0.1]);
        foreign.file_id = "d2".into();

        let result = service.process_chunk("d1", foreign).await;
        assert!(matches!(
            result,
            Err(ChunkError::FileMismatch { ref actual, .. }) if actual == "d2"
        ));
    }

    #[tokio::test]
    async fn storage_failure_is_a_chunk_error() {
        let (service, _store) = service();
        service
            .process_chunk("d1", chunk("c1", "Intro", "one", vec![0.1]))
            .await
            .expect("first");
        let duplicate = service
            .process_chunk("d1", chunk("c1", "Intro", "two", vec![0.1]))
            .await;
        assert!(matches!(duplicate, Err(ChunkError::Storage(_))));
    }

    #[tokio::test]
    async fn outcome_sets_terminal_status_and_counters() {
        let (service, store) = service();
        service.process_metadata(&metadata()).await.expect("metadata");
        let counters = ChunkCounters {
            received: 2,
            stored: 1,
            failed: 1,
        };
        service
            .record_outcome("d1", counters, &["Intro".to_string()])
            .await
            .expect("outcome");

        let record = store.get_by_id("d1").await.expect("record");
        assert_eq!(record.status, DocumentStatus::Failed);
        assert_eq!(record.chunks_failed, 1);
        assert_eq!(record.sections, vec!["Intro"]);
        assert!(record.completed_at.is_some());
    }
}
