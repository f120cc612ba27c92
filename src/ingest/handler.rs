use super::chunks::ChunkService;
use super::progress::{ChunkCounters, is_progress_tick};
use super::types::{DocumentMetadata, IngestError, IngestRequest, IngestResponse, TextChunk};
use crate::events::{DocumentEvent, EventBus, ProgressInfo, STATUS_COMPLETED_WITHOUT_SUMMARY};
use crate::metrics::IngestMetrics;
use crate::summary::SummaryGenerator;
use futures_util::{Stream, StreamExt, pin_mut};
use std::sync::Arc;
use std::time::Instant;

/// Document being streamed after its metadata arrived.
struct ActiveDocument {
    file_id: String,
    user_id: String,
    estimated_chunks: i32,
    counters: ChunkCounters,
    started: Instant,
}

enum StreamState {
    AwaitingMetadata,
    Streaming(ActiveDocument),
}

/// Drives one ingestion stream from metadata through finalization.
///
/// Streams for different documents share nothing but the accumulator registry and the event
/// bus, so any number of them can run concurrently on one handler.
pub struct IngestionStreamHandler {
    chunks: ChunkService,
    summaries: Arc<SummaryGenerator>,
    events: Arc<EventBus>,
    metrics: Arc<IngestMetrics>,
}

impl IngestionStreamHandler {
    /// Wire the handler to its collaborators.
    pub fn new(
        chunks: ChunkService,
        summaries: Arc<SummaryGenerator>,
        events: Arc<EventBus>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            chunks,
            summaries,
            events,
            metrics,
        }
    }

    /// Consume `messages` until it ends and reply with the aggregate outcome.
    ///
    /// Errors end the stream without a terminal event; per-chunk failures never do.
    pub async fn ingest<S>(&self, messages: S) -> Result<IngestResponse, IngestError>
    where
        S: Stream<Item = Result<IngestRequest, IngestError>> + Send,
    {
        pin_mut!(messages);
        let mut state = StreamState::AwaitingMetadata;

        while let Some(message) = messages.next().await {
            state = match (state, message) {
                (StreamState::AwaitingMetadata, Ok(IngestRequest::Metadata(metadata))) => {
                    StreamState::Streaming(self.start(metadata).await?)
                }
                (StreamState::AwaitingMetadata, Ok(IngestRequest::Chunk(chunk))) => {
                    return Err(IngestError::MetadataRequired {
                        chunk_id: chunk.chunk_id,
                    });
                }
                (StreamState::AwaitingMetadata, Err(error)) => return Err(error),
                (StreamState::Streaming(mut active), Ok(IngestRequest::Chunk(chunk))) => {
                    self.handle_chunk(&mut active, chunk).await;
                    StreamState::Streaming(active)
                }
                (StreamState::Streaming(active), Ok(IngestRequest::Metadata(_))) => {
                    self.abandon(&active);
                    return Err(IngestError::DuplicateMetadata {
                        file_id: active.file_id,
                    });
                }
                (StreamState::Streaming(active), Err(error)) => {
                    self.abandon(&active);
                    return Err(error);
                }
            };
        }

        match state {
            StreamState::AwaitingMetadata => Err(IngestError::EmptyStream),
            StreamState::Streaming(active) => self.finalize(active).await,
        }
    }

    async fn start(&self, metadata: DocumentMetadata) -> Result<ActiveDocument, IngestError> {
        if metadata.file_id.trim().is_empty() {
            return Err(IngestError::MissingFileId);
        }
        if !self.chunks.open_context(&metadata) {
            tracing::warn!(
                file_id = %metadata.file_id,
                "Rejected metadata for a document that is already streaming"
            );
            return Err(IngestError::AlreadyStreaming {
                file_id: metadata.file_id,
            });
        }
        let started = Instant::now();
        tracing::info!(
            file_id = %metadata.file_id,
            user_id = %metadata.user_id,
            filename = %metadata.filename,
            estimated_chunks = metadata.estimated_chunks,
            "Document stream started"
        );

        if let Err(error) = self.chunks.process_metadata(&metadata).await {
            self.chunks.discard(&metadata.file_id);
            return Err(error.into());
        }

        let active = ActiveDocument {
            file_id: metadata.file_id,
            user_id: metadata.user_id,
            estimated_chunks: metadata.estimated_chunks,
            counters: ChunkCounters::default(),
            started,
        };
        let event = DocumentEvent::processing(
            &active.file_id,
            &active.user_id,
            "Document processing started",
        )
        .with_progress(ProgressInfo {
            total_chunks: active.estimated_chunks,
            ..ProgressInfo::default()
        });
        if let Err(error) = self.events.publish(event) {
            self.abandon(&active);
            return Err(error.into());
        }
        Ok(active)
    }

    async fn handle_chunk(&self, active: &mut ActiveDocument, chunk: TextChunk) {
        let chunk_id = chunk.chunk_id.clone();
        let outcome = self.chunks.process_chunk(&active.file_id, chunk).await;
        if let Err(error) = &outcome {
            tracing::warn!(
                file_id = %active.file_id,
                chunk_id = %chunk_id,
                error = %error,
                "Chunk rejected"
            );
        }
        active.counters.record(&outcome);

        if is_progress_tick(active.counters.received) {
            let counters = active.counters;
            let event = DocumentEvent::processing(
                &active.file_id,
                &active.user_id,
                format!(
                    "Processing: {}/{} chunks",
                    counters.stored, active.estimated_chunks
                ),
            )
            .with_progress(counters.progress(active.estimated_chunks));
            if let Err(error) = self.events.publish(event) {
                tracing::warn!(
                    file_id = %active.file_id,
                    error = %error,
                    "Failed to publish progress event"
                );
            }
        }
    }

    async fn finalize(&self, active: ActiveDocument) -> Result<IngestResponse, IngestError> {
        let ActiveDocument {
            file_id,
            user_id,
            estimated_chunks,
            counters,
            started,
        } = active;
        let success = !counters.has_failures();
        let sections = self.chunks.sections(&file_id);

        let event = if success {
            let mut progress = counters.progress(estimated_chunks);
            progress.percentage = 100;
            let completed = match self.summaries.generate(&file_id, &user_id).await {
                Ok(summary) => {
                    DocumentEvent::completed(&file_id, &user_id, "Document processing completed")
                        .with_summary(summary)
                }
                Err(error) => {
                    tracing::warn!(
                        file_id = %file_id,
                        user_id = %user_id,
                        error = %error,
                        "Summary generation failed"
                    );
                    self.metrics.record_summary_failure();
                    DocumentEvent::completed(
                        &file_id,
                        &user_id,
                        format!("Document processed but summary generation failed: {error}"),
                    )
                    .with_status(STATUS_COMPLETED_WITHOUT_SUMMARY)
                }
            };
            completed
                .with_sections(sections.clone())
                .with_progress(progress)
        } else {
            DocumentEvent::failed(
                &file_id,
                &user_id,
                format!("Processing failed: {} chunks failed", counters.failed),
            )
            .with_progress(counters.progress(estimated_chunks))
        };

        if let Err(error) = self
            .chunks
            .record_outcome(&file_id, counters, &sections)
            .await
        {
            tracing::error!(
                file_id = %file_id,
                error = %error,
                "Failed to persist final document state"
            );
        }

        let published = self.events.publish(event);
        self.chunks.discard(&file_id);
        self.metrics
            .record_document(success, counters.stored, counters.failed);
        published?;

        let processing_time_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        tracing::info!(
            file_id = %file_id,
            success,
            chunks_received = counters.received,
            chunks_stored = counters.stored,
            chunks_failed = counters.failed,
            processing_time_ms,
            "Document stream finalized"
        );

        Ok(IngestResponse {
            success,
            message: format!("finish {} chunks", counters.received),
            chunks_received: counters.received,
            chunks_stored: counters.stored,
            chunks_failed: counters.failed,
            processing_time_ms,
            file_id,
        })
    }

    fn abandon(&self, active: &ActiveDocument) {
        tracing::warn!(
            file_id = %active.file_id,
            chunks_received = active.counters.received,
            "Document stream aborted before finalization"
        );
        self.chunks.discard(&active.file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DocumentEventType, EventBusError};
    use crate::ingest::AccumulatorRegistry;
    use crate::llm::{
        CompletionRequest, LlmClient, LlmConfig, LlmConfigError, LlmConfigResolver, LlmError,
    };
    use crate::storage::{ChunkStore, DocumentStatus, DocumentStore, MemoryStore};
    use async_trait::async_trait;
    use futures_util::stream;
    use tokio_util::sync::CancellationToken;

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, LlmError> {
            Ok("generated summary".into())
        }
    }

    struct Configs(bool);

    #[async_trait]
    impl LlmConfigResolver for Configs {
        async fn get(&self, user_id: &str) -> Result<LlmConfig, LlmConfigError> {
            if !self.0 {
                return Err(LlmConfigError::NotFound(user_id.to_string()));
            }
            Ok(LlmConfig {
                api_key: "key".into(),
                model: "model".into(),
                provider: "openai".into(),
                user_id: user_id.to_string(),
            })
        }
    }

    struct Harness {
        handler: IngestionStreamHandler,
        store: Arc<MemoryStore>,
        accumulators: Arc<AccumulatorRegistry>,
        events: Arc<EventBus>,
        metrics: Arc<IngestMetrics>,
    }

    fn harness(configured: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let accumulators = Arc::new(AccumulatorRegistry::new());
        let events = Arc::new(EventBus::new(64));
        let metrics = Arc::new(IngestMetrics::new());
        let summaries = Arc::new(SummaryGenerator::new(
            accumulators.clone(),
            Arc::new(Configs(configured)),
            Arc::new(EchoLlm),
            store.clone(),
            store.clone(),
        ));
        let chunks = ChunkService::new(store.clone(), store.clone(), accumulators.clone());
        Harness {
            handler: IngestionStreamHandler::new(chunks, summaries, events.clone(), metrics.clone()),
            store,
            accumulators,
            events,
            metrics,
        }
    }

    fn metadata(estimated: i32) -> IngestRequest {
        IngestRequest::Metadata(DocumentMetadata {
            file_id: "d1".into(),
            user_id: "u1".into(),
            filename: "paper.pdf".into(),
            estimated_chunks: estimated,
            ..DocumentMetadata::default()
        })
    }

    fn chunk(index: i32, chapter: &str, embedding: Vec<f32>) -> IngestRequest {
        IngestRequest::Chunk(TextChunk {
            chunk_id: format!("c{index}"),
            file_id: "d1".into(),
            chunk_index: index,
            chapter: chapter.into(),
            chunk_text: format!("text {index}"),
            embedding_vector: embedding,
        })
    }

    fn ok_stream(
        messages: Vec<IngestRequest>,
    ) -> impl Stream<Item = Result<IngestRequest, IngestError>> + Send {
        stream::iter(messages.into_iter().map(Ok))
    }

    async fn drain(subscription: impl Stream<Item = DocumentEvent>) -> Vec<DocumentEvent> {
        pin_mut!(subscription);
        let mut events = Vec::new();
        while let Some(event) = subscription.next().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn successful_stream_completes_with_summary() {
        let h = harness(true);
        let subscription = h
            .events
            .subscribe(CancellationToken::new())
            .expect("subscribe");

        let response = h
            .handler
            .ingest(ok_stream(vec![
                metadata(2),
                chunk(1, "Intro", vec![0.1]),
                chunk(2, "Method", vec![0.2]),
            ]))
            .await
            .expect("response");

        assert!(response.success);
        assert_eq!(response.message, "finish 2 chunks");
        assert_eq!((response.chunks_received, response.chunks_stored), (2, 2));
        assert!(!h.accumulators.contains("d1"));

        h.events.close();
        let events = drain(subscription).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "Document processing started");
        assert_eq!(events[0].progress.map(|p| p.total_chunks), Some(2));
        let completed = &events[1];
        assert_eq!(completed.kind, DocumentEventType::Completed);
        assert_eq!(completed.summary.as_deref(), Some("generated summary"));
        assert_eq!(
            completed.sections.as_deref(),
            Some(&["Intro".to_string(), "Method".to_string()][..])
        );
        assert_eq!(completed.progress.map(|p| p.percentage), Some(100));

        let record = h.store.get_by_id("d1").await.expect("record");
        assert_eq!(record.status, DocumentStatus::Completed);
        assert_eq!(record.chunks_stored, 2);
        assert!(record.root.is_some());
        assert_eq!(h.metrics.snapshot().documents_completed, 1);
    }

    #[tokio::test]
    async fn summary_failure_publishes_degraded_completion() {
        let h = harness(false);
        let subscription = h
            .events
            .subscribe(CancellationToken::new())
            .expect("subscribe");

        let response = h
            .handler
            .ingest(ok_stream(vec![metadata(1), chunk(1, "Intro", vec![0.1])]))
            .await
            .expect("response");
        assert!(response.success);

        h.events.close();
        let events = drain(subscription).await;
        let terminal: Vec<_> = events
            .iter()
            .filter(|event| event.kind == DocumentEventType::Completed)
            .collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].status, STATUS_COMPLETED_WITHOUT_SUMMARY);
        assert!(
            terminal[0]
                .message
                .starts_with("Document processed but summary generation failed: ")
        );
        assert!(terminal[0].summary.is_none());
        assert!(!h.accumulators.contains("d1"));
        assert_eq!(h.metrics.snapshot().summaries_failed, 1);
    }

    #[tokio::test]
    async fn failed_chunks_fail_the_document() {
        let h = harness(true);
        let subscription = h
            .events
            .subscribe(CancellationToken::new())
            .expect("subscribe");

        let response = h
            .handler
            .ingest(ok_stream(vec![
                metadata(2),
                chunk(1, "Intro", vec![0.1]),
                chunk(2, "Intro", Vec::new()),
            ]))
            .await
            .expect("response");

        assert!(!response.success);
        assert_eq!(
            (
                response.chunks_received,
                response.chunks_stored,
                response.chunks_failed
            ),
            (2, 1, 1)
        );

        h.events.close();
        let events = drain(subscription).await;
        let failed = events.last().expect("terminal event");
        assert_eq!(failed.kind, DocumentEventType::Failed);
        assert_eq!(failed.message, "Processing failed: 1 chunks failed");
        assert!(failed.summary.is_none());

        let record = h.store.get_by_id("d1").await.expect("record");
        assert_eq!(record.status, DocumentStatus::Failed);
        assert!(record.root.is_none());
        assert!(!h.accumulators.contains("d1"));
    }

    #[tokio::test]
    async fn progress_is_published_every_tenth_chunk() {
        let h = harness(true);
        let subscription = h
            .events
            .subscribe(CancellationToken::new())
            .expect("subscribe");

        let mut messages = vec![metadata(25)];
        messages.extend((1..=25).map(|index| chunk(index, "Body", vec![0.5])));
        h.handler.ingest(ok_stream(messages)).await.expect("response");

        h.events.close();
        let progress: Vec<_> = drain(subscription)
            .await
            .into_iter()
            .filter(|event| event.message.starts_with("Processing: "))
            .collect();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].message, "Processing: 10/25 chunks");
        assert_eq!(progress[0].progress.map(|p| p.percentage), Some(40));
        assert_eq!(progress[1].progress.map(|p| p.chunks_received), Some(20));
    }

    #[tokio::test]
    async fn chunk_before_metadata_is_rejected() {
        let h = harness(true);
        let error = h
            .handler
            .ingest(ok_stream(vec![chunk(1, "Intro", vec![0.1])]))
            .await
            .expect_err("protocol violation");
        assert!(matches!(error, IngestError::MetadataRequired { .. }));
        assert!(h.accumulators.is_empty());
    }

    #[tokio::test]
    async fn empty_stream_is_rejected() {
        let h = harness(true);
        let error = h
            .handler
            .ingest(ok_stream(Vec::new()))
            .await
            .expect_err("empty");
        assert!(matches!(error, IngestError::EmptyStream));
    }

    #[tokio::test]
    async fn duplicate_metadata_aborts_without_terminal_event() {
        let h = harness(true);
        let subscription = h
            .events
            .subscribe(CancellationToken::new())
            .expect("subscribe");

        let error = h
            .handler
            .ingest(ok_stream(vec![metadata(1), metadata(1)]))
            .await
            .expect_err("duplicate");
        assert!(matches!(error, IngestError::DuplicateMetadata { .. }));
        assert!(!h.accumulators.contains("d1"));

        h.events.close();
        let events = drain(subscription).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DocumentEventType::Processing);
    }

    #[tokio::test]
    async fn transport_error_propagates_and_discards_context() {
        let h = harness(true);
        let messages = stream::iter(vec![
            Ok(metadata(2)),
            Ok(chunk(1, "Intro", vec![0.1])),
            Err(IngestError::Transport("connection reset".into())),
        ]);

        let error = h.handler.ingest(messages).await.expect_err("transport");
        assert!(matches!(error, IngestError::Transport(_)));
        assert!(!h.accumulators.contains("d1"));
        assert_eq!(h.metrics.snapshot().documents_completed, 0);
    }

    #[tokio::test]
    async fn closed_bus_fails_the_stream_at_start() {
        let h = harness(true);
        h.events.close();
        let error = h
            .handler
            .ingest(ok_stream(vec![metadata(1)]))
            .await
            .expect_err("closed bus");
        assert!(matches!(error, IngestError::Publish(EventBusError::Closed)));
        assert!(!h.accumulators.contains("d1"));
    }

    /// Yields `messages`, closing `events` as the message at `close_at` is handed out.
    fn closing_stream(
        messages: Vec<IngestRequest>,
        events: Arc<EventBus>,
        close_at: usize,
    ) -> impl Stream<Item = Result<IngestRequest, IngestError>> + Send {
        stream::iter(messages.into_iter().enumerate()).map(move |(index, message)| {
            if index == close_at {
                events.close();
            }
            Ok(message)
        })
    }

    #[tokio::test]
    async fn terminal_publish_failure_fails_the_stream_after_cleanup() {
        let h = harness(true);
        let messages = vec![
            metadata(2),
            chunk(1, "Intro", vec![0.1]),
            chunk(2, "Intro", vec![0.2]),
        ];

        let error = h
            .handler
            .ingest(closing_stream(messages, h.events.clone(), 2))
            .await
            .expect_err("terminal publish");

        assert!(matches!(error, IngestError::Publish(EventBusError::Closed)));
        assert!(!h.accumulators.contains("d1"));
        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.documents_completed, 1);
        assert_eq!(snapshot.chunks_stored, 2);
        assert_eq!(
            h.store.get_by_id("d1").await.expect("record").status,
            DocumentStatus::Completed
        );
    }

    #[tokio::test]
    async fn progress_publish_failure_keeps_streaming() {
        let h = harness(true);
        let mut messages = vec![metadata(12)];
        messages.extend((1..=12).map(|index| chunk(index, "Body", vec![0.5])));

        let error = h
            .handler
            .ingest(closing_stream(messages, h.events.clone(), 10))
            .await
            .expect_err("terminal publish");

        assert!(matches!(error, IngestError::Publish(EventBusError::Closed)));
        assert_eq!(h.store.count_by_file_id("d1").await.expect("count"), 12);
        let record = h.store.get_by_id("d1").await.expect("record");
        assert_eq!(record.status, DocumentStatus::Completed);
        assert_eq!(record.chunks_stored, 12);
        assert!(record.root.is_some());
        assert_eq!(h.metrics.snapshot().chunks_stored, 12);
    }

    #[tokio::test]
    async fn concurrent_stream_for_live_document_is_rejected() {
        let h = harness(true);
        let context = h.accumulators.get_or_create("d1");
        context.append("Intro", "first stream");

        let error = h
            .handler
            .ingest(ok_stream(vec![metadata(1), chunk(1, "Other", vec![0.1])]))
            .await
            .expect_err("already streaming");

        assert!(matches!(
            error,
            IngestError::AlreadyStreaming { ref file_id } if file_id == "d1"
        ));
        assert!(h.accumulators.contains("d1"));
        assert_eq!(h.accumulators.snapshot("d1"), vec!["Intro"]);
        assert_eq!(
            h.accumulators.full_text("d1").as_deref(),
            Some("Intro\nfirst stream\n")
        );
    }
}
