//! One-time document summaries anchored as the root of the conversation tree.

use crate::ingest::AccumulatorRegistry;
use crate::llm::{
    CompletionRequest, LlmClient, LlmConfig, LlmConfigError, LlmConfigResolver, LlmError,
    api_key_fingerprint,
};
use crate::paragraphs::{ProcessedFile, file_prompt};
use crate::storage::{ChatNode, ChatStore, DocumentStore, StorageError};
use std::sync::Arc;
use thiserror::Error;

/// Longest summary, in characters, that is ever persisted.
pub const SUMMARY_MAX_CHARS: usize = 3000;

/// Instruction prepended to the document text. Also stored as the root node's question.
pub const SUMMARY_INSTRUCTIONS: &str = "You are an expert researcher.
Please read the following academic paper carefully and summarize:
1. The main research topic and its category.
2. The problem the paper addresses.
3. The proposed method and its novelty.
4. The key results and findings.
5. Limitations or open questions.
6. The overall significance.

Paper content:
";

/// Errors raised while generating or persisting a summary.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// No accumulated text exists for the document.
    #[error("no accumulated text for document '{0}'")]
    ContextMissing(String),
    /// The document already has a summary root.
    #[error("document '{0}' already has a summary")]
    AlreadySummarized(String),
    /// The user has no usable LLM configuration.
    #[error("LLM configuration required for generating summary: {0}")]
    Config(#[from] LlmConfigError),
    /// The provider call failed.
    #[error("summary completion failed: {0}")]
    Llm(#[from] LlmError),
    /// The root node could not be written.
    #[error("failed to persist summary node: {0}")]
    Storage(#[from] StorageError),
    /// The node was written but the document could not be pointed at it.
    #[error("summary node '{node_id}' was stored but the root pointer update failed: {source}")]
    RootPointer {
        /// Orphaned node.
        node_id: String,
        /// Underlying storage failure.
        #[source]
        source: StorageError,
    },
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Summary prompt for an accumulated document text.
pub fn build_summary_prompt(full_text: &str) -> String {
    let mut prompt = String::with_capacity(SUMMARY_INSTRUCTIONS.len() + full_text.len());
    prompt.push_str(SUMMARY_INSTRUCTIONS);
    prompt.push_str(full_text);
    prompt
}

/// Produces a document's summary and anchors it as the root conversation node.
pub struct SummaryGenerator {
    accumulators: Arc<AccumulatorRegistry>,
    configs: Arc<dyn LlmConfigResolver>,
    llm: Arc<dyn LlmClient>,
    documents: Arc<dyn DocumentStore>,
    chats: Arc<dyn ChatStore>,
}

impl SummaryGenerator {
    /// Wire the generator to its collaborators.
    pub fn new(
        accumulators: Arc<AccumulatorRegistry>,
        configs: Arc<dyn LlmConfigResolver>,
        llm: Arc<dyn LlmClient>,
        documents: Arc<dyn DocumentStore>,
        chats: Arc<dyn ChatStore>,
    ) -> Self {
        Self {
            accumulators,
            configs,
            llm,
            documents,
            chats,
        }
    }

    /// Summarize the text accumulated for `file_id` on behalf of `user_id`.
    ///
    /// Returns the persisted (truncated) summary.
    pub async fn generate(&self, file_id: &str, user_id: &str) -> Result<String, SummaryError> {
        let full_text = self
            .accumulators
            .full_text(file_id)
            .ok_or_else(|| SummaryError::ContextMissing(file_id.to_string()))?;
        let config = self.configs.get(user_id).await?;
        self.anchor_summary(file_id, config, build_summary_prompt(&full_text))
            .await
    }

    /// Summarize a document supplied as parsed paragraphs, completing through `config`.
    ///
    /// The document record must exist and must not have a summary yet.
    pub async fn summarize_paragraphs(
        &self,
        file_id: &str,
        config: LlmConfig,
        file: &ProcessedFile,
    ) -> Result<String, SummaryError> {
        let record = self.documents.get_by_id(file_id).await?;
        if record.root.is_some() {
            return Err(SummaryError::AlreadySummarized(file_id.to_string()));
        }
        self.anchor_summary(file_id, config, file_prompt(SUMMARY_INSTRUCTIONS, file))
            .await
    }

    async fn anchor_summary(
        &self,
        file_id: &str,
        config: LlmConfig,
        prompt: String,
    ) -> Result<String, SummaryError> {
        tracing::info!(
            file_id,
            user_id = %config.user_id,
            provider = %config.provider,
            model = %config.model,
            api_key = %api_key_fingerprint(&config.api_key),
            "Generating document summary"
        );

        let answer = self
            .llm
            .complete(CompletionRequest {
                prompt,
                provider: config.provider,
                model: config.model,
                api_key: config.api_key,
            })
            .await?;
        let summary = truncate_chars(&answer, SUMMARY_MAX_CHARS);

        let node = ChatNode::root(file_id, SUMMARY_INSTRUCTIONS, summary);
        let node_id = node.id.clone();
        self.chats.create(node).await?;
        if let Err(source) = self.documents.update_root(file_id, &node_id).await {
            tracing::error!(
                file_id,
                node_id = %node_id,
                error = %source,
                "Root node stored but document root pointer not updated; node is orphaned"
            );
            return Err(SummaryError::RootPointer { node_id, source });
        }

        tracing::info!(
            file_id,
            node_id = %node_id,
            summary_chars = summary.chars().count(),
            "Document summary stored"
        );
        Ok(summary.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DocumentRecord, MemoryStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedAnswer {
        answer: String,
        prompts: Mutex<Vec<String>>,
    }

    impl FixedAnswer {
        fn new(answer: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.into(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for FixedAnswer {
        async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
            self.prompts.lock().expect("prompts").push(request.prompt);
            Ok(self.answer.clone())
        }
    }

    struct StaticConfigs(Option<LlmConfig>);

    #[async_trait]
    impl LlmConfigResolver for StaticConfigs {
        async fn get(&self, user_id: &str) -> Result<LlmConfig, LlmConfigError> {
            self.0
                .clone()
                .ok_or_else(|| LlmConfigError::NotFound(user_id.to_string()))
        }
    }

    fn configured() -> Arc<StaticConfigs> {
        Arc::new(StaticConfigs(Some(LlmConfig {
            api_key: "key".into(),
            model: "model".into(),
            provider: "openai".into(),
            user_id: "u1".into(),
        })))
    }

    async fn setup(
        llm: Arc<FixedAnswer>,
        configs: Arc<StaticConfigs>,
    ) -> (SummaryGenerator, Arc<MemoryStore>, Arc<AccumulatorRegistry>) {
        let store = Arc::new(MemoryStore::new());
        DocumentStore::create(store.as_ref(), DocumentRecord::new("d1", "u1"))
            .await
            .expect("document");
        let accumulators = Arc::new(AccumulatorRegistry::new());
        let generator = SummaryGenerator::new(
            accumulators.clone(),
            configs,
            llm,
            store.clone(),
            store.clone(),
        );
        (generator, store, accumulators)
    }

    #[test]
    fn truncation_counts_characters() {
        let long = "a".repeat(3500);
        assert_eq!(truncate_chars(&long, SUMMARY_MAX_CHARS).len(), 3000);
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[tokio::test]
    async fn summary_becomes_root_node() {
        let llm = FixedAnswer::new("A concise summary.");
        let (generator, store, accumulators) = setup(llm.clone(), configured()).await;
        accumulators.open("d1", "paper.pdf\n").expect("open");
        accumulators.append_text("d1", "Intro", "hello");

        let summary = generator.generate("d1", "u1").await.expect("summary");
        assert_eq!(summary, "A concise summary.");

        let prompt = llm.prompts.lock().expect("prompts")[0].clone();
        assert!(prompt.starts_with(SUMMARY_INSTRUCTIONS));
        assert!(prompt.ends_with("paper.pdf\nIntro\nhello\n"));

        let record = store.get_by_id("d1").await.expect("record");
        let root = record.root.expect("root set");
        let node = store.get_node(&root).await.expect("node");
        assert!(node.parent_id.is_none());
        assert_eq!(node.question, SUMMARY_INSTRUCTIONS);
        assert_eq!(node.answer, "A concise summary.");
    }

    #[tokio::test]
    async fn long_answers_are_truncated_before_persisting() {
        let (generator, store, accumulators) =
            setup(FixedAnswer::new("x".repeat(4000)), configured()).await;
        accumulators.append_text("d1", "Intro", "hello");

        let summary = generator.generate("d1", "u1").await.expect("summary");
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS);

        let root = store.get_by_id("d1").await.expect("record").root.expect("root");
        assert_eq!(
            store.get_node(&root).await.expect("node").answer.chars().count(),
            SUMMARY_MAX_CHARS
        );
    }

    #[tokio::test]
    async fn missing_context_is_an_error() {
        let (generator, _store, _accumulators) =
            setup(FixedAnswer::new("unused"), configured()).await;
        let error = generator.generate("d1", "u1").await.expect_err("no context");
        assert!(matches!(error, SummaryError::ContextMissing(id) if id == "d1"));
    }

    #[tokio::test]
    async fn missing_config_is_an_error() {
        let llm = FixedAnswer::new("unused");
        let (generator, _store, accumulators) =
            setup(llm.clone(), Arc::new(StaticConfigs(None))).await;
        accumulators.append_text("d1", "Intro", "hello");

        let error = generator.generate("d1", "u1").await.expect_err("no config");
        assert!(matches!(error, SummaryError::Config(LlmConfigError::NotFound(_))));
        assert!(llm.prompts.lock().expect("prompts").is_empty());
    }

    #[tokio::test]
    async fn second_summary_leaves_orphan_and_fails() {
        let (generator, store, accumulators) =
            setup(FixedAnswer::new("summary"), configured()).await;
        accumulators.append_text("d1", "Intro", "hello");
        generator.generate("d1", "u1").await.expect("first");

        let error = generator.generate("d1", "u1").await.expect_err("second");
        let SummaryError::RootPointer { node_id, .. } = &error else {
            panic!("expected root pointer failure, got {error:?}");
        };
        assert!(store.get_node(node_id).await.is_ok());
        assert_eq!(store.nodes_for("d1").await.len(), 2);
    }

    fn paragraph_file() -> ProcessedFile {
        ProcessedFile::from_json(r#"{"paragraphs":[{"chapter":"Intro","content":"hello"}]}"#)
            .expect("file")
    }

    fn request_config() -> LlmConfig {
        LlmConfig {
            api_key: "request-key".into(),
            model: "request-model".into(),
            provider: "openai".into(),
            user_id: "u1".into(),
        }
    }

    #[tokio::test]
    async fn paragraphs_are_summarized_with_same_rules() {
        let llm = FixedAnswer::new("paragraph summary");
        let (generator, store, _accumulators) =
            setup(llm.clone(), Arc::new(StaticConfigs(None))).await;

        let summary = generator
            .summarize_paragraphs("d1", request_config(), &paragraph_file())
            .await
            .expect("summary");
        assert_eq!(summary, "paragraph summary");
        assert!(llm.prompts.lock().expect("prompts")[0].ends_with("Intro\nhello\n"));
        assert!(store.get_by_id("d1").await.expect("record").root.is_some());
    }

    #[tokio::test]
    async fn paragraphs_for_summarized_document_skip_the_llm() {
        let llm = FixedAnswer::new("summary");
        let (generator, store, _accumulators) = setup(llm.clone(), configured()).await;
        generator
            .summarize_paragraphs("d1", request_config(), &paragraph_file())
            .await
            .expect("first");

        let error = generator
            .summarize_paragraphs("d1", request_config(), &paragraph_file())
            .await
            .expect_err("second");
        assert!(matches!(error, SummaryError::AlreadySummarized(ref id) if id == "d1"));
        assert_eq!(llm.prompts.lock().expect("prompts").len(), 1);
        assert_eq!(store.nodes_for("d1").await.len(), 1);
    }

    #[tokio::test]
    async fn paragraphs_for_unknown_document_fail() {
        let llm = FixedAnswer::new("unused");
        let (generator, _store, _accumulators) = setup(llm.clone(), configured()).await;
        let error = generator
            .summarize_paragraphs("missing", request_config(), &paragraph_file())
            .await
            .expect_err("unknown document");
        assert!(matches!(
            error,
            SummaryError::Storage(StorageError::NotFound { .. })
        ));
        assert!(llm.prompts.lock().expect("prompts").is_empty());
    }
}
