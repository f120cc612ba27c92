use super::{
    ChatNode, ChatStore, ChunkRecord, ChunkStore, DocumentPatch, DocumentRecord, DocumentStore,
    StorageError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process implementation of every record store.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, DocumentRecord>>,
    chunks: RwLock<HashMap<String, ChunkRecord>>,
    nodes: RwLock<HashMap<String, ChatNode>>,
    embedding_dimension: Option<usize>,
}

impl MemoryStore {
    /// Empty store accepting embeddings of any size.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject chunks whose embedding length differs from `dimension`.
    pub fn with_embedding_dimension(mut self, dimension: Option<usize>) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    /// Every node stored for a document.
    pub async fn nodes_for(&self, file_id: &str) -> Vec<ChatNode> {
        self.nodes
            .read()
            .await
            .values()
            .filter(|node| node.file_id == file_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, document: DocumentRecord) -> Result<(), StorageError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&document.file_id) {
            return Err(StorageError::AlreadyExists {
                entity: "document",
                id: document.file_id,
            });
        }
        documents.insert(document.file_id.clone(), document);
        Ok(())
    }

    async fn get_by_id(&self, file_id: &str) -> Result<DocumentRecord, StorageError> {
        self.documents
            .read()
            .await
            .get(file_id)
            .cloned()
            .ok_or_else(|| not_found("document", file_id))
    }

    async fn update_metadata(
        &self,
        file_id: &str,
        patch: DocumentPatch,
    ) -> Result<(), StorageError> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(file_id)
            .ok_or_else(|| not_found("document", file_id))?;
        document.apply(patch)
    }

    async fn update_root(&self, file_id: &str, root_id: &str) -> Result<(), StorageError> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(file_id)
            .ok_or_else(|| not_found("document", file_id))?;
        if let Some(root) = &document.root {
            return Err(StorageError::RootAlreadySet {
                file_id: file_id.to_string(),
                root: root.clone(),
            });
        }
        document.root = Some(root_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn create(&self, chunk: ChunkRecord) -> Result<(), StorageError> {
        if chunk.chunk_text.contains('\0') || chunk.chapter.contains('\0') {
            return Err(StorageError::Rejected(format!(
                "chunk '{}' contains NUL bytes",
                chunk.chunk_id
            )));
        }
        if let Some(expected) = self.embedding_dimension
            && chunk.embedding.len() != expected
        {
            return Err(StorageError::Rejected(format!(
                "chunk '{}' has embedding dimension {}, expected {expected}",
                chunk.chunk_id,
                chunk.embedding.len()
            )));
        }

        let mut chunks = self.chunks.write().await;
        if chunks.contains_key(&chunk.chunk_id) {
            return Err(StorageError::AlreadyExists {
                entity: "chunk",
                id: chunk.chunk_id,
            });
        }
        chunks.insert(chunk.chunk_id.clone(), chunk);
        Ok(())
    }

    async fn get_by_file_id(&self, file_id: &str) -> Result<Vec<ChunkRecord>, StorageError> {
        let mut chunks: Vec<_> = self
            .chunks
            .read()
            .await
            .values()
            .filter(|chunk| chunk.file_id == file_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        Ok(chunks)
    }

    async fn count_by_file_id(&self, file_id: &str) -> Result<usize, StorageError> {
        Ok(self
            .chunks
            .read()
            .await
            .values()
            .filter(|chunk| chunk.file_id == file_id)
            .count())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create(&self, node: ChatNode) -> Result<(), StorageError> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node.id) {
            return Err(StorageError::AlreadyExists {
                entity: "chat node",
                id: node.id,
            });
        }
        nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn get_node(&self, node_id: &str) -> Result<ChatNode, StorageError> {
        self.nodes
            .read()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| not_found("chat node", node_id))
    }
}

fn not_found(entity: &'static str, id: &str) -> StorageError {
    StorageError::NotFound {
        entity,
        id: id.to_string(),
    }
}
