#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::database::{Chunk, DocumentSummary, NewChunk, ScoredChunk, VectorStore};
use crate::embeddings::chunking::{chunk_text, validate_chunk_size};
use crate::embeddings::provider::EmbeddingProvider;
use crate::{DocchatError, Result};

/// Prefix of the system message that carries search results to the chat model
pub const CONTEXT_PREFIX: &str = "Vector Store Results: ";

/// Extracted text of one user-supplied file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInput {
    pub text: String,
    pub name: String,
}

impl DocumentInput {
    #[inline]
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            name: name.into(),
        }
    }
}

/// Ties chunking, embedding and storage together.
///
/// One coordinator owns the model and the store for the lifetime of the
/// background context; both are initialized lazily on first use.
pub struct RetrievalCoordinator {
    provider: EmbeddingProvider,
    store: VectorStore,
}

impl RetrievalCoordinator {
    #[inline]
    pub fn new(provider: EmbeddingProvider, store: VectorStore) -> Self {
        Self { provider, store }
    }

    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = EmbeddingProvider::from_config(config)?;
        let store = VectorStore::new(config.database_path());
        Ok(Self::new(provider, store))
    }

    #[inline]
    pub fn provider(&self) -> &EmbeddingProvider {
        &self.provider
    }

    #[inline]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Chunk, embed and store every document, in order. Returns the number of
    /// chunks stored.
    ///
    /// Each document is written all-or-nothing. The first failure aborts the
    /// request; documents before it stay stored.
    pub async fn ingest(&self, documents: &[DocumentInput], chunk_size: usize) -> Result<usize> {
        validate_chunk_size(chunk_size)?;
        if let Some(unnamed) = documents.iter().position(|d| d.name.is_empty()) {
            return Err(DocchatError::InvalidArgument(format!(
                "document {} has an empty name",
                unnamed
            )));
        }

        self.store.open().await?;

        let mut stored = 0;
        for document in documents {
            let chunks = chunk_text(&document.text, chunk_size)?;
            if chunks.is_empty() {
                debug!("Document {} has no text, skipping", document.name);
                continue;
            }

            let embeddings = self.provider.embed(&chunks).await?;
            let records = embeddings
                .into_iter()
                .zip(chunks)
                .map(|(embedding, text)| NewChunk::new(embedding, text, document.name.as_str()))
                .collect::<Vec<_>>();

            let ids = self.store.insert_many(records).await?;
            info!("Stored {} chunks for document {}", ids.len(), document.name);
            stored += ids.len();
        }

        Ok(stored)
    }

    /// Embed `query` once and return the `top_k` closest chunks
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let embedding = self.provider.embed_one(query).await?;
        self.store.open().await?;

        let results = self.store.similarity_search(&embedding, top_k).await?;
        debug!("Search returned {} of top {} results", results.len(), top_k);
        Ok(results)
    }

    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.store.list_documents().await
    }

    #[inline]
    pub async fn get_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        self.store.get_by_document_id(document_id).await
    }
}

/// Search results as the JSON array handed to the chat model
#[inline]
pub fn serialize_context(results: &[ScoredChunk]) -> Result<String> {
    serde_json::to_string(results)
        .map_err(|e| DocchatError::Other(anyhow::Error::new(e).context("serialize context")))
}

/// System message carrying search results: `Vector Store Results: <json>`
#[inline]
pub fn context_message(results: &[ScoredChunk]) -> Result<String> {
    Ok(format!("{}{}", CONTEXT_PREFIX, serialize_context(results)?))
}
