#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::embeddings::ollama::OllamaClient;
use crate::{DocchatError, Result};

/// A model that turns text into pooled embedding vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Model identifier, used in logs and error messages
    fn model_name(&self) -> &str;

    /// Make the model ready for use (fetch weights, verify availability).
    ///
    /// Called at most once per provider.
    async fn load(&self) -> anyhow::Result<()>;

    /// Embed every text, returning one vector per input in the same order.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Lazily initialized, shared embedding model.
///
/// The backend is loaded on the first `embed` call. Concurrent first calls
/// wait on the same initialization, and a failed initialization is
/// remembered: every later call fails with `ModelUnavailable` instead of
/// retrying the load or producing placeholder vectors.
///
/// Every vector leaves the provider L2-normalized, so chunk and query
/// embeddings are always directly comparable.
pub struct EmbeddingProvider {
    backend: Arc<dyn EmbeddingBackend>,
    state: OnceCell<std::result::Result<(), String>>,
    batch_size: usize,
    expected_dimension: Option<usize>,
}

impl EmbeddingProvider {
    #[inline]
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            backend,
            state: OnceCell::new(),
            batch_size: 16,
            expected_dimension: None,
        }
    }

    /// Provider backed by the Ollama server described in `config`
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = OllamaClient::new(&config.embedding)
            .map_err(|e| DocchatError::Config(format!("{:#}", e)))?;
        Ok(Self::new(Arc::new(client))
            .with_batch_size(config.embedding.batch_size as usize)
            .with_expected_dimension(Some(config.embedding.embedding_dimension as usize)))
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Reject vectors whose length differs from `dimension`
    #[inline]
    pub fn with_expected_dimension(mut self, dimension: Option<usize>) -> Self {
        self.expected_dimension = dimension;
        self
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Whether the model finished loading successfully
    #[inline]
    pub fn is_loaded(&self) -> bool {
        matches!(self.state.get(), Some(Ok(())))
    }

    /// Load the backend if this has not happened yet
    #[inline]
    pub async fn ensure_loaded(&self) -> Result<()> {
        let state = self
            .state
            .get_or_init(|| async {
                info!("Loading embedding model {}", self.backend.model_name());
                match self.backend.load().await {
                    Ok(()) => {
                        info!("Embedding model {} ready", self.backend.model_name());
                        Ok(())
                    }
                    Err(e) => {
                        error!(
                            "Failed to load embedding model {}: {:#}",
                            self.backend.model_name(),
                            e
                        );
                        Err(format!(
                            "failed to load model '{}': {:#}",
                            self.backend.model_name(),
                            e
                        ))
                    }
                }
            })
            .await;

        state.clone().map_err(DocchatError::ModelUnavailable)
    }

    /// Embed each text independently; output order matches input order
    #[inline]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.ensure_loaded().await?;

        debug!(
            "Embedding {} texts in batches of {}",
            texts.len(),
            self.batch_size
        );

        let batches = texts
            .chunks(self.batch_size)
            .map(|batch| self.embed_single_batch(batch));
        let results = try_join_all(batches).await?;

        Ok(results.into_iter().flatten().collect())
    }

    /// Embed a single text
    #[inline]
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| DocchatError::ModelUnavailable("model returned no vector".to_string()))
    }

    async fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = self.backend.embed_batch(texts).await.map_err(|e| {
            DocchatError::ModelUnavailable(format!(
                "model '{}' failed to embed {} texts: {:#}",
                self.backend.model_name(),
                texts.len(),
                e
            ))
        })?;

        if vectors.len() != texts.len() {
            return Err(DocchatError::ModelUnavailable(format!(
                "mismatch between request and response counts: {} vs {}",
                texts.len(),
                vectors.len()
            )));
        }

        for vector in &mut vectors {
            if vector.is_empty() {
                return Err(DocchatError::ModelUnavailable(
                    "model returned an empty embedding".to_string(),
                ));
            }
            if let Some(expected) = self.expected_dimension {
                if vector.len() != expected {
                    return Err(DocchatError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
            }
            normalize(vector);
        }

        Ok(vectors)
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left as-is.
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
