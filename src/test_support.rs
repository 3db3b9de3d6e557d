use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::database::VectorStore;
use crate::embeddings::provider::{EmbeddingBackend, EmbeddingProvider};
use crate::retrieval::RetrievalCoordinator;

/// a-z letter counts of `text`
pub(crate) fn letter_histogram(text: &str) -> Vec<f32> {
    let mut histogram = vec![0.0_f32; 26];
    for c in text.chars().filter(char::is_ascii_lowercase) {
        histogram[(c as u8 - b'a') as usize] += 1.0;
    }
    histogram
}

/// Deterministic backend embedding text as its letter histogram.
///
/// Texts containing `!` fail to embed.
pub(crate) struct LetterBackend {
    pub loads: AtomicUsize,
    pub embedded: AtomicUsize,
    pub delay: Duration,
    pub fail_all: bool,
    pub panic_on_embed: bool,
}

impl LetterBackend {
    pub fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            embedded: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_all: false,
            panic_on_embed: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::new()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic_on_embed: true,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl EmbeddingBackend for LetterBackend {
    fn model_name(&self) -> &str {
        "letter-histogram"
    }

    async fn load(&self) -> anyhow::Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panic_on_embed {
            panic!("backend crashed");
        }
        if self.fail_all {
            anyhow::bail!("inference server unreachable");
        }

        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        texts
            .iter()
            .map(|text| {
                if text.contains('!') {
                    anyhow::bail!("cannot embed {:?}", text);
                }
                Ok(letter_histogram(text))
            })
            .collect()
    }
}

/// Coordinator over `backend` with its store in `temp_dir`
pub(crate) fn coordinator(backend: &Arc<LetterBackend>, temp_dir: &TempDir) -> RetrievalCoordinator {
    let provider = EmbeddingProvider::new(Arc::clone(backend) as Arc<dyn EmbeddingBackend>)
        .with_batch_size(2);
    let store = VectorStore::new(temp_dir.path().join("vectors.db"));
    RetrievalCoordinator::new(provider, store)
}
