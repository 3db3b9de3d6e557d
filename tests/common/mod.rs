#![allow(dead_code, reason = "shared between integration test binaries")]

use async_trait::async_trait;
use docchat::embeddings::EmbeddingBackend;

/// a-z letter counts of `text`
pub fn letter_histogram(text: &str) -> Vec<f32> {
    let mut histogram = vec![0.0_f32; 26];
    for c in text.chars().filter(char::is_ascii_lowercase) {
        histogram[(c as u8 - b'a') as usize] += 1.0;
    }
    histogram
}

/// Offline backend embedding text as its letter histogram
pub struct LetterBackend;

#[async_trait]
impl EmbeddingBackend for LetterBackend {
    fn model_name(&self) -> &str {
        "letter-histogram"
    }

    async fn load(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| letter_histogram(text)).collect())
    }
}

pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}
