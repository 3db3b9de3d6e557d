use super::*;
use crate::dispatcher::protocol::ErrorKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Backend that embeds text as `[len, vowels, 1.0]` (or a fixed-width variant)
struct CountingBackend {
    loads: AtomicUsize,
    calls: AtomicUsize,
    fail_load: bool,
    fail_embed: bool,
    drop_last: bool,
    width: usize,
}

impl CountingBackend {
    fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            fail_load: false,
            fail_embed: false,
            drop_last: false,
            width: 3,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for CountingBackend {
    fn model_name(&self) -> &str {
        "counting-test-model"
    }

    async fn load(&self) -> anyhow::Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail_load {
            anyhow::bail!("weights download failed");
        }
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed {
            anyhow::bail!("inference failed");
        }
        let mut vectors: Vec<Vec<f32>> = texts
            .iter()
            .map(|text| {
                let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count();
                let mut v = vec![text.len() as f32, vowels as f32, 1.0];
                v.resize(self.width, 0.5);
                v
            })
            .collect();
        if self.drop_last {
            vectors.pop();
        }
        Ok(vectors)
    }
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn embeds_one_vector_per_text_in_order() {
    let provider = EmbeddingProvider::new(Arc::new(CountingBackend::new()));

    let vectors = provider
        .embed(&texts(&["a", "bbbb", "ccccccccc"]))
        .await
        .expect("embedding should succeed");

    assert_eq!(vectors.len(), 3);
    let expected_first = {
        let mut v = vec![1.0_f32, 1.0, 1.0];
        normalize(&mut v);
        v
    };
    assert_eq!(vectors[0], expected_first);
    // longer texts lean further along the first axis
    assert!(vectors[2][0] > vectors[1][0]);
}

#[tokio::test]
async fn vectors_are_unit_length() {
    let provider = EmbeddingProvider::new(Arc::new(CountingBackend::new()));

    let vectors = provider
        .embed(&texts(&["hello world", "query text"]))
        .await
        .expect("embedding should succeed");

    for vector in vectors {
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}

#[tokio::test]
async fn model_loads_lazily_and_once() {
    let backend = Arc::new(CountingBackend::new());
    let provider = EmbeddingProvider::new(Arc::clone(&backend) as Arc<dyn EmbeddingBackend>);

    assert!(!provider.is_loaded());
    assert_eq!(backend.loads.load(Ordering::SeqCst), 0);

    provider.embed_one("first").await.expect("should embed");
    provider.embed_one("second").await.expect("should embed");

    assert!(provider.is_loaded());
    assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_first_use_loads_once() {
    let backend = Arc::new(CountingBackend::new());
    let provider = EmbeddingProvider::new(Arc::clone(&backend) as Arc<dyn EmbeddingBackend>);

    let calls = (0..8).map(|i| {
        let provider = &provider;
        async move { provider.embed_one(&format!("query {}", i)).await }
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(std::result::Result::is_ok));
    assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_load_is_sticky() {
    let backend = Arc::new(CountingBackend {
        fail_load: true,
        ..CountingBackend::new()
    });
    let provider = EmbeddingProvider::new(Arc::clone(&backend) as Arc<dyn EmbeddingBackend>);

    for _ in 0..3 {
        let err = provider
            .embed_one("anything")
            .await
            .expect_err("load failure must surface");
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
        assert!(err.to_string().contains("weights download failed"));
    }

    assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert!(!provider.is_loaded());
}

#[tokio::test]
async fn embed_failure_is_model_unavailable() {
    let provider = EmbeddingProvider::new(Arc::new(CountingBackend {
        fail_embed: true,
        ..CountingBackend::new()
    }));

    let err = provider
        .embed(&texts(&["a"]))
        .await
        .expect_err("embed failure must surface");
    assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
}

#[tokio::test]
async fn short_response_is_rejected() {
    let provider = EmbeddingProvider::new(Arc::new(CountingBackend {
        drop_last: true,
        ..CountingBackend::new()
    }));

    let err = provider
        .embed(&texts(&["a", "b"]))
        .await
        .expect_err("count mismatch must fail");
    assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
}

#[tokio::test]
async fn unexpected_dimension_is_rejected() {
    let provider = EmbeddingProvider::new(Arc::new(CountingBackend::new()))
        .with_expected_dimension(Some(384));

    let err = provider
        .embed_one("text")
        .await
        .expect_err("dimension mismatch must fail");
    assert!(matches!(
        err,
        DocchatError::DimensionMismatch {
            expected: 384,
            actual: 3
        }
    ));
}

#[tokio::test]
async fn texts_are_split_into_batches() {
    let backend = Arc::new(CountingBackend {
        width: 8,
        ..CountingBackend::new()
    });
    let provider = EmbeddingProvider::new(Arc::clone(&backend) as Arc<dyn EmbeddingBackend>)
        .with_batch_size(2)
        .with_expected_dimension(Some(8));

    let inputs: Vec<String> = (0..5).map(|i| "x".repeat(i + 1)).collect();
    let vectors = provider.embed(&inputs).await.expect("should embed");

    assert_eq!(vectors.len(), 5);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    // order survives concurrent batches: lengths grow with input index
    let firsts: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert!(firsts.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn empty_input_does_not_load_model() {
    let backend = Arc::new(CountingBackend::new());
    let provider = EmbeddingProvider::new(Arc::clone(&backend) as Arc<dyn EmbeddingBackend>);

    let vectors = provider.embed(&[]).await.expect("empty input is fine");
    assert!(vectors.is_empty());
    assert_eq!(backend.loads.load(Ordering::SeqCst), 0);
}

#[test]
fn normalize_scales_to_unit_length() {
    let mut v = vec![3.0_f32, 4.0];
    normalize(&mut v);
    assert!((v[0] - 0.6).abs() < 1e-6);
    assert!((v[1] - 0.8).abs() < 1e-6);
}

#[test]
fn normalize_leaves_zero_vector_alone() {
    let mut v = vec![0.0_f32; 4];
    normalize(&mut v);
    assert_eq!(v, vec![0.0; 4]);
}

#[test]
fn provider_from_default_config() {
    let provider = EmbeddingProvider::from_config(&Config::default()).expect("should build");
    assert_eq!(provider.model_name(), "all-minilm:latest");
    assert!(!provider.is_loaded());
}
