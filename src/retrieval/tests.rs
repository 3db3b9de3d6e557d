use super::*;
use crate::dispatcher::protocol::ErrorKind;
use crate::test_support::{LetterBackend, coordinator};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

struct Fixture {
    _temp_dir: TempDir,
    backend: Arc<LetterBackend>,
    coordinator: RetrievalCoordinator,
}

fn fixture() -> Fixture {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let backend = Arc::new(LetterBackend::new());
    let coordinator = coordinator(&backend, &temp_dir);

    Fixture {
        _temp_dir: temp_dir,
        backend,
        coordinator,
    }
}

#[tokio::test]
async fn ingest_chunks_and_stores_document() -> Result<()> {
    let f = fixture();

    let stored = f
        .coordinator
        .ingest(&[DocumentInput::new("doc1", "abcdefghij")], 4)
        .await?;
    assert_eq!(stored, 3);

    let texts: Vec<String> = f
        .coordinator
        .get_document("doc1")
        .await?
        .into_iter()
        .map(|c| c.text)
        .collect();
    assert_eq!(texts, vec!["abcd", "efgh", "ij"]);

    let documents = f.coordinator.list_documents().await?;
    assert_eq!(
        documents,
        vec![DocumentSummary {
            name: "doc1".to_string()
        }]
    );
    Ok(())
}

#[tokio::test]
async fn stored_chunks_are_normalized_and_tagged() -> Result<()> {
    let f = fixture();
    f.coordinator
        .ingest(&[DocumentInput::new("notes.txt", "aabb")], 10)
        .await?;

    let chunks = f.coordinator.get_document("notes.txt").await?;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].document_id, "notes.txt");
    let norm = chunks[0].embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-6);
    Ok(())
}

#[tokio::test]
async fn invalid_chunk_size_touches_nothing() {
    let f = fixture();

    let err = f
        .coordinator
        .ingest(&[DocumentInput::new("doc", "text")], 0)
        .await
        .expect_err("zero chunk size must fail");

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(f.backend.loads.load(Ordering::SeqCst), 0);
    assert!(!f.coordinator.store().is_open());
}

#[tokio::test]
async fn unnamed_document_is_rejected() {
    let f = fixture();

    let err = f
        .coordinator
        .ingest(&[DocumentInput::new("", "text")], 4)
        .await
        .expect_err("empty name must fail");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn embedding_failure_aborts_the_document() -> Result<()> {
    let f = fixture();

    let err = f
        .coordinator
        .ingest(
            &[
                DocumentInput::new("good", "abcdefgh"),
                DocumentInput::new("bad", "abcd!fghijkl"),
                DocumentInput::new("later", "mnop"),
            ],
            4,
        )
        .await
        .expect_err("failing chunk must fail the request");

    assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    assert_eq!(f.coordinator.get_document("good").await?.len(), 2);
    assert!(f.coordinator.get_document("bad").await?.is_empty());
    assert!(f.coordinator.get_document("later").await?.is_empty());
    assert_eq!(f.coordinator.store().count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn empty_document_stores_nothing() -> Result<()> {
    let f = fixture();

    let stored = f
        .coordinator
        .ingest(&[DocumentInput::new("empty.txt", "")], 4)
        .await?;

    assert_eq!(stored, 0);
    assert!(f.coordinator.list_documents().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn search_embeds_query_exactly_once() -> Result<()> {
    let f = fixture();
    f.coordinator
        .ingest(&[DocumentInput::new("doc", "aaaabbbbcccc")], 4)
        .await?;
    let before = f.backend.embedded.load(Ordering::SeqCst);

    f.coordinator.search("bbb", 2).await?;

    assert_eq!(f.backend.embedded.load(Ordering::SeqCst), before + 1);
    assert_eq!(f.backend.loads.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn search_finds_closest_chunk() -> Result<()> {
    let f = fixture();
    f.coordinator
        .ingest(
            &[
                DocumentInput::new("first", "aaaabbbb"),
                DocumentInput::new("second", "cccc"),
            ],
            4,
        )
        .await?;

    let results = f.coordinator.search("bb", 2).await?;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].text, "bbbb");
    assert!((results[0].score - 1.0).abs() < 1e-6);
    assert_eq!(results[1].score, 0.0);
    Ok(())
}

#[tokio::test]
async fn search_on_empty_store_returns_nothing() -> Result<()> {
    let f = fixture();
    assert!(f.coordinator.search("anything", 4).await?.is_empty());
    Ok(())
}

#[test]
fn context_serialization() -> Result<()> {
    let results = vec![
        ScoredChunk {
            text: "X".to_string(),
            score: 1.0,
        },
        ScoredChunk {
            text: "say \"hi\"".to_string(),
            score: 0.25,
        },
    ];

    assert_eq!(
        serialize_context(&results)?,
        r#"[{"text":"X","score":1.0},{"text":"say \"hi\"","score":0.25}]"#
    );
    assert_eq!(
        context_message(&results[..1])?,
        r#"Vector Store Results: [{"text":"X","score":1.0}]"#
    );
    assert_eq!(context_message(&[])?, "Vector Store Results: []");
    Ok(())
}

#[test]
fn coordinator_from_config_points_at_vectors_db() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };

    let coordinator = RetrievalCoordinator::from_config(&config)?;
    assert_eq!(coordinator.store().path(), temp_dir.path().join("vectors.db"));
    assert!(!coordinator.provider().is_loaded());
    Ok(())
}
