use super::*;
use crate::dispatcher::protocol::ErrorKind;

#[test]
fn chunk_serializes_with_document_id() {
    let chunk = Chunk {
        id: 7,
        embedding: vec![0.5, -0.5],
        text: "abcd".to_string(),
        document_id: "doc1".to_string(),
    };

    let json = serde_json::to_value(&chunk).expect("Failed to serialize chunk");
    assert_eq!(
        json,
        serde_json::json!({
            "id": 7,
            "embedding": [0.5, -0.5],
            "text": "abcd",
            "documentId": "doc1"
        })
    );

    let back: Chunk = serde_json::from_value(json).expect("Failed to deserialize chunk");
    assert_eq!(back, chunk);
}

#[test]
fn nan_score_travels_as_null() {
    let hit = ScoredChunk {
        text: "zero".to_string(),
        score: f32::NAN,
    };

    let json = serde_json::to_string(&hit).expect("Failed to serialize hit");
    assert_eq!(json, r#"{"text":"zero","score":null}"#);

    let back: ScoredChunk = serde_json::from_str(&json).expect("Failed to deserialize hit");
    assert!(back.score.is_nan());
}

#[test]
fn embedding_blob_layout() {
    let blob = encode_embedding(&[1.0, -2.5, 0.0]);
    assert_eq!(blob.len(), 12);
    assert_eq!(&blob[0..4], &1.0_f32.to_le_bytes());

    let decoded = decode_embedding(&blob, 3).expect("Failed to decode blob");
    assert_eq!(decoded, vec![1.0, -2.5, 0.0]);
}

#[test]
fn truncated_blob_is_storage_error() {
    let blob = encode_embedding(&[1.0, 2.0]);
    let err = decode_embedding(&blob[..7], 2).expect_err("short blob must fail");
    assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
}

#[test]
fn row_converts_to_chunk() {
    let row = ChunkRow {
        id: 3,
        doc_id: "notes.txt".to_string(),
        document: "hello".to_string(),
        embedding: encode_embedding(&[0.6, 0.8]),
        dimension: 2,
    };

    let chunk = row.into_chunk().expect("row should convert");
    assert_eq!(chunk.id, 3);
    assert_eq!(chunk.document_id, "notes.txt");
    assert_eq!(chunk.text, "hello");
    assert_eq!(chunk.embedding, vec![0.6, 0.8]);
}

#[test]
fn row_with_wrong_dimension_is_rejected() {
    let row = ChunkRow {
        id: 9,
        doc_id: "a".to_string(),
        document: "b".to_string(),
        embedding: encode_embedding(&[1.0, 2.0, 3.0]),
        dimension: 4,
    };

    let err = row.into_chunk().expect_err("dimension mismatch must fail");
    assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    assert!(err.to_string().contains("chunk 9"));
}
