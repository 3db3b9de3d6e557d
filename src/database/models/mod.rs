#[cfg(test)]
mod tests;

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

use crate::{DocchatError, Result};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// A stored chunk record, as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: i64,
    pub embedding: Vec<f32>,
    pub text: String,
    pub document_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub embedding: Vec<f32>,
    pub text: String,
    pub document_id: String,
}

impl NewChunk {
    #[inline]
    pub fn new(embedding: Vec<f32>, text: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            embedding,
            text: text.into(),
            document_id: document_id.into(),
        }
    }
}

/// A search hit. `score` is NaN when either vector had zero magnitude and
/// travels as `null` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub text: String,
    #[serde(deserialize_with = "nullable_score")]
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub name: String,
}

fn nullable_score<'de, D>(deserializer: D) -> std::result::Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::NAN))
}

/// Row layout of the `chunks` table
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ChunkRow {
    pub id: i64,
    pub doc_id: String,
    pub document: String,
    pub embedding: Vec<u8>,
    pub dimension: i64,
}

impl ChunkRow {
    pub(crate) fn into_chunk(self) -> Result<Chunk> {
        let dimension = usize::try_from(self.dimension).map_err(|_| {
            DocchatError::StorageUnavailable(format!(
                "chunk {} has invalid dimension {}",
                self.id, self.dimension
            ))
        })?;
        let embedding = decode_embedding(&self.embedding, dimension).map_err(|e| match e {
            DocchatError::StorageUnavailable(msg) => {
                DocchatError::StorageUnavailable(format!("chunk {}: {}", self.id, msg))
            }
            other => other,
        })?;

        Ok(Chunk {
            id: self.id,
            embedding,
            text: self.document,
            document_id: self.doc_id,
        })
    }
}

/// Little-endian `f32` blob
#[inline]
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[inline]
pub fn decode_embedding(blob: &[u8], dimension: usize) -> Result<Vec<f32>> {
    let expected_len = dimension.checked_mul(F32_BYTES).ok_or_else(|| {
        DocchatError::StorageUnavailable(format!("embedding dimension {} overflows", dimension))
    })?;
    if blob.len() != expected_len {
        return Err(DocchatError::StorageUnavailable(format!(
            "invalid embedding byte length: expected {}, got {}",
            expected_len,
            blob.len()
        )));
    }

    Ok(blob
        .chunks_exact(F32_BYTES)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect())
}
