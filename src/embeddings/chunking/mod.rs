
use itertools::Itertools;
use tracing::debug;

use crate::{DocchatError, Result};

/// Default chunk width in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Split text into contiguous, non-overlapping chunks of `size` characters.
///
/// Slicing is purely positional: no trimming, no normalization and no
/// word or sentence boundary detection. The final chunk may be shorter than
/// `size`. Sizes are counted in Unicode scalar values, so a chunk never ends
/// in the middle of a multi-byte character.
///
/// Identical input always yields identical chunks, and concatenating the
/// result reproduces `text` exactly.
#[inline]
pub fn chunk_text(text: &str, size: usize) -> Result<Vec<String>> {
    validate_chunk_size(size)?;

    let mut chunks = Vec::with_capacity(chunk_count(text.chars().count(), size));
    let grouped = text.chars().chunks(size);
    for chunk in &grouped {
        chunks.push(chunk.collect::<String>());
    }

    debug!(
        "Chunked {} characters into {} chunks of up to {} characters",
        text.len(),
        chunks.len(),
        size
    );

    Ok(chunks)
}

/// Number of chunks `chunk_text` produces for `char_len` characters.
#[inline]
pub fn chunk_count(char_len: usize, size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    char_len.div_ceil(size)
}

#[inline]
pub fn validate_chunk_size(size: usize) -> Result<()> {
    if size == 0 {
        return Err(DocchatError::InvalidArgument(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
