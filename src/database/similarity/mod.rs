
use std::cmp::Ordering;

use crate::{DocchatError, Result};

/// Cosine of the angle between `a` and `b`.
///
/// Returns NaN when either vector has zero magnitude: there is no direction to
/// compare, and callers rank NaN below every real score.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(DocchatError::InvalidArgument(format!(
            "cannot compare vectors of length {} and {}",
            a.len(),
            b.len()
        )));
    }

    // f64 keeps squared norms of extreme f32 magnitudes finite and nonzero
    let dot_product: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x) * f64::from(*x)).sum();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x) * f64::from(*x)).sum();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(f32::NAN);
    }

    let similarity = dot_product / (norm_a.sqrt() * norm_b.sqrt());
    Ok(similarity.clamp(-1.0, 1.0) as f32)
}

/// Descending by score, NaN after every real score
#[inline]
pub fn compare_scores(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    }
}

/// Score every candidate against `query` and keep the best `top_k`.
///
/// Candidates are expected in insertion order; the sort is stable, so equal
/// scores keep that order.
#[inline]
pub fn rank_by_similarity<T, V>(
    query: &[f32],
    candidates: impl IntoIterator<Item = (T, V)>,
    top_k: usize,
) -> Result<Vec<(T, f32)>>
where
    V: AsRef<[f32]>,
{
    let mut scored = candidates
        .into_iter()
        .map(|(item, embedding)| Ok((item, cosine_similarity(embedding.as_ref(), query)?)))
        .collect::<Result<Vec<_>>>()?;

    scored.sort_by(|(_, a), (_, b)| compare_scores(*a, *b));
    scored.truncate(top_k);

    Ok(scored)
}
