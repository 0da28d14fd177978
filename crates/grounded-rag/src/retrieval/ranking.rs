//! Similarity and deterministic ranking

use std::cmp::Ordering;

use crate::providers::VectorSearchHit;

/// Cosine similarity, accumulated in f64
///
/// Returns 0.0 for mismatched lengths or a zero-norm vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        return 0.0;
    }

    (dot / denominator).clamp(-1.0, 1.0) as f32
}

/// Keep hits with `similarity >= min_similarity`, best first, at most `top_k`
///
/// Ties go to the smaller fragment index, then document id, so equal scores
/// always come back in the same order.
pub fn rank(mut hits: Vec<VectorSearchHit>, min_similarity: f32, top_k: usize) -> Vec<VectorSearchHit> {
    hits.retain(|hit| hit.similarity >= min_similarity);
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.fragment_index.cmp(&b.fragment_index))
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.fragment_id.cmp(&b.fragment_id))
    });
    hits.truncate(top_k);
    hits
}
