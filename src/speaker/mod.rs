//! Speaker verification against enrolled voice embeddings.

pub mod cache;

pub use cache::EmbeddingCache;

use crate::defaults::SIMILARITY_SENTINEL;

/// Cosine similarity in `[-1, 1]`.
///
/// Returns [`SIMILARITY_SENTINEL`] when either vector is missing or empty,
/// the lengths differ, or either vector has zero norm.
pub fn cosine_similarity(a: Option<&[f32]>, b: Option<&[f32]>) -> f32 {
    let (Some(a), Some(b)) = (a, b) else {
        return SIMILARITY_SENTINEL;
    };
    if a.is_empty() || a.len() != b.len() {
        return SIMILARITY_SENTINEL;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return SIMILARITY_SENTINEL;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Outcome of comparing one utterance against the enrolled reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakerVerdict {
    pub similarity: f32,
    pub is_same: bool,
}

impl SpeakerVerdict {
    pub fn compare(reference: &[f32], candidate: &[f32], threshold: f32) -> Self {
        let similarity = cosine_similarity(Some(reference), Some(candidate));
        Self {
            similarity,
            is_same: similarity != SIMILARITY_SENTINEL && similarity >= threshold,
        }
    }
}
