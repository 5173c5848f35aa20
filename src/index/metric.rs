//! Similarity metrics.
//!
//! All metrics return a **similarity** where higher is better.

use serde::{Deserialize, Serialize};

/// Similarity function used by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Plain inner product. Equals cosine similarity on unit vectors.
    #[default]
    InnerProduct,
    /// Cosine similarity, normalizing on the fly.
    Cosine,
}

impl Metric {
    /// Similarity between `a` and `b` (same length).
    #[inline]
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Self::InnerProduct => dot(a, b),
            Self::Cosine => {
                let denom = (dot(a, a) * dot(b, b)).sqrt();
                if denom == 0.0 {
                    0.0
                } else {
                    dot(a, b) / denom
                }
            }
        }
    }

    /// Stable name, stored in cache headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InnerProduct => "inner_product",
            Self::Cosine => "cosine",
        }
    }

    pub(crate) fn code(&self) -> u8 {
        match self {
            Self::InnerProduct => 0,
            Self::Cosine => 1,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::InnerProduct),
            1 => Some(Self::Cosine),
            _ => None,
        }
    }
}

/// Inner product, four lanes at a time so the compiler can vectorize.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 4];
    let chunks_a = a.chunks_exact(4);
    let chunks_b = b.chunks_exact(4);
    let tail: f32 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| x * y)
        .sum();

    for (ca, cb) in chunks_a.zip(chunks_b) {
        acc[0] += ca[0] * cb[0];
        acc[1] += ca[1] * cb[1];
        acc[2] += ca[2] * cb[2];
        acc[3] += ca[3] * cb[3];
    }

    (acc[0] + acc[1]) + (acc[2] + acc[3]) + tail
}
