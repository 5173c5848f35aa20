//! Scored entity pairs.

use crate::types::entity::EntityIndexMap;
use serde::{Deserialize, Serialize};

/// A deduplicated candidate link between two entities.
///
/// Rows are canonical: `a < b`, so an unordered pair has exactly one
/// representation and self-pairs cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidatePair {
    /// Similarity (inner product of unit vectors)
    pub score: f32,

    /// Lower row index
    pub a: u32,

    /// Higher row index
    pub b: u32,
}

impl CandidatePair {
    /// Create a pair from two distinct rows in any order.
    ///
    /// Returns `None` for a self-pair.
    pub fn canonical(score: f32, x: u32, y: u32) -> Option<Self> {
        match x.cmp(&y) {
            std::cmp::Ordering::Less => Some(Self { score, a: x, b: y }),
            std::cmp::Ordering::Greater => Some(Self { score, a: y, b: x }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Resolve both rows to identifiers.
    pub fn entities<'m>(&self, map: &'m EntityIndexMap) -> (&'m str, &'m str) {
        (map.entity(self.a), map.entity(self.b))
    }
}
