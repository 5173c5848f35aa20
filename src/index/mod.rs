//! Vector indexes for similarity search.
//!
//! Provides:
//! - HNSW approximate index (graph-based, sub-linear queries)
//! - Flat exact index (linear scan, recall reference)
//! - On-disk cache for built HNSW graphs

pub mod cache;
pub mod flat;
pub mod hnsw;
pub mod metric;

pub use cache::{CacheOutcome, CachePolicy, IndexCache};
pub use flat::FlatIndex;
pub use hnsw::{HnswIndex, HnswParams};
pub use metric::Metric;

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row index of the stored vector
    pub id: u32,

    /// Similarity to the query (higher is closer)
    pub score: f32,
}

/// Index that answers k-nearest-neighbor queries by similarity.
///
/// Implementations are shared across search workers.
pub trait NeighborSearch: Sync {
    /// Vector dimensionality.
    fn dim(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    /// True if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `k` neighbors of `query`, most similar first.
    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor>;
}

impl NeighborSearch for HnswIndex {
    fn dim(&self) -> usize {
        HnswIndex::dim(self)
    }

    fn len(&self) -> usize {
        HnswIndex::len(self)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        self.knn(query, k)
            .into_iter()
            .map(|(score, id)| Neighbor { id, score })
            .collect()
    }
}
