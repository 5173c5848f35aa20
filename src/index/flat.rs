//! Exact brute-force index.
//!
//! Scores every stored vector per query. Used as the reference when
//! measuring the recall of the approximate index, and handy for small inputs.

use crate::embeddings::matrix::EmbeddingMatrix;
use crate::index::hnsw::search::sort_by_similarity;
use crate::index::metric::Metric;
use crate::index::{Neighbor, NeighborSearch};

/// Linear-scan index over a copy of the vectors.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    dim: usize,
    vectors: Vec<f32>,
}

impl FlatIndex {
    /// Index every row of `matrix`.
    pub fn new(matrix: &EmbeddingMatrix, metric: Metric) -> Self {
        Self {
            metric,
            dim: matrix.dim(),
            vectors: matrix.as_slice().to_vec(),
        }
    }
}

impl NeighborSearch for FlatIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.vectors.len() / self.dim
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        if k == 0 || self.dim == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f32, u32)> = self
            .vectors
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(id, v)| (self.metric.similarity(query, v), id as u32))
            .collect();

        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, |a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
            scored.truncate(k);
        }
        sort_by_similarity(&mut scored);

        scored
            .into_iter()
            .map(|(score, id)| Neighbor { id, score })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_order() {
        let m = EmbeddingMatrix::from_rows(&[
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.8, 0.6],
            vec![-1.0, 0.0],
        ])
        .unwrap();
        let flat = FlatIndex::new(&m, Metric::InnerProduct);
        let hits = flat.search(&[1.0, 0.0], 3);
        let ids: Vec<u32> = hits.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![0, 2, 1]);
        assert_eq!(flat.len(), 4);
    }

    #[test]
    fn test_k_larger_than_len() {
        let m = EmbeddingMatrix::from_rows(&[vec![1.0], vec![2.0]]).unwrap();
        let flat = FlatIndex::new(&m, Metric::InnerProduct);
        assert_eq!(flat.search(&[1.0], 10).len(), 2);
    }
}
