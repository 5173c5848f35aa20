//! Batched neighbor search.
//!
//! Queries every row of the matrix against an index in one call and stores
//! the answers as two parallel row-major `N x K` tables, one of scores and
//! one of neighbor rows. Rows with fewer than `K` hits are padded with
//! [`NO_NEIGHBOR`] and a score of negative infinity.

use crate::embeddings::matrix::EmbeddingMatrix;
use crate::index::NeighborSearch;
use crate::types::error::{LinkerError, Result};
use rayon::prelude::*;

/// Padding id for missing neighbors.
pub const NO_NEIGHBOR: u32 = u32::MAX;

/// `N x K` neighbor ids and similarities, most similar first per row.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborTable {
    rows: usize,
    k: usize,
    scores: Vec<f32>,
    ids: Vec<u32>,
}

impl NeighborTable {
    /// Assemble a table from per-query hit lists (each at most `k` long).
    pub fn from_hits(k: usize, hits: Vec<Vec<(f32, u32)>>) -> Self {
        let rows = hits.len();
        let mut scores = vec![f32::NEG_INFINITY; rows * k];
        let mut ids = vec![NO_NEIGHBOR; rows * k];
        for (row, list) in hits.into_iter().enumerate() {
            for (slot, (score, id)) in list.into_iter().take(k).enumerate() {
                scores[row * k + slot] = score;
                ids[row * k + slot] = id;
            }
        }
        Self { rows, k, scores, ids }
    }

    /// Number of query rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Slots per row.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Similarities of row `row`.
    pub fn scores(&self, row: usize) -> &[f32] {
        &self.scores[row * self.k..(row + 1) * self.k]
    }

    /// Neighbor ids of row `row`.
    pub fn ids(&self, row: usize) -> &[u32] {
        &self.ids[row * self.k..(row + 1) * self.k]
    }

    /// Filled `(score, neighbor)` slots of row `row`.
    pub fn neighbors(&self, row: usize) -> impl Iterator<Item = (f32, u32)> + '_ {
        self.scores(row)
            .iter()
            .copied()
            .zip(self.ids(row).iter().copied())
            .filter(|&(_, id)| id != NO_NEIGHBOR)
    }
}

/// Search all rows of `matrix`, `k` neighbors each.
///
/// Runs on the current rayon pool. Output row order matches input order.
///
/// # Errors
///
/// Returns `LinkerError::Search` if the matrix and index dimensions differ
/// or `k` is zero.
pub fn search_all<I: NeighborSearch + ?Sized>(
    index: &I,
    matrix: &EmbeddingMatrix,
    k: usize,
) -> Result<NeighborTable> {
    let rows: Vec<usize> = (0..matrix.rows()).collect();
    search_rows(index, matrix, &rows, k)
}

/// Search the given `rows` of `matrix`; table row `i` answers `rows[i]`.
///
/// # Errors
///
/// Same as [`search_all`], plus `LinkerError::Search` for an out-of-range row.
pub fn search_rows<I: NeighborSearch + ?Sized>(
    index: &I,
    matrix: &EmbeddingMatrix,
    rows: &[usize],
    k: usize,
) -> Result<NeighborTable> {
    if k == 0 {
        return Err(LinkerError::search("k must be > 0"));
    }
    if index.dim() != matrix.dim() {
        return Err(LinkerError::search(format!(
            "Dimension mismatch: index has {}, queries have {}",
            index.dim(),
            matrix.dim()
        )));
    }
    if let Some(&bad) = rows.iter().find(|&&r| r >= matrix.rows()) {
        return Err(LinkerError::search(format!(
            "Query row {} out of range for {} rows",
            bad,
            matrix.rows()
        )));
    }

    tracing::info!("Searching {} neighbors for {} vectors", k, rows.len());
    let hits: Vec<Vec<(f32, u32)>> = rows
        .par_iter()
        .map(|&row| {
            index
                .search(matrix.row(row), k)
                .into_iter()
                .map(|n| (n.score, n.id))
                .collect()
        })
        .collect();

    Ok(NeighborTable::from_hits(k, hits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FlatIndex, HnswIndex, HnswParams, Metric};

    fn square() -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(&[
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![-1.0, 0.0],
            vec![0.0, -1.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_table_padding() {
        let table = NeighborTable::from_hits(3, vec![vec![(0.9, 1)], vec![]]);
        assert_eq!(table.ids(0), &[1, NO_NEIGHBOR, NO_NEIGHBOR]);
        assert_eq!(table.scores(1)[0], f32::NEG_INFINITY);
        assert_eq!(table.neighbors(0).collect::<Vec<_>>(), vec![(0.9, 1)]);
        assert_eq!(table.neighbors(1).count(), 0);
    }

    #[test]
    fn test_search_all_flat() {
        let m = square();
        let flat = FlatIndex::new(&m, Metric::InnerProduct);
        let table = search_all(&flat, &m, 4).unwrap();
        assert_eq!(table.rows(), 4);
        for row in 0..4 {
            // self first, opposite last
            assert_eq!(table.ids(row)[0], row as u32);
            assert_eq!(table.ids(row)[3], ((row + 2) % 4) as u32);
            assert!((table.scores(row)[3] + 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_search_all_hnsw_matches_flat_on_tiny_input() {
        let m = square();
        let index = HnswIndex::build(m.as_slice(), m.dim(), HnswParams::default()).unwrap();
        let flat = FlatIndex::new(&m, Metric::InnerProduct);
        assert_eq!(search_all(&index, &m, 4).unwrap(), search_all(&flat, &m, 4).unwrap());
    }

    #[test]
    fn test_dimension_mismatch() {
        let m = square();
        let flat = FlatIndex::new(&m, Metric::InnerProduct);
        let wide = EmbeddingMatrix::from_rows(&[vec![1.0, 0.0, 0.0]]).unwrap();
        let err = search_all(&flat, &wide, 2).unwrap_err();
        assert_eq!(err.kind(), "search_error");
        assert!(search_rows(&flat, &m, &[9], 2).is_err());
        assert!(search_all(&flat, &m, 0).is_err());
    }
}
