//! Recall of approximate neighbors against an exact scan.

use crate::embeddings::matrix::EmbeddingMatrix;
use crate::index::{FlatIndex, HnswIndex};
use crate::linker::search::{search_rows, NeighborTable, NO_NEIGHBOR};
use crate::types::error::Result;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;

/// Fraction of the true top-`k` ids found in the predicted top-`k`.
///
/// Padding ids are ignored. Returns 1.0 when the truth is empty.
pub fn recall_at_k(predicted: &[u32], truth: &[u32], k: usize) -> f64 {
    let truth: HashSet<u32> = truth
        .iter()
        .take(k)
        .copied()
        .filter(|&id| id != NO_NEIGHBOR)
        .collect();
    if truth.is_empty() {
        return 1.0;
    }
    let found = predicted
        .iter()
        .take(k)
        .filter(|id| truth.contains(id))
        .count();
    found as f64 / truth.len() as f64
}

/// Mean recall@k over the rows of two tables answering the same queries.
pub fn table_recall(approx: &NeighborTable, exact: &NeighborTable, k: usize) -> f64 {
    let rows = approx.rows().min(exact.rows());
    if rows == 0 {
        return 1.0;
    }
    let total: f64 = (0..rows)
        .map(|row| recall_at_k(approx.ids(row), exact.ids(row), k))
        .sum();
    total / rows as f64
}

/// Up to `count` distinct rows of `0..n`, ascending, drawn with `seed`.
pub fn sample_rows(n: usize, count: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = sample(&mut rng, n, count.min(n)).into_vec();
    rows.sort_unstable();
    rows
}

/// Recall measurement summary.
#[derive(Debug, Clone, Serialize)]
pub struct RecallReport {
    /// Neighbors per query
    pub k: usize,
    /// Queries measured
    pub queries: usize,
    /// Mean recall@k
    pub recall: f64,
    /// Query breadth used by the approximate index
    pub ef_search: usize,
    /// Approximate search time
    pub approx_ms: u64,
    /// Exact scan time
    pub exact_ms: u64,
}

/// Compare `index` with an exact scan of `matrix` on `queries` sampled rows.
///
/// Runs on the current rayon pool.
///
/// # Errors
///
/// Propagates `LinkerError::Search` from either search.
pub fn evaluate_recall(
    index: &HnswIndex,
    matrix: &EmbeddingMatrix,
    k: usize,
    queries: usize,
    seed: u64,
) -> Result<RecallReport> {
    let rows = sample_rows(matrix.rows(), queries, seed);

    let start = Instant::now();
    let approx = search_rows(index, matrix, &rows, k)?;
    let approx_ms = start.elapsed().as_millis() as u64;

    let flat = FlatIndex::new(matrix, index.params().metric);
    let start = Instant::now();
    let exact = search_rows(&flat, matrix, &rows, k)?;
    let exact_ms = start.elapsed().as_millis() as u64;

    let report = RecallReport {
        k,
        queries: rows.len(),
        recall: table_recall(&approx, &exact, k),
        ef_search: index.params().ef_search,
        approx_ms,
        exact_ms,
    };
    tracing::info!(
        "Recall@{} over {} queries: {:.4} (ef_search {})",
        report.k,
        report.queries,
        report.recall,
        report.ef_search
    );
    Ok(report)
}
