//! L2 normalization so that inner product equals cosine similarity.

use crate::embeddings::matrix::EmbeddingMatrix;
use crate::types::entity::EntityIndexMap;
use crate::types::error::{LinkerError, Result};

/// Euclidean norm of `v`, accumulated in `f64`.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt() as f32
}

/// Rescale every row of `matrix` to unit length in place.
///
/// All norms are checked before any row is modified, so a failure leaves
/// the matrix untouched.
///
/// # Errors
///
/// Returns `LinkerError::DegenerateVector` for the first row whose norm is
/// zero, NaN or infinite.
pub fn normalize(matrix: &mut EmbeddingMatrix, entities: &EntityIndexMap) -> Result<()> {
    let norms: Vec<f32> = matrix.iter_rows().map(l2_norm).collect();

    if let Some((row, &norm)) = norms
        .iter()
        .enumerate()
        .find(|(_, n)| !n.is_finite() || **n == 0.0)
    {
        let entity = if row < entities.len() {
            entities.entity(row as u32).to_string()
        } else {
            format!("#{}", row)
        };
        return Err(LinkerError::DegenerateVector { row, entity, norm });
    }

    for (row, norm) in norms.into_iter().enumerate() {
        for x in matrix.row_mut(row) {
            *x /= norm;
        }
    }

    Ok(())
}
