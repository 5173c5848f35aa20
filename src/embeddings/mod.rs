//! Embedding inputs: entity mapping, vector matrix, normalization.
//!
//! Upstream tooling exports a model's entity embeddings as an `.npy` matrix
//! alongside an identifier mapping; this module turns both into validated,
//! unit-length data ready for indexing.

pub mod mapping;
pub mod matrix;
pub mod normalize;

pub use mapping::{load_mapping, MappingFormat};
pub use matrix::{load_matrix, write_npy, EmbeddingMatrix};
pub use normalize::{l2_norm, normalize};
