//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! Layered proximity graph: sparse upper layers route a query towards its
//! region, the dense layer 0 refines it with a beam of width `ef_search`.
//! Stored vectors are kept at full `f32` precision so reported similarities
//! are exact for the neighbors that are found.

/// Batched parallel construction.
pub mod build;
/// Graph structure, parameters and statistics.
pub mod graph;
/// Layer search and k-NN queries.
pub mod search;
/// Epoch-stamped visited set.
pub mod visited;

pub use graph::{GraphStats, HnswIndex, HnswParams};
