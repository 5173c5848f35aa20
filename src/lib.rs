//! Entity Linker - approximate nearest-neighbor entity linking over embeddings.
//!
//! Loads an entity mapping and embedding matrix, normalizes the vectors,
//! builds (or reloads) an HNSW index, queries every entity's neighbors in
//! one batched call and writes the highest-scoring candidate pairs.
//!
//! # Example
//!
//! ```rust,ignore
//! use entity_linker::{LinkInputs, Linker, LinkerConfig};
//!
//! let linker = Linker::new(LinkerConfig { threshold: 0.8, ..LinkerConfig::default() })?;
//! let report = linker.run(&LinkInputs {
//!     mapping_path: "entities.csv".into(),
//!     embeddings_path: "embeddings.npy".into(),
//!     output_path: "similar_pairs.tsv".into(),
//! })?;
//! println!("{} pairs", report.top_pairs);
//! ```

pub mod config;
pub mod embeddings;
pub mod export;
pub mod index;
pub mod linker;
pub mod pipeline;
pub mod telemetry;
pub mod types;

// Re-export main types
pub use config::LinkerConfig;
pub use pipeline::{LinkInputs, LinkOutput, LinkReport, Linker};
pub use types::{CandidatePair, EntityIndexMap, LinkerError, Result};
