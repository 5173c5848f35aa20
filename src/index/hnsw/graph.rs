//! HNSW graph structure and construction parameters.
//!
//! # Memory Layout
//!
//! ```text
//! vectors:   [f32; n * dim]            contiguous arena, row i = node i
//! levels:    [u8; n]                   top layer of each node
//! neighbors: [node][layer] -> Vec<u32> adjacency per layer (0 = densest)
//! ```
//!
//! Node ids equal matrix row indices, so search results map straight back to
//! entities without a translation table.

use crate::index::metric::Metric;
use crate::types::error::{LinkerError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default graph degree.
pub const DEFAULT_M: usize = 32;

/// Default construction search breadth.
pub const DEFAULT_EF_CONSTRUCTION: usize = 40;

/// Default query search breadth.
pub const DEFAULT_EF_SEARCH: usize = 50;

/// Default layer cap.
pub const DEFAULT_MAX_LAYERS: usize = 16;

/// Default level-assignment seed.
pub const DEFAULT_SEED: u64 = 42;

/// Parameters for HNSW construction and search.
///
/// Higher `m` and `ef_*` values trade build and query time for recall.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswParams {
    /// Neighbors per node on upper layers (layer 0 keeps `2 * m`).
    ///
    /// Typical values: 16-64
    pub m: usize,

    /// Candidate list size while linking a new node.
    ///
    /// Typical values: 40-400
    pub ef_construction: usize,

    /// Candidate list size at query time (raised to `k` when smaller).
    pub ef_search: usize,

    /// Maximum number of layers.
    pub max_layers: usize,

    /// Similarity metric.
    pub metric: Metric,

    /// Seed for level assignment; fixes the graph for a given input.
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
            max_layers: DEFAULT_MAX_LAYERS,
            metric: Metric::InnerProduct,
            seed: DEFAULT_SEED,
        }
    }
}

impl HnswParams {
    /// Link budget on `layer`.
    #[inline]
    pub fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::Config` if `m < 2` or any breadth/cap is zero.
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(LinkerError::config(format!("index.m must be >= 2, got {}", self.m)));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(LinkerError::config("index.ef_construction and index.ef_search must be > 0"));
        }
        if self.max_layers == 0 || self.max_layers > u8::MAX as usize {
            return Err(LinkerError::config(format!(
                "index.max_layers must be in 1..=255, got {}",
                self.max_layers
            )));
        }
        Ok(())
    }
}

/// Hierarchical navigable small world graph over a fixed vector set.
///
/// Built once by [`HnswIndex::build`], read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    pub(crate) params: HnswParams,
    pub(crate) dim: usize,
    pub(crate) vectors: Vec<f32>,
    pub(crate) levels: Vec<u8>,
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_layer: usize,
}

impl HnswIndex {
    /// Create an empty graph holding `vectors` (row-major, `dim` wide), with
    /// levels drawn from `rng` and no links yet.
    pub(crate) fn unlinked<R: Rng>(
        vectors: Vec<f32>,
        dim: usize,
        params: HnswParams,
        rng: &mut R,
    ) -> Self {
        let n = if dim == 0 { 0 } else { vectors.len() / dim };
        let levels: Vec<u8> = (0..n).map(|_| random_level(&params, rng)).collect();
        let neighbors = levels
            .iter()
            .map(|&level| vec![Vec::new(); level as usize + 1])
            .collect();

        Self {
            params,
            dim,
            vectors,
            levels,
            neighbors,
            entry_point: None,
            max_layer: 0,
        }
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// True if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Vector dimensionality.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Construction/search parameters.
    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Override the query breadth (construction is unaffected).
    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.params.ef_search = ef_search.max(1);
    }

    /// Stored vector of node `id`.
    #[inline]
    pub fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dim;
        &self.vectors[start..start + self.dim]
    }

    /// Contiguous stored vectors.
    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Links of `id` on `layer` (empty above the node's level).
    #[inline]
    pub fn links(&self, id: u32, layer: usize) -> &[u32] {
        self.neighbors[id as usize]
            .get(layer)
            .map_or(&[][..], Vec::as_slice)
    }

    /// Top layer of node `id`.
    pub fn level(&self, id: u32) -> usize {
        self.levels[id as usize] as usize
    }

    /// Highest populated layer.
    pub fn max_layer(&self) -> usize {
        self.max_layer
    }

    /// Search entry point.
    pub fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    /// Similarity between a query and node `id`.
    #[inline]
    pub fn similarity(&self, query: &[f32], id: u32) -> f32 {
        self.params.metric.similarity(query, self.vector(id))
    }

    /// Similarity between two stored nodes.
    #[inline]
    pub(crate) fn similarity_between(&self, a: u32, b: u32) -> f32 {
        self.params.metric.similarity(self.vector(a), self.vector(b))
    }

    /// Graph statistics for logging.
    pub fn stats(&self) -> GraphStats {
        let layer0_edges: usize = self.neighbors.iter().map(|l| l[0].len()).sum();
        let total_edges: usize = self
            .neighbors
            .iter()
            .flat_map(|layers| layers.iter())
            .map(Vec::len)
            .sum();
        GraphStats {
            num_nodes: self.len(),
            total_edges,
            avg_layer0_degree: if self.is_empty() {
                0.0
            } else {
                layer0_edges as f64 / self.len() as f64
            },
            max_layer: self.max_layer,
        }
    }
}

/// Draw a level from the exponential distribution with scale `1 / ln(m)`.
fn random_level<R: Rng>(params: &HnswParams, rng: &mut R) -> u8 {
    let ml = 1.0 / (params.m as f64).ln();
    // gen::<f64>() is in [0, 1); flip to (0, 1] so ln() stays finite
    let r: f64 = 1.0 - rng.gen::<f64>();
    let level = (-r.ln() * ml).floor() as usize;
    level.min(params.max_layers - 1) as u8
}

/// Graph statistics for monitoring and debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStats {
    /// Total number of nodes
    pub num_nodes: usize,

    /// Edges across all layers
    pub total_edges: usize,

    /// Average out-degree on layer 0
    pub avg_layer0_degree: f64,

    /// Highest populated layer
    pub max_layer: usize,
}
