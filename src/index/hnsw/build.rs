//! Batched parallel HNSW construction.
//!
//! Vectors are inserted in growing batches. For each batch:
//!
//! ```text
//! 1. Plan (parallel):  for every node in the batch, search the frozen graph
//!                      layer by layer, add exact candidates from the other
//!                      batch members, select neighbors with the diversity
//!                      heuristic.
//! 2. Commit (serial):  write each node's links, then add reverse links in
//!                      id order, pruning nodes that exceed their budget.
//! 3. Promote:          raise the entry point if a batch node tops the graph.
//! ```
//!
//! A batch never exceeds 1/8 of the nodes already linked (capped at
//! `MAX_BATCH`), so early inserts run one at a time and later ones in
//! parallel. Planning reads only the frozen graph, so the result depends on
//! the seed and input alone, not on the thread count.

use crate::index::hnsw::graph::{HnswIndex, HnswParams};
use crate::index::hnsw::search::{descend, search_layer, sort_by_similarity, with_visited};
use crate::types::error::{LinkerError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::ops::Range;

/// Upper bound on nodes planned concurrently.
const MAX_BATCH: usize = 256;

/// A batch is at most `inserted / BATCH_FRACTION` nodes.
const BATCH_FRACTION: usize = 8;

/// Per-layer neighbor lists planned for one node.
type LinkPlan = Vec<Vec<u32>>;

impl HnswIndex {
    /// Build an index over row-major `data` of width `dim`.
    ///
    /// Node `i` is row `i`. Parallel work runs on the current rayon pool;
    /// callers control thread count with `ThreadPool::install`.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::Search` if `data` is empty or not a whole number
    /// of rows, and `LinkerError::Config` for invalid parameters.
    pub fn build(data: &[f32], dim: usize, params: HnswParams) -> Result<Self> {
        params.validate()?;

        if dim == 0 || data.is_empty() {
            return Err(LinkerError::search("Cannot build index from empty vector set"));
        }
        if data.len() % dim != 0 {
            return Err(LinkerError::search(format!(
                "Vector data length {} is not a multiple of dimension {}",
                data.len(),
                dim
            )));
        }
        let n = data.len() / dim;
        if n > u32::MAX as usize {
            return Err(LinkerError::search(format!("{} vectors exceed the u32 id range", n)));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut index = Self::unlinked(data.to_vec(), dim, params, &mut rng);
        index.entry_point = Some(0);
        index.max_layer = index.level(0);

        let mut inserted = 1usize;
        while inserted < n {
            let batch = (inserted / BATCH_FRACTION).clamp(1, MAX_BATCH);
            let end = (inserted + batch).min(n);
            let range = inserted as u32..end as u32;

            let plans: Vec<LinkPlan> = range
                .clone()
                .into_par_iter()
                .map(|id| index.plan_links(id, range.clone()))
                .collect();
            index.commit_batch(range, plans);

            inserted = end;
        }

        let stats = index.stats();
        tracing::debug!(
            "Built HNSW graph: {} nodes, {} edges, avg layer-0 degree {:.1}, {} layers",
            stats.num_nodes,
            stats.total_edges,
            stats.avg_layer0_degree,
            stats.max_layer + 1
        );
        Ok(index)
    }

    /// Choose neighbors for `id` against the frozen graph plus `batch` peers.
    fn plan_links(&self, id: u32, batch: Range<u32>) -> LinkPlan {
        let query = self.vector(id);
        let level = self.level(id);
        let mut plan: LinkPlan = vec![Vec::new(); level + 1];

        let Some(entry) = self.entry_point else {
            return plan;
        };

        with_visited(self.len(), |visited| {
            let top = level.min(self.max_layer);
            let mut entries = vec![descend(self, query, entry, self.max_layer, top, visited)];

            for layer in (0..=level).rev() {
                let mut candidates = if layer <= self.max_layer {
                    let found =
                        search_layer(self, query, &entries, self.params.ef_construction, layer, visited);
                    if !found.is_empty() {
                        entries = found.iter().map(|&(_, nb)| nb).collect();
                    }
                    found
                } else {
                    Vec::new()
                };

                // Batch peers are not linked yet; score them exactly
                candidates.extend(
                    batch
                        .clone()
                        .filter(|&peer| peer != id && self.level(peer) >= layer)
                        .map(|peer| (self.similarity(query, peer), peer)),
                );
                sort_by_similarity(&mut candidates);

                plan[layer] = select_neighbors(self, &candidates, self.params.max_links(layer));
            }
        });

        plan
    }

    /// Apply a batch of plans: own links first, then reverse links.
    fn commit_batch(&mut self, batch: Range<u32>, plans: Vec<LinkPlan>) {
        for (id, plan) in batch.clone().zip(plans) {
            for (layer, links) in plan.into_iter().enumerate() {
                self.neighbors[id as usize][layer] = links;
            }
        }

        for id in batch.clone() {
            for layer in 0..=self.level(id) {
                let links = self.neighbors[id as usize][layer].clone();
                for nb in links {
                    self.add_reverse_link(nb, id, layer);
                }
            }
        }

        for id in batch {
            let level = self.level(id);
            if level > self.max_layer {
                self.max_layer = level;
                self.entry_point = Some(id);
            }
        }
    }

    /// Link `node -> new` on `layer`, pruning `node` if over budget.
    fn add_reverse_link(&mut self, node: u32, new: u32, layer: usize) {
        let budget = self.params.max_links(layer);
        let links = &mut self.neighbors[node as usize][layer];
        if links.contains(&new) {
            return;
        }
        links.push(new);
        if links.len() <= budget {
            return;
        }

        let mut candidates: Vec<(f32, u32)> = self.neighbors[node as usize][layer]
            .iter()
            .map(|&c| (self.similarity_between(node, c), c))
            .collect();
        sort_by_similarity(&mut candidates);
        let pruned = select_neighbors(self, &candidates, budget);
        self.neighbors[node as usize][layer] = pruned;
    }
}

/// Diversity heuristic (HNSW paper, algorithm 4).
///
/// `candidates` must be sorted most similar first. A candidate is kept when
/// it is more similar to the base node than to every neighbor kept so far;
/// leftover slots are filled with the closest rejected candidates.
fn select_neighbors(index: &HnswIndex, candidates: &[(f32, u32)], m: usize) -> Vec<u32> {
    let mut selected: Vec<u32> = Vec::with_capacity(m);
    let mut rejected: Vec<u32> = Vec::new();

    for &(sim_to_base, cand) in candidates {
        if selected.len() >= m {
            break;
        }
        let diverse = selected
            .iter()
            .all(|&s| sim_to_base >= index.similarity_between(cand, s));
        if diverse {
            selected.push(cand);
        } else {
            rejected.push(cand);
        }
    }

    let room = m.saturating_sub(selected.len());
    selected.extend(rejected.into_iter().take(room));
    selected
}
