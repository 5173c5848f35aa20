//! HNSW search: single-layer beam search and multi-layer k-NN.
//!
//! Works directly in similarity space: the candidate frontier is a max-heap
//! (most similar first) and the result set a min-heap (least similar on top,
//! evicted when the beam overflows).

use crate::index::hnsw::graph::HnswIndex;
use crate::index::hnsw::visited::VisitedSet;
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

thread_local! {
    /// Per-thread visited set, reused across queries on the same worker.
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::default());
}

/// Run `f` with this thread's visited set, grown to cover `capacity` ids.
pub(crate) fn with_visited<T>(capacity: usize, f: impl FnOnce(&mut VisitedSet) -> T) -> T {
    SEARCH_VISITED.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.ensure_capacity(capacity);
        f(&mut visited)
    })
}

/// Heap entry ordered by similarity, ties broken by lower id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Scored {
    sim: OrderedFloat<f32>,
    id: Reverse<u32>,
}

impl Scored {
    fn new(sim: f32, id: u32) -> Self {
        Self {
            sim: OrderedFloat(sim),
            id: Reverse(id),
        }
    }
}

/// Beam search on one layer.
///
/// Returns up to `ef` `(similarity, id)` pairs, most similar first.
/// `visited` is reset at the start of each call.
pub(crate) fn search_layer(
    index: &HnswIndex,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.reset();
    let mut frontier: BinaryHeap<Scored> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<Reverse<Scored>> = BinaryHeap::with_capacity(ef + 1);

    for &ep in entry_points {
        if visited.visit(ep) {
            let entry = Scored::new(index.similarity(query, ep), ep);
            frontier.push(entry);
            results.push(Reverse(entry));
            if results.len() > ef {
                results.pop();
            }
        }
    }

    while let Some(current) = frontier.pop() {
        let worst = results.peek().map(|r| r.0.sim);
        if results.len() >= ef && worst.is_some_and(|w| current.sim < w) {
            break;
        }

        for &nb in index.links(current.id.0, layer) {
            if !visited.visit(nb) {
                continue;
            }
            let sim = index.similarity(query, nb);
            let admit = results.len() < ef
                || results.peek().is_some_and(|w| OrderedFloat(sim) > w.0.sim);
            if admit {
                let entry = Scored::new(sim, nb);
                frontier.push(entry);
                results.push(Reverse(entry));
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    let mut out: Vec<(f32, u32)> = results
        .into_iter()
        .map(|Reverse(s)| (s.sim.0, s.id.0))
        .collect();
    sort_by_similarity(&mut out);
    out
}

/// Sort `(similarity, id)` most similar first, ties by ascending id.
pub(crate) fn sort_by_similarity(items: &mut [(f32, u32)]) {
    items.sort_unstable_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
}

/// Greedy (beam width 1) descent through layers `from_layer..to_layer`,
/// exclusive of `to_layer`. Returns the closest node found, used as the
/// entry point on `to_layer`.
pub(crate) fn descend(
    index: &HnswIndex,
    query: &[f32],
    entry: u32,
    from_layer: usize,
    to_layer: usize,
    visited: &mut VisitedSet,
) -> u32 {
    let mut current = entry;
    for layer in (to_layer + 1..=from_layer).rev() {
        let best = search_layer(index, query, std::slice::from_ref(&current), 1, layer, visited);
        if let Some(&(_, id)) = best.first() {
            current = id;
        }
    }
    current
}

impl HnswIndex {
    /// Approximate `k` nearest neighbors of `query`.
    ///
    /// Returns `(similarity, id)` pairs, most similar first. The beam on
    /// layer 0 is `max(ef_search, k)`. A stored vector queried against its
    /// own index normally finds itself at rank 0; callers filter it by id.
    pub fn knn(&self, query: &[f32], k: usize) -> Vec<(f32, u32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        with_visited(self.len(), |visited| {
            let ep = descend(self, query, entry, self.max_layer, 0, visited);
            let ef = self.params.ef_search.max(k);
            let mut results = search_layer(self, query, std::slice::from_ref(&ep), ef, 0, visited);
            results.truncate(k);
            results
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_by_similarity_breaks_ties_by_id() {
        let mut items = vec![(0.5, 3), (0.9, 7), (0.5, 1)];
        sort_by_similarity(&mut items);
        assert_eq!(items, vec![(0.9, 7), (0.5, 1), (0.5, 3)]);
    }

    #[test]
    fn test_scored_ordering() {
        // higher similarity wins; on equal similarity the lower id ranks higher
        assert!(Scored::new(0.9, 5) > Scored::new(0.1, 0));
        assert!(Scored::new(0.5, 1) > Scored::new(0.5, 2));
    }
}
