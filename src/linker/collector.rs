//! Pair collection: dedup, threshold split, bounded top-N.
//!
//! Consumes neighbor lists and produces two streams:
//!
//! ```text
//! all pairs   every valid pair (optionally above an audit floor),
//!             in neighbor-table order
//! top-N       pairs with score >= threshold, at most N, highest first
//! ```
//!
//! The top-N side is a min-heap keyed on score, so the weakest survivor is
//! known in O(1) and replaced in O(log N). Equal scores keep the pair seen
//! first: a newcomer must strictly beat the current minimum, and among equal
//! minimums the latest arrival is evicted.

use crate::linker::search::NeighborTable;
use crate::types::pair::CandidatePair;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// How symmetric neighbor relations are folded into unordered pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// Emit `(i, j)` only from query `i` when `i < j`.
    ///
    /// A pair seen only from the higher row is dropped.
    #[default]
    Ordered,
    /// Emit from either direction, keeping the first occurrence.
    Union,
}

/// Heap entry. Ordered by score, then by arrival with later arrivals
/// ranking lower, so the heap minimum is the next pair to evict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Ranked {
    score: OrderedFloat<f32>,
    seq: Reverse<u64>,
    a: u32,
    b: u32,
}

impl Ranked {
    fn pair(&self) -> CandidatePair {
        CandidatePair {
            score: self.score.0,
            a: self.a,
            b: self.b,
        }
    }
}

/// Bounded selection of the highest-scoring pairs.
#[derive(Debug, Clone)]
pub struct TopN {
    capacity: usize,
    heap: BinaryHeap<Reverse<Ranked>>,
    seq: u64,
}

impl TopN {
    /// Selection holding at most `capacity` pairs.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.min(1 << 16) + 1),
            seq: 0,
        }
    }

    /// Offer a pair. Returns true if it was kept.
    pub fn push(&mut self, pair: CandidatePair) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let entry = Ranked {
            score: OrderedFloat(pair.score),
            seq: Reverse(self.seq),
            a: pair.a,
            b: pair.b,
        };
        self.seq += 1;

        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(entry));
            return true;
        }
        match self.heap.peek() {
            Some(Reverse(min)) if entry.score > min.score => {
                self.heap.pop();
                self.heap.push(Reverse(entry));
                true
            }
            _ => false,
        }
    }

    /// Number of pairs held.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Weakest score held.
    pub fn min_score(&self) -> Option<f32> {
        self.heap.peek().map(|Reverse(r)| r.score.0)
    }

    /// Pairs highest score first; equal scores in arrival order.
    pub fn into_sorted_vec(self) -> Vec<CandidatePair> {
        // ascending Reverse<Ranked> == descending Ranked
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(r)| r.pair())
            .collect()
    }
}

/// Collector settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectOptions {
    /// Inclusive floor for the top-N stream
    pub threshold: f32,
    /// Capacity of the top-N stream
    pub top_n: usize,
    /// Direction folding
    pub dedup: DedupMode,
    /// Keep the complete stream
    pub keep_all: bool,
    /// Inclusive floor for the complete stream
    pub audit_floor: Option<f32>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            threshold: 0.25,
            top_n: 100,
            dedup: DedupMode::Ordered,
            keep_all: false,
            audit_floor: None,
        }
    }
}

/// Output of a collection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedPairs {
    /// Complete stream, if requested
    pub all: Option<Vec<CandidatePair>>,
    /// Top-N stream, highest first
    pub top: Vec<CandidatePair>,
    /// Valid pairs seen (after dedup, before any floor)
    pub considered: usize,
}

/// Streaming pair collector.
#[derive(Debug)]
pub struct PairCollector {
    opts: CollectOptions,
    top: TopN,
    all: Option<Vec<CandidatePair>>,
    seen: HashSet<(u32, u32)>,
    considered: usize,
}

impl PairCollector {
    /// Create a collector.
    pub fn new(opts: CollectOptions) -> Self {
        Self {
            opts,
            top: TopN::new(opts.top_n),
            all: opts.keep_all.then(Vec::new),
            seen: HashSet::new(),
            considered: 0,
        }
    }

    /// Offer neighbor `neighbor` of query row `query` with its score.
    pub fn offer(&mut self, score: f32, query: u32, neighbor: u32) {
        if self.opts.dedup == DedupMode::Ordered && query >= neighbor {
            return;
        }
        let Some(pair) = CandidatePair::canonical(score, query, neighbor) else {
            return;
        };
        if self.opts.dedup == DedupMode::Union && !self.seen.insert((pair.a, pair.b)) {
            return;
        }

        self.considered += 1;
        if let Some(all) = self.all.as_mut() {
            if self.opts.audit_floor.map_or(true, |floor| score >= floor) {
                all.push(pair);
            }
        }
        if score >= self.opts.threshold {
            self.top.push(pair);
        }
    }

    /// Offer every filled slot of `table`; table row `i` is query row `i`.
    pub fn offer_table(&mut self, table: &NeighborTable) {
        for row in 0..table.rows() {
            for (score, neighbor) in table.neighbors(row) {
                self.offer(score, row as u32, neighbor);
            }
        }
    }

    /// Finish and return both streams.
    pub fn finish(self) -> CollectedPairs {
        CollectedPairs {
            all: self.all,
            top: self.top.into_sorted_vec(),
            considered: self.considered,
        }
    }
}

/// Collect pairs from a whole neighbor table.
pub fn collect_pairs(table: &NeighborTable, opts: CollectOptions) -> CollectedPairs {
    let mut collector = PairCollector::new(opts);
    collector.offer_table(table);
    let collected = collector.finish();
    tracing::info!(
        "Total valid pairs: {} ({} in top-N at threshold {})",
        collected.considered,
        collected.top.len(),
        opts.threshold
    );
    collected
}
