//! Neighbor search over the whole matrix and pair collection.

pub mod collector;
pub mod recall;
pub mod search;

pub use collector::{collect_pairs, CollectOptions, CollectedPairs, DedupMode, PairCollector, TopN};
pub use recall::{evaluate_recall, recall_at_k, RecallReport};
pub use search::{search_all, search_rows, NeighborTable, NO_NEIGHBOR};
