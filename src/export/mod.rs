//! Output files.

pub(crate) mod atomic;
pub mod pairs;

pub use pairs::{format_score, OutputFormat, PairExporter};
