//! Core data types: entity mapping, scored pairs, errors.

pub mod entity;
pub mod error;
pub mod pair;

pub use entity::EntityIndexMap;
pub use error::{LinkerError, Result};
pub use pair::CandidatePair;
