//! Error types for entity linking.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` implementations.
//! Every variant is fatal to a linking run; none are recovered silently.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LinkerError>;

/// Error type for all linking operations.
///
/// Variants carry enough context (paths, expected vs. actual shapes) to
/// diagnose a failed run from the log line alone.
#[derive(Error, Debug)]
pub enum LinkerError {
    /// Input file extension not recognized
    #[error("Unsupported file format '{extension}' for {path}")]
    UnsupportedFormat {
        /// Offending file
        path: PathBuf,
        /// Lowercased extension (empty if none)
        extension: String,
    },

    /// Mapping and matrix disagree on entity count
    #[error(
        "Shape mismatch: mapping {mapping_path} has {mapping_rows} entities \
         but matrix {matrix_path} has {matrix_rows} rows"
    )]
    ShapeMismatch {
        /// Mapping file
        mapping_path: PathBuf,
        /// Matrix file
        matrix_path: PathBuf,
        /// Entries in the mapping
        mapping_rows: usize,
        /// Rows in the matrix
        matrix_rows: usize,
    },

    /// I/O failure on a known path
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Embedding with zero or non-finite norm
    #[error("Degenerate vector at row {row} (entity '{entity}'): L2 norm is {norm}")]
    DegenerateVector {
        /// Row index in the matrix
        row: usize,
        /// Entity identifier for that row
        entity: String,
        /// Computed norm
        norm: f32,
    },

    /// Cached index was built from different data
    #[error("Index cache {path} does not match input: expected {expected}, found {actual}")]
    IndexCacheMismatch {
        /// Cache file
        path: PathBuf,
        /// Signature of the current input
        expected: String,
        /// Signature stored in the cache
        actual: String,
    },

    /// Mapping is not a bijection or is malformed
    #[error("Invalid entity mapping: {0}")]
    InvalidMapping(String),

    /// Matrix file is malformed
    #[error("Invalid embedding matrix: {0}")]
    InvalidMatrix(String),

    /// Cache file failed integrity checks
    #[error("Corrupt index cache: {0}")]
    CorruptCache(String),

    /// Index construction or query failed
    #[error("Vector search failed: {0}")]
    Search(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Bincode serialization error
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error without path context
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl LinkerError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a search error with context.
    pub fn search(msg: impl Into<String>) -> Self {
        Self::Search(msg.into())
    }

    /// Create a configuration error with context.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short machine-readable category, used as the `stage.status` on failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::ShapeMismatch { .. } => "shape_mismatch",
            Self::Io { .. } | Self::IoError(_) => "io_error",
            Self::DegenerateVector { .. } => "degenerate_vector",
            Self::IndexCacheMismatch { .. } => "index_cache_mismatch",
            Self::InvalidMapping(_) => "invalid_mapping",
            Self::InvalidMatrix(_) => "invalid_matrix",
            Self::CorruptCache(_) => "corrupt_cache",
            Self::Search(_) => "search_error",
            Self::Config(_) | Self::ThreadPool(_) => "config_error",
            Self::Json(_) | Self::Yaml(_) | Self::Bincode(_) | Self::Csv(_) => "serialization_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message_has_both_sides() {
        let err = LinkerError::ShapeMismatch {
            mapping_path: PathBuf::from("entities.csv"),
            matrix_path: PathBuf::from("emb.npy"),
            mapping_rows: 5,
            matrix_rows: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("entities.csv"));
        assert!(msg.contains("emb.npy"));
        assert!(msg.contains('5') && msg.contains('4'));
        assert_eq!(err.kind(), "shape_mismatch");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: LinkerError = io.into();
        assert_eq!(err.kind(), "io_error");

        let err = LinkerError::io("missing.npy", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.to_string().contains("missing.npy"));
    }
}
