//! Tracing setup and pipeline stage instrumentation.
//!
//! # Span Conventions
//!
//! **Span naming**: `{stage} {target}`
//! - Example: `index.build ann_index.bin`, `load.mapping entities.csv`
//!
//! **Attributes** (recorded when the stage ends):
//! - `stage.items`: rows, vectors or pairs handled
//! - `stage.duration_ms`: wall time
//! - `stage.status`: `"success"` or the error kind
//!
//! # Example
//!
//! ```rust,ignore
//! use entity_linker::telemetry::{run_stage, StageKind};
//!
//! let map = run_stage(StageKind::LoadMapping, "entities.csv", || load_mapping(path), |m| m.len())?;
//! ```

pub mod stage;

pub use stage::{record_stage_metrics, run_stage, stage_span, StageKind};

use crate::types::error::{LinkerError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Install the global subscriber.
///
/// Honors `RUST_LOG`; falls back to `default_level` when it is unset or
/// invalid.
///
/// # Errors
///
/// Returns `LinkerError::Config` if a global subscriber is already set.
pub fn init_tracing(format: LogFormat, default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| LinkerError::config(format!("Failed to install tracing subscriber: {}", e)))
}
