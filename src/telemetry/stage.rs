//! Pipeline stage spans.

use crate::types::error::Result;
use std::time::Instant;
use tracing::{field, span, Level, Span};

/// Pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Entity mapping load
    LoadMapping,
    /// Embedding matrix load
    LoadEmbeddings,
    /// L2 normalization
    Normalize,
    /// HNSW construction
    IndexBuild,
    /// Cached index load
    IndexLoad,
    /// Cached index write
    IndexSave,
    /// Batched neighbor search
    Search,
    /// Pair collection
    Collect,
    /// Output write
    Write,
}

impl StageKind {
    /// Get stage as string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadMapping => "load.mapping",
            Self::LoadEmbeddings => "load.embeddings",
            Self::Normalize => "normalize",
            Self::IndexBuild => "index.build",
            Self::IndexLoad => "index.load",
            Self::IndexSave => "index.save",
            Self::Search => "search",
            Self::Collect => "collect",
            Self::Write => "write",
        }
    }
}

/// Create a stage span.
///
/// Metric fields are declared empty so [`record_stage_metrics`] can fill them
/// in once the stage ends.
pub fn stage_span(kind: StageKind, target: &str) -> Span {
    let span_name = format!("{} {}", kind.as_str(), target);
    span!(
        Level::INFO,
        "pipeline.stage",
        otel.name = %span_name,
        stage.name = kind.as_str(),
        stage.target = target,
        stage.items = field::Empty,
        stage.duration_ms = field::Empty,
        stage.status = field::Empty,
    )
}

/// Record stage metrics on the current span.
pub fn record_stage_metrics(items: Option<usize>, duration_ms: u64, status: &str) {
    let span = Span::current();
    if let Some(items) = items {
        span.record("stage.items", items);
    }
    span.record("stage.duration_ms", duration_ms);
    span.record("stage.status", status);
}

/// Run `f` inside a stage span and record its outcome.
///
/// `items` counts what the stage produced; on error the status is the
/// error kind.
pub fn run_stage<T>(
    kind: StageKind,
    target: &str,
    f: impl FnOnce() -> Result<T>,
    items: impl FnOnce(&T) -> usize,
) -> Result<T> {
    let span = stage_span(kind, target);
    let _guard = span.enter();
    let start = Instant::now();

    let result = f();
    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(value) => record_stage_metrics(Some(items(value)), duration_ms, "success"),
        Err(e) => {
            record_stage_metrics(None, duration_ms, e.kind());
            tracing::error!(stage = kind.as_str(), "{}", e);
        }
    }
    result
}
