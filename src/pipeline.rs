//! End-to-end linking pipeline.
//!
//! ```text
//! mapping ─┐
//!          ├─> normalize ─> index (build-or-load) ─> search ─> collect ─> write
//! matrix ──┘
//! ```
//!
//! Each `Linker` owns a rayon pool sized from its config; index build and
//! search run inside it, so two linkers in one process never share or
//! resize each other's workers. Outputs are written only after every stage
//! has succeeded.

use crate::config::LinkerConfig;
use crate::embeddings::mapping::{load_mapping, MappingFormat};
use crate::embeddings::matrix::{load_matrix, EmbeddingMatrix};
use crate::embeddings::normalize::normalize;
use crate::export::atomic::commit_all;
use crate::export::pairs::PairExporter;
use crate::index::cache::{CacheOutcome, IndexCache};
use crate::index::hnsw::HnswIndex;
use crate::linker::collector::{collect_pairs, CollectedPairs};
use crate::linker::recall::{evaluate_recall, RecallReport};
use crate::linker::search::search_all;
use crate::telemetry::{run_stage, StageKind};
use crate::types::entity::EntityIndexMap;
use crate::types::error::{LinkerError, Result};
use crate::types::pair::CandidatePair;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Input and output paths for one run.
#[derive(Debug, Clone)]
pub struct LinkInputs {
    /// Entity-to-index mapping file
    pub mapping_path: PathBuf,
    /// `.npy` embedding matrix
    pub embeddings_path: PathBuf,
    /// Main similar-pairs output
    pub output_path: PathBuf,
}

/// In-memory result of linking.
#[derive(Debug, Clone)]
pub struct LinkOutput {
    /// Top-N pairs, highest first
    pub top: Vec<CandidatePair>,
    /// Every valid pair in neighbor-table order, if requested
    pub all: Option<Vec<CandidatePair>>,
    /// Valid pairs seen
    pub considered: usize,
    /// How the index was obtained
    pub cache: CacheOutcome,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    /// Entities linked
    pub entities: usize,
    /// Embedding dimensionality
    pub dim: usize,
    /// How the index was obtained
    pub cache: CacheOutcome,
    /// Valid pairs seen
    pub considered: usize,
    /// Pairs in the top-N stream
    pub top_pairs: usize,
    /// Pairs written to the complete stream, if enabled
    pub all_pairs: Option<usize>,
    /// Main output file (absent when the top-N stream is disabled)
    pub output_path: Option<PathBuf>,
    /// Complete-stream file
    pub all_pairs_path: Option<PathBuf>,
    /// Wall time
    pub duration_ms: u64,
}

/// Entity linker bound to one configuration and worker pool.
pub struct Linker {
    config: LinkerConfig,
    pool: rayon::ThreadPool,
}

impl Linker {
    /// Validate `config` and start its worker pool.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::Config` for invalid settings and
    /// `LinkerError::ThreadPool` if the pool cannot start.
    pub fn new(config: LinkerConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("linker-{}", i))
            .build()
            .map_err(|e| LinkerError::ThreadPool(e.to_string()))?;
        tracing::debug!("Linker pool started with {} threads", pool.current_num_threads());
        Ok(Self { config, pool })
    }

    /// Active configuration.
    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    fn cache(&self) -> IndexCache {
        IndexCache::new(self.config.cache.path.clone(), self.config.cache.policy)
    }

    /// Load the mapping and matrix and check they agree.
    ///
    /// The mapping format is checked first, so an unsupported mapping fails
    /// before the matrix is read.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat`, `Io`, `InvalidMapping` (also for an empty
    /// dataset), `InvalidMatrix` or `ShapeMismatch`.
    pub fn load_inputs(
        &self,
        mapping_path: &Path,
        embeddings_path: &Path,
    ) -> Result<(EntityIndexMap, EmbeddingMatrix)> {
        MappingFormat::from_path(mapping_path)?;

        let entities = run_stage(
            StageKind::LoadMapping,
            &mapping_path.display().to_string(),
            || load_mapping(mapping_path),
            EntityIndexMap::len,
        )?;
        let matrix = run_stage(
            StageKind::LoadEmbeddings,
            &embeddings_path.display().to_string(),
            || load_matrix(embeddings_path),
            EmbeddingMatrix::rows,
        )?;

        if entities.len() != matrix.rows() {
            return Err(LinkerError::ShapeMismatch {
                mapping_path: mapping_path.to_path_buf(),
                matrix_path: embeddings_path.to_path_buf(),
                mapping_rows: entities.len(),
                matrix_rows: matrix.rows(),
            });
        }
        if entities.is_empty() {
            return Err(empty_dataset(mapping_path));
        }
        Ok((entities, matrix))
    }

    /// Normalize `matrix` in place and return an index over it.
    ///
    /// # Errors
    ///
    /// `DegenerateVector`, plus cache and build errors.
    pub fn prepare_index(
        &self,
        entities: &EntityIndexMap,
        matrix: &mut EmbeddingMatrix,
    ) -> Result<(HnswIndex, CacheOutcome)> {
        tracing::info!("Normalizing {} embeddings...", matrix.rows());
        run_stage(
            StageKind::Normalize,
            "embeddings",
            || normalize(matrix, entities),
            |_| entities.len(),
        )?;

        let cache = self.cache();
        let params = self.config.index;
        let matrix: &EmbeddingMatrix = matrix;
        self.pool.install(|| cache.build_or_load(matrix, params))
    }

    /// Link already-loaded inputs without touching output files.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `matrix` and `entities` differ in size,
    /// `InvalidMapping` if they are empty, plus any normalize, index or
    /// search error.
    pub fn link(&self, entities: &EntityIndexMap, mut matrix: EmbeddingMatrix) -> Result<LinkOutput> {
        if entities.len() != matrix.rows() {
            return Err(LinkerError::ShapeMismatch {
                mapping_path: PathBuf::from("<memory>"),
                matrix_path: PathBuf::from("<memory>"),
                mapping_rows: entities.len(),
                matrix_rows: matrix.rows(),
            });
        }
        if entities.is_empty() {
            return Err(empty_dataset(Path::new("<memory>")));
        }

        let (index, cache) = self.prepare_index(entities, &mut matrix)?;

        let k = self.config.k;
        let table = self.pool.install(|| {
            run_stage(
                StageKind::Search,
                "matrix",
                || search_all(&index, &matrix, k),
                |t| t.rows() * t.k(),
            )
        })?;

        let opts = self.config.collect_options();
        let CollectedPairs { all, top, considered } = run_stage(
            StageKind::Collect,
            "pairs",
            || Ok(collect_pairs(&table, opts)),
            |c| c.considered,
        )?;

        Ok(LinkOutput { top, all, considered, cache })
    }

    /// Run the full pipeline and write the configured outputs.
    ///
    /// # Errors
    ///
    /// Any stage error; no output file is created or replaced in that case.
    pub fn run(&self, inputs: &LinkInputs) -> Result<LinkReport> {
        let start = Instant::now();
        let (entities, matrix) = self.load_inputs(&inputs.mapping_path, &inputs.embeddings_path)?;
        let dim = matrix.dim();
        let output = self.link(&entities, matrix)?;

        let exporter = PairExporter::new(self.config.output.format);
        let all_pairs_path = self.config.output.all_pairs_path.clone();
        let mut staged = Vec::with_capacity(2);
        let mut all_pairs = None;
        if let (Some(path), Some(all)) = (all_pairs_path.as_deref(), output.all.as_deref()) {
            tracing::info!("Writing all valid pairs to {}...", path.display());
            staged.push(run_stage(
                StageKind::Write,
                &path.display().to_string(),
                || exporter.stage(all, &entities, path),
                |_| all.len(),
            )?);
            all_pairs = Some(all.len());
        }

        let output_path = if self.config.output.write_top_n {
            tracing::info!(
                "Writing top {} similar pairs to {}...",
                self.config.top_n,
                inputs.output_path.display()
            );
            staged.push(run_stage(
                StageKind::Write,
                &inputs.output_path.display().to_string(),
                || exporter.stage(&output.top, &entities, &inputs.output_path),
                |_| output.top.len(),
            )?);
            Some(inputs.output_path.clone())
        } else {
            None
        };

        // publish only once every stream is on disk
        commit_all(staged)?;

        tracing::info!("Completed successfully.");
        Ok(LinkReport {
            entities: entities.len(),
            dim,
            cache: output.cache,
            considered: output.considered,
            top_pairs: output.top.len(),
            all_pairs,
            output_path,
            all_pairs_path,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Measure recall@k of the index against an exact scan.
    ///
    /// Loads and normalizes the inputs and builds or loads the index the
    /// same way [`Linker::run`] does.
    ///
    /// # Errors
    ///
    /// Any load, normalize, index or search error.
    pub fn recall(
        &self,
        mapping_path: &Path,
        embeddings_path: &Path,
        queries: usize,
        seed: u64,
    ) -> Result<RecallReport> {
        let (entities, mut matrix) = self.load_inputs(mapping_path, embeddings_path)?;
        let (index, _) = self.prepare_index(&entities, &mut matrix)?;
        let k = self.config.k.min(matrix.rows());
        self.pool
            .install(|| evaluate_recall(&index, &matrix, k, queries, seed))
    }
}

fn empty_dataset(mapping_path: &Path) -> LinkerError {
    LinkerError::InvalidMapping(format!(
        "{} holds no entities; nothing to link",
        mapping_path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::collector::DedupMode;

    fn linker(threshold: f32, k: usize, top_n: usize) -> Linker {
        let mut config = LinkerConfig { threshold, k, top_n, threads: 2, ..LinkerConfig::default() };
        config.cache.path = None;
        Linker::new(config).unwrap()
    }

    fn five() -> (EntityIndexMap, EmbeddingMatrix) {
        let names = ["A", "B", "C", "D", "E"].iter().map(|s| s.to_string()).collect();
        let matrix = EmbeddingMatrix::from_rows(&[
            vec![1.0, 0.0],
            vec![0.9, 0.1],
            vec![-1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.95, 0.05],
        ])
        .unwrap();
        (EntityIndexMap::from_ordered(names).unwrap(), matrix)
    }

    #[test]
    fn test_link_five_entities() {
        let (entities, matrix) = five();
        let out = linker(0.8, 4, 10).link(&entities, matrix).unwrap();
        let named: Vec<(&str, &str)> = out.top.iter().map(|p| p.entities(&entities)).collect();
        assert_eq!(named, vec![("A", "E"), ("B", "E"), ("A", "B")]);
        assert!(out.top.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(out.cache, CacheOutcome::Uncached);
        assert!(out.all.is_none());
    }

    #[test]
    fn test_link_rejects_size_mismatch() {
        let (entities, _) = five();
        let matrix = EmbeddingMatrix::from_rows(&[vec![1.0, 0.0]]).unwrap();
        let err = linker(0.5, 2, 5).link(&entities, matrix).unwrap_err();
        assert_eq!(err.kind(), "shape_mismatch");
    }

    #[test]
    fn test_link_rejects_empty_dataset() {
        let entities = EntityIndexMap::from_ordered(Vec::new()).unwrap();
        let matrix = EmbeddingMatrix::new(0, 2, Vec::new()).unwrap();
        let err = linker(0.5, 2, 5).link(&entities, matrix).unwrap_err();
        assert_eq!(err.kind(), "invalid_mapping");
        assert!(err.to_string().contains("no entities"));
    }

    #[test]
    fn test_link_rejects_zero_vector() {
        let (entities, _) = five();
        let matrix = EmbeddingMatrix::from_rows(&[
            vec![1.0, 0.0],
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![0.5, 0.5],
        ])
        .unwrap();
        let err = linker(0.5, 2, 5).link(&entities, matrix).unwrap_err();
        match err {
            LinkerError::DegenerateVector { row, entity, .. } => {
                assert_eq!(row, 1);
                assert_eq!(entity, "B");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_union_mode_never_loses_ordered_pairs() {
        let (entities, matrix) = five();
        let ordered = linker(-1.0, 2, 100).link(&entities, matrix.clone()).unwrap();

        let mut config = LinkerConfig { threshold: -1.0, k: 2, top_n: 100, dedup: DedupMode::Union, ..LinkerConfig::default() };
        config.cache.path = None;
        let union = Linker::new(config).unwrap().link(&entities, matrix).unwrap();

        assert!(union.considered >= ordered.considered);
        for p in &ordered.top {
            assert!(union.top.iter().any(|q| q.a == p.a && q.b == p.b));
        }
    }
}
