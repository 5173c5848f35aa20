//! Linker configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes. CLI flags are applied on top of the loaded file.
//!
//! ```yaml
//! threshold: 0.8
//! k: 50
//! top_n: 1000
//! index:
//!   m: 48
//!   ef_search: 128
//! cache:
//!   path: ~/.cache/linker/ann_index.bin
//!   policy: strict
//! output:
//!   format: quoted_tsv
//!   all_pairs_path: all_pairs.tsv
//! ```

use crate::export::pairs::OutputFormat;
use crate::index::cache::CachePolicy;
use crate::index::hnsw::HnswParams;
use crate::linker::collector::{CollectOptions, DedupMode};
use crate::telemetry::LogFormat;
use crate::types::error::{LinkerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default top-N similarity floor.
pub const DEFAULT_THRESHOLD: f32 = 0.25;

/// Default neighbors per query.
pub const DEFAULT_K: usize = 100;

/// Default top-N capacity.
pub const DEFAULT_TOP_N: usize = 100;

/// Default cache file.
pub const DEFAULT_CACHE_PATH: &str = "ann_index.bin";

/// Index cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache file (`None` disables caching)
    pub path: Option<PathBuf>,
    /// Mismatch handling
    pub policy: CachePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from(DEFAULT_CACHE_PATH)),
            policy: CachePolicy::default(),
        }
    }
}

/// Output stream settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Line encoding
    pub format: OutputFormat,
    /// Write the top-N stream to the main output
    pub write_top_n: bool,
    /// Also write every valid pair here
    pub all_pairs_path: Option<PathBuf>,
    /// Inclusive floor for the complete stream
    pub audit_floor: Option<f32>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            write_top_n: true,
            all_pairs_path: None,
            audit_floor: None,
        }
    }
}

/// Full linker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Inclusive floor for the top-N stream
    pub threshold: f32,
    /// Neighbors per query
    pub k: usize,
    /// Top-N capacity
    pub top_n: usize,
    /// Worker threads for build and search (0 = one per core)
    pub threads: usize,
    /// Direction folding for neighbor pairs
    pub dedup: DedupMode,
    /// HNSW parameters
    pub index: HnswParams,
    /// Index cache
    pub cache: CacheConfig,
    /// Output streams
    pub output: OutputConfig,
    /// Log line format (used by the CLI)
    pub log_format: LogFormat,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            k: DEFAULT_K,
            top_n: DEFAULT_TOP_N,
            threads: 0,
            dedup: DedupMode::default(),
            index: HnswParams::default(),
            cache: CacheConfig::default(),
            output: OutputConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl LinkerConfig {
    /// Load configuration from a `.yaml`/`.yml` or `.json` file.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::Io` if the file cannot be read,
    /// `LinkerError::UnsupportedFormat` for other extensions, and a
    /// serialization error for malformed content.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| LinkerError::io(path, e))?;
        let ext = extension(path);
        let config: Self = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(LinkerError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    extension: ext,
                })
            }
        };
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save configuration; format follows the extension.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::UnsupportedFormat` for extensions other than
    /// yaml/yml/json and `LinkerError::Io` on write failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let ext = extension(path);
        let content = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::to_string(self)?,
            "json" => serde_json::to_string_pretty(self)?,
            _ => {
                return Err(LinkerError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    extension: ext,
                })
            }
        };
        fs::write(path, content).map_err(|e| LinkerError::io(path, e))
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(LinkerError::config("k must be > 0"));
        }
        if self.top_n == 0 {
            return Err(LinkerError::config("top_n must be > 0"));
        }
        if !(-1.0..=1.0).contains(&self.threshold) {
            return Err(LinkerError::config(format!(
                "threshold must be in [-1, 1], got {}",
                self.threshold
            )));
        }
        if let Some(floor) = self.output.audit_floor {
            if !floor.is_finite() {
                return Err(LinkerError::config("output.audit_floor must be finite"));
            }
        }
        if !self.output.write_top_n && self.output.all_pairs_path.is_none() {
            return Err(LinkerError::config(
                "output.write_top_n is false and output.all_pairs_path is unset: nothing to write",
            ));
        }
        self.index.validate()
    }

    /// Expand `~` and environment variables in every configured path.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::Config` if a referenced variable is unset.
    pub fn expand_paths(&mut self) -> Result<()> {
        if let Some(path) = self.cache.path.take() {
            self.cache.path = Some(expand_path(&path)?);
        }
        if let Some(path) = self.output.all_pairs_path.take() {
            self.output.all_pairs_path = Some(expand_path(&path)?);
        }
        Ok(())
    }

    /// Collector settings derived from this config.
    pub fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            threshold: self.threshold,
            top_n: self.top_n,
            dedup: self.dedup,
            keep_all: self.output.all_pairs_path.is_some(),
            audit_floor: self.output.audit_floor,
        }
    }
}

/// Expand `~` and `$VAR` in `path`.
///
/// # Errors
///
/// Returns `LinkerError::Config` if a referenced variable is unset.
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .map_err(|e| LinkerError::config(format!("Cannot expand path '{}': {}", raw, e)))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}
