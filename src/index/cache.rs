//! Disk cache for built HNSW indexes.
//!
//! # File Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (128 bytes, little-endian)                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Magic: "LNKHNSW\0" (8 bytes)                            │
//! │ Version: u32                                            │
//! │ Metric code: u8, padding [u8; 3]                        │
//! │ Dimensionality: u32                                     │
//! │ M: u32                                                  │
//! │ ef_construction: u32                                    │
//! │ Max layers: u32                                         │
//! │ Num vectors: u64                                        │
//! │ Seed: u64                                               │
//! │ Built at: i64 (unix millis)                             │
//! │ Payload length: u64                                     │
//! │ Content signature: [u8; 32] (blake3)                    │
//! │ Payload checksum: [u8; 32] (blake3)                     │
//! ├─────────────────────────────────────────────────────────┤
//! │ Payload: bincode-encoded HnswIndex                      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The content signature hashes the vector count, the dimension and up to
//! [`SIGNATURE_SAMPLE_ROWS`] evenly spaced rows of the normalized matrix.
//! Comparing it against the current input catches a cache left over from a
//! different dataset without reading the payload.

use crate::embeddings::matrix::EmbeddingMatrix;
use crate::export::atomic::write_atomic;
use crate::index::hnsw::{HnswIndex, HnswParams};
use crate::index::metric::Metric;
use crate::telemetry::{run_stage, StageKind};
use crate::types::error::{LinkerError, Result};
use chrono::{DateTime, Utc};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic number for file format validation.
const MAGIC: &[u8; 8] = b"LNKHNSW\0";

/// Current file format version.
const VERSION: u32 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 128;

/// Rows sampled into the content signature.
pub const SIGNATURE_SAMPLE_ROWS: usize = 64;

/// What to do when a cache exists but does not match the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Rebuild and overwrite on mismatch or corruption
    #[default]
    Validate,
    /// Fail with `IndexCacheMismatch`
    Strict,
    /// Reuse any cache with the right shape, skipping content and parameter checks
    Trust,
}

/// How the index was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// Built and written to an empty cache path
    Built,
    /// Read from the cache
    Loaded,
    /// Cache was stale or corrupt; rebuilt and overwritten
    Rebuilt,
    /// Built with caching disabled
    Uncached,
}

impl CacheOutcome {
    /// Get outcome as string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::Loaded => "loaded",
            Self::Rebuilt => "rebuilt",
            Self::Uncached => "uncached",
        }
    }
}

/// Fingerprint of the vectors an index was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentSignature {
    /// Number of vectors
    pub num_vectors: u64,
    /// Vector dimensionality
    pub dim: u32,
    /// blake3 digest over shape and sampled rows
    pub digest: [u8; 32],
}

impl ContentSignature {
    /// Compute the signature of `matrix`.
    pub fn of(matrix: &EmbeddingMatrix) -> Self {
        let n = matrix.rows();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(n as u64).to_le_bytes());
        hasher.update(&(matrix.dim() as u32).to_le_bytes());

        let samples = n.min(SIGNATURE_SAMPLE_ROWS);
        for i in 0..samples {
            let row = i * n / samples;
            hasher.update(&(row as u64).to_le_bytes());
            for &x in matrix.row(row) {
                hasher.update(&x.to_le_bytes());
            }
        }

        Self {
            num_vectors: n as u64,
            dim: matrix.dim() as u32,
            digest: *hasher.finalize().as_bytes(),
        }
    }
}

impl fmt::Display for ContentSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} dim={} blake3={}",
            self.num_vectors,
            self.dim,
            &blake3::Hash::from(self.digest).to_hex()[..16]
        )
    }
}

/// Cache file header.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHeader {
    /// File format version
    pub version: u32,
    /// Metric the graph was built with
    pub metric: Metric,
    /// Graph degree
    pub m: u32,
    /// Construction breadth
    pub ef_construction: u32,
    /// Layer cap
    pub max_layers: u32,
    /// Level-assignment seed
    pub seed: u64,
    /// Build time
    pub built_at: DateTime<Utc>,
    /// Payload size in bytes
    pub payload_len: u64,
    /// Fingerprint of the indexed vectors
    pub signature: ContentSignature,
    /// blake3 of the payload
    pub checksum: [u8; 32],
}

impl CacheHeader {
    /// True if the header was built from `signature` with the same
    /// construction parameters. `ef_search` is a query knob and not compared.
    pub fn matches(&self, signature: &ContentSignature, params: &HnswParams) -> bool {
        self.signature == *signature
            && self.metric == params.metric
            && self.m as usize == params.m
            && self.ef_construction as usize == params.ef_construction
            && self.max_layers as usize == params.max_layers
            && self.seed == params.seed
    }

    /// One-line description used in mismatch errors.
    pub fn describe(&self) -> String {
        format!(
            "{} metric={} m={} ef_construction={} max_layers={} seed={}",
            self.signature,
            self.metric.as_str(),
            self.m,
            self.ef_construction,
            self.max_layers,
            self.seed
        )
    }

    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(MAGIC);
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12] = self.metric.code();
        bytes[16..20].copy_from_slice(&self.signature.dim.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.m.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.ef_construction.to_le_bytes());
        bytes[28..32].copy_from_slice(&self.max_layers.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.signature.num_vectors.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.seed.to_le_bytes());
        bytes[48..56].copy_from_slice(&self.built_at.timestamp_millis().to_le_bytes());
        bytes[56..64].copy_from_slice(&self.payload_len.to_le_bytes());
        bytes[64..96].copy_from_slice(&self.signature.digest);
        bytes[96..128].copy_from_slice(&self.checksum);
        bytes
    }

    /// Parse and validate a header.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::CorruptCache` on short input, bad magic,
    /// unknown version or unknown metric code.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(LinkerError::CorruptCache(format!(
                "File is {} bytes, shorter than the {}-byte header",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        if &bytes[0..8] != MAGIC {
            return Err(LinkerError::CorruptCache(format!(
                "Invalid magic bytes: expected {:?}, got {:?}",
                MAGIC,
                &bytes[0..8]
            )));
        }

        let version = read_u32(bytes, 8);
        if version != VERSION {
            return Err(LinkerError::CorruptCache(format!(
                "Unsupported version: expected {}, got {}",
                VERSION, version
            )));
        }

        let metric = Metric::from_code(bytes[12])
            .ok_or_else(|| LinkerError::CorruptCache(format!("Unknown metric code {}", bytes[12])))?;
        let built_at_ms = read_u64(bytes, 48) as i64;
        let built_at = DateTime::from_timestamp_millis(built_at_ms)
            .ok_or_else(|| LinkerError::CorruptCache(format!("Invalid build timestamp {}", built_at_ms)))?;

        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[64..96]);
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&bytes[96..128]);

        Ok(Self {
            version,
            metric,
            m: read_u32(bytes, 20),
            ef_construction: read_u32(bytes, 24),
            max_layers: read_u32(bytes, 28),
            seed: read_u64(bytes, 40),
            built_at,
            payload_len: read_u64(bytes, 56),
            signature: ContentSignature {
                num_vectors: read_u64(bytes, 32),
                dim: read_u32(bytes, 16),
                digest,
            },
            checksum,
        })
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Write `index` to `path` atomically.
///
/// Readers never see a partial cache: the file is written under a `.tmp`
/// sibling, synced, then renamed over `path`.
///
/// # Errors
///
/// Returns `LinkerError::Io` on write failure and `LinkerError::Bincode` if
/// the index cannot be encoded.
pub fn save(path: &Path, index: &HnswIndex, signature: &ContentSignature) -> Result<CacheHeader> {
    let payload = bincode::serialize(index)?;
    let params = index.params();
    let header = CacheHeader {
        version: VERSION,
        metric: params.metric,
        m: params.m as u32,
        ef_construction: params.ef_construction as u32,
        max_layers: params.max_layers as u32,
        seed: params.seed,
        built_at: Utc::now(),
        payload_len: payload.len() as u64,
        signature: *signature,
        checksum: *blake3::hash(&payload).as_bytes(),
    };

    write_atomic(path, |writer| {
        writer.write_all(&header.to_bytes())?;
        writer.write_all(&payload)?;
        Ok(())
    })?;

    tracing::info!(
        "Saved index cache {} ({} vectors, {} bytes)",
        path.display(),
        signature.num_vectors,
        HEADER_SIZE + payload.len()
    );
    Ok(header)
}

fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(|e| LinkerError::io(path, e))?;
    // SAFETY: the cache is only replaced by rename, never truncated in place,
    // so the mapped bytes stay valid for the lifetime of the map.
    unsafe { Mmap::map(&file) }.map_err(|e| LinkerError::io(path, e))
}

/// Read only the header of a cache file.
///
/// # Errors
///
/// Returns `LinkerError::Io` if the file cannot be opened and
/// `LinkerError::CorruptCache` if the header is invalid.
pub fn read_header(path: &Path) -> Result<CacheHeader> {
    let mmap = map_file(path)?;
    CacheHeader::from_bytes(&mmap)
}

/// Load a cache file, verifying its checksum.
///
/// # Errors
///
/// Returns `LinkerError::CorruptCache` if the header, length or checksum is
/// wrong, or if the decoded graph disagrees with its header.
pub fn load(path: &Path) -> Result<(CacheHeader, HnswIndex)> {
    let mmap = map_file(path)?;
    let header = CacheHeader::from_bytes(&mmap)?;

    let payload = &mmap[HEADER_SIZE..];
    if payload.len() as u64 != header.payload_len {
        return Err(LinkerError::CorruptCache(format!(
            "Payload is {} bytes, header says {}",
            payload.len(),
            header.payload_len
        )));
    }
    if blake3::hash(payload).as_bytes() != &header.checksum {
        return Err(LinkerError::CorruptCache(format!(
            "Checksum mismatch in {}",
            path.display()
        )));
    }

    let index: HnswIndex = bincode::deserialize(payload)?;
    if index.len() as u64 != header.signature.num_vectors || index.dim() as u32 != header.signature.dim {
        return Err(LinkerError::CorruptCache(format!(
            "Payload holds {} x {} vectors, header says {} x {}",
            index.len(),
            index.dim(),
            header.signature.num_vectors,
            header.signature.dim
        )));
    }
    Ok((header, index))
}

/// Build-or-load front end for a cache path.
#[derive(Debug, Clone)]
pub struct IndexCache {
    path: Option<PathBuf>,
    policy: CachePolicy,
}

impl IndexCache {
    /// Cache at `path` (`None` disables caching).
    pub fn new(path: Option<PathBuf>, policy: CachePolicy) -> Self {
        Self { path, policy }
    }

    /// Always build, never persist.
    pub fn disabled() -> Self {
        Self::new(None, CachePolicy::default())
    }

    /// Cache file path, if enabled.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Return an index over `matrix`, reusing the cache when allowed.
    ///
    /// Builds run on the current rayon pool. A loaded index gets the
    /// caller's `ef_search`.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::IndexCacheMismatch` under `Strict` (any mismatch)
    /// or `Trust` (count or dimension mismatch), and propagates load, build
    /// and save errors.
    pub fn build_or_load(
        &self,
        matrix: &EmbeddingMatrix,
        params: HnswParams,
    ) -> Result<(HnswIndex, CacheOutcome)> {
        let Some(path) = self.path.as_deref() else {
            let index = build_index(matrix, params, "memory")?;
            return Ok((index, CacheOutcome::Uncached));
        };
        let target = path.display().to_string();
        let signature = ContentSignature::of(matrix);

        if !path.exists() {
            tracing::info!("No index cache at {}, building", target);
            let index = build_index(matrix, params, &target)?;
            run_stage(StageKind::IndexSave, &target, || save(path, &index, &signature), |_| index.len())?;
            return Ok((index, CacheOutcome::Built));
        }

        match self.try_load(path, &signature, &params) {
            Ok(mut index) => {
                index.set_ef_search(params.ef_search);
                Ok((index, CacheOutcome::Loaded))
            }
            Err(e @ (LinkerError::IndexCacheMismatch { .. } | LinkerError::CorruptCache(_) | LinkerError::Bincode(_)))
                if self.policy == CachePolicy::Validate =>
            {
                tracing::warn!("Discarding index cache {}: {}", target, e);
                let index = build_index(matrix, params, &target)?;
                run_stage(StageKind::IndexSave, &target, || save(path, &index, &signature), |_| index.len())?;
                Ok((index, CacheOutcome::Rebuilt))
            }
            Err(e) => Err(e),
        }
    }

    /// Load `path` if its header passes this policy's checks.
    fn try_load(&self, path: &Path, signature: &ContentSignature, params: &HnswParams) -> Result<HnswIndex> {
        let target = path.display().to_string();
        run_stage(
            StageKind::IndexLoad,
            &target,
            || {
                let header = read_header(path)?;
                let mismatch = || LinkerError::IndexCacheMismatch {
                    path: path.to_path_buf(),
                    expected: expected_description(signature, params),
                    actual: header.describe(),
                };

                let same_shape = header.signature.num_vectors == signature.num_vectors
                    && header.signature.dim == signature.dim;
                match self.policy {
                    CachePolicy::Trust if !same_shape => return Err(mismatch()),
                    CachePolicy::Trust => {}
                    CachePolicy::Validate | CachePolicy::Strict => {
                        if !header.matches(signature, params) {
                            return Err(mismatch());
                        }
                    }
                }

                let (header, index) = load(path)?;
                tracing::info!(
                    "Loaded index cache {} ({} vectors, built {})",
                    target,
                    index.len(),
                    header.built_at.to_rfc3339()
                );
                Ok(index)
            },
            HnswIndex::len,
        )
    }
}

fn build_index(matrix: &EmbeddingMatrix, params: HnswParams, target: &str) -> Result<HnswIndex> {
    run_stage(
        StageKind::IndexBuild,
        target,
        || HnswIndex::build(matrix.as_slice(), matrix.dim(), params),
        HnswIndex::len,
    )
}

fn expected_description(signature: &ContentSignature, params: &HnswParams) -> String {
    format!(
        "{} metric={} m={} ef_construction={} max_layers={} seed={}",
        signature,
        params.metric.as_str(),
        params.m,
        params.ef_construction,
        params.max_layers,
        params.seed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::atomic::temp_path;
    use std::fs;
    use tempfile::TempDir;

    fn matrix(n: usize, offset: f32) -> EmbeddingMatrix {
        let rows: Vec<Vec<f32>> = (0..n)
            .map(|i| {
                let t = i as f32 * 0.37 + offset;
                vec![t.cos(), t.sin(), 0.5]
            })
            .collect();
        EmbeddingMatrix::from_rows(&rows).unwrap()
    }

    fn params() -> HnswParams {
        HnswParams { m: 4, ef_construction: 16, ef_search: 16, ..HnswParams::default() }
    }

    #[test]
    fn test_header_round_trip() {
        let header = CacheHeader {
            version: VERSION,
            metric: Metric::Cosine,
            m: 12,
            ef_construction: 80,
            max_layers: 9,
            seed: 7,
            built_at: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            payload_len: 4096,
            signature: ContentSignature { num_vectors: 10, dim: 3, digest: [9; 32] },
            checksum: [4; 32],
        };
        let parsed = CacheHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(b"NOTMAGIC");
        let err = CacheHeader::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), "corrupt_cache");
        assert!(CacheHeader::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn test_signature_tracks_content() {
        let a = ContentSignature::of(&matrix(20, 0.0));
        assert_eq!(a, ContentSignature::of(&matrix(20, 0.0)));
        assert_ne!(a, ContentSignature::of(&matrix(20, 0.1)));
        assert_ne!(a, ContentSignature::of(&matrix(21, 0.0)));
    }

    #[test]
    fn test_build_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ann_index.bin");
        let cache = IndexCache::new(Some(path.clone()), CachePolicy::Validate);
        let m = matrix(40, 0.0);

        let (built, outcome) = cache.build_or_load(&m, params()).unwrap();
        assert_eq!(outcome, CacheOutcome::Built);
        assert!(path.exists());
        assert!(!temp_path(&path).exists());

        let (loaded, outcome) = cache.build_or_load(&m, params()).unwrap();
        assert_eq!(outcome, CacheOutcome::Loaded);
        assert_eq!(loaded.neighbors, built.neighbors);

        let header = read_header(&path).unwrap();
        assert_eq!(header.signature.num_vectors, 40);
        assert_eq!(header.m, 4);
    }

    #[test]
    fn test_loaded_index_takes_current_ef_search() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ann_index.bin");
        let cache = IndexCache::new(Some(path), CachePolicy::Validate);
        let m = matrix(10, 0.0);
        cache.build_or_load(&m, params()).unwrap();

        let wider = HnswParams { ef_search: 99, ..params() };
        let (index, outcome) = cache.build_or_load(&m, wider).unwrap();
        assert_eq!(outcome, CacheOutcome::Loaded);
        assert_eq!(index.params().ef_search, 99);
    }

    #[test]
    fn test_policies_on_stale_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ann_index.bin");
        IndexCache::new(Some(path.clone()), CachePolicy::Validate)
            .build_or_load(&matrix(30, 0.0), params())
            .unwrap();
        let other = matrix(30, 1.0);

        let err = IndexCache::new(Some(path.clone()), CachePolicy::Strict)
            .build_or_load(&other, params())
            .unwrap_err();
        assert!(matches!(err, LinkerError::IndexCacheMismatch { .. }));

        // same shape, different content: trust reuses it
        let (_, outcome) = IndexCache::new(Some(path.clone()), CachePolicy::Trust)
            .build_or_load(&other, params())
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Loaded);

        // different shape is refused even under trust
        let err = IndexCache::new(Some(path.clone()), CachePolicy::Trust)
            .build_or_load(&matrix(31, 0.0), params())
            .unwrap_err();
        assert!(matches!(err, LinkerError::IndexCacheMismatch { .. }));

        let (_, outcome) = IndexCache::new(Some(path.clone()), CachePolicy::Validate)
            .build_or_load(&other, params())
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Rebuilt);
        assert_eq!(read_header(&path).unwrap().signature, ContentSignature::of(&other));
    }

    #[test]
    fn test_corrupt_payload_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ann_index.bin");
        let m = matrix(12, 0.0);
        IndexCache::new(Some(path.clone()), CachePolicy::Validate)
            .build_or_load(&m, params())
            .unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = load(&path).unwrap_err();
        assert_eq!(err.kind(), "corrupt_cache");

        let (_, outcome) = IndexCache::new(Some(path), CachePolicy::Validate)
            .build_or_load(&m, params())
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Rebuilt);
    }

    #[test]
    fn test_disabled_cache_builds() {
        let (index, outcome) = IndexCache::disabled().build_or_load(&matrix(5, 0.0), params()).unwrap();
        assert_eq!(outcome, CacheOutcome::Uncached);
        assert_eq!(index.len(), 5);
    }
}
