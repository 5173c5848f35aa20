//! Dense embedding matrix and NumPy `.npy` I/O.
//!
//! # File Format
//!
//! ```text
//! \x93NUMPY | major(1) | minor(1) | header_len (u16 LE for v1, u32 LE for v2/v3)
//! header: {'descr': '<f4', 'fortran_order': False, 'shape': (N, D), }
//! data:   N * D little- or big-endian floats, row-major
//! ```
//!
//! Files are read through a read-only memory map and converted to `f32` in
//! one pass; 64-bit inputs are narrowed.

use crate::types::error::{LinkerError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const NUMPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// N x D row-major matrix of `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Wrap row-major data.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMatrix` if `data.len() != rows * dim` or `dim == 0`
    /// with rows present.
    pub fn new(rows: usize, dim: usize, data: Vec<f32>) -> Result<Self> {
        if rows > 0 && dim == 0 {
            return Err(LinkerError::InvalidMatrix(format!(
                "{} rows with zero dimension",
                rows
            )));
        }
        let expected = rows.checked_mul(dim).ok_or_else(|| {
            LinkerError::InvalidMatrix(format!("shape ({}, {}) overflows usize", rows, dim))
        })?;
        if data.len() != expected {
            return Err(LinkerError::InvalidMatrix(format!(
                "expected {} x {} = {} values, got {}",
                rows,
                dim,
                expected,
                data.len()
            )));
        }
        Ok(Self { rows, dim, data })
    }

    /// Build from individual row vectors (all must share one length).
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(LinkerError::InvalidMatrix(format!(
                    "row {} has dimension {}, expected {}",
                    i,
                    row.len(),
                    dim
                )));
            }
            data.extend_from_slice(row);
        }
        Self::new(rows.len(), dim, data)
    }

    /// Number of rows (entities).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Vector dimensionality.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Row `i`.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Mutable row `i`.
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Iterate rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact(0) panics; an empty matrix yields nothing either way
        self.data.chunks_exact(self.dim.max(1))
    }

    /// Contiguous row-major values.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Element type declared in an `.npy` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NpyDtype {
    F32 { big_endian: bool },
    F64 { big_endian: bool },
}

impl NpyDtype {
    fn from_descr(descr: &str) -> Option<Self> {
        match descr {
            "<f4" | "=f4" => Some(Self::F32 { big_endian: false }),
            ">f4" => Some(Self::F32 { big_endian: true }),
            "<f8" | "=f8" => Some(Self::F64 { big_endian: false }),
            ">f8" => Some(Self::F64 { big_endian: true }),
            _ => None,
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::F32 { .. } => 4,
            Self::F64 { .. } => 8,
        }
    }

    fn decode(&self, bytes: &[u8]) -> Vec<f32> {
        match *self {
            Self::F32 { big_endian } => bytes
                .chunks_exact(4)
                .map(|c| {
                    let b = [c[0], c[1], c[2], c[3]];
                    if big_endian {
                        f32::from_be_bytes(b)
                    } else {
                        f32::from_le_bytes(b)
                    }
                })
                .collect(),
            Self::F64 { big_endian } => bytes
                .chunks_exact(8)
                .map(|c| {
                    let b = [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
                    let v = if big_endian {
                        f64::from_be_bytes(b)
                    } else {
                        f64::from_le_bytes(b)
                    };
                    v as f32
                })
                .collect(),
        }
    }
}

/// Load an N x D matrix from a `.npy` file.
///
/// # Errors
///
/// - `UnsupportedFormat` if the extension is not `.npy`
/// - `Io` if the file cannot be opened or mapped
/// - `InvalidMatrix` for malformed headers, non-2-D shapes, unsupported
///   dtypes, Fortran order, or truncated data
pub fn load_matrix(path: &Path) -> Result<EmbeddingMatrix> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if ext != "npy" {
        return Err(LinkerError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: ext,
        });
    }

    let file = File::open(path).map_err(|e| LinkerError::io(path, e))?;
    // SAFETY: the mapping is read-only and dropped before this function returns;
    // concurrent truncation by another process is outside our control, as with any mmap.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| LinkerError::io(path, e))?;

    let matrix = parse_npy(&mmap)
        .map_err(|e| LinkerError::InvalidMatrix(format!("{}: {}", path.display(), e)))?;
    tracing::info!(
        "Loaded {} x {} embedding matrix from {}",
        matrix.rows(),
        matrix.dim(),
        path.display()
    );
    Ok(matrix)
}

/// Parse `.npy` bytes. Errors are plain messages; the caller adds the path.
fn parse_npy(bytes: &[u8]) -> std::result::Result<EmbeddingMatrix, String> {
    if bytes.len() < 10 || &bytes[0..6] != NUMPY_MAGIC {
        return Err("missing NUMPY magic".to_string());
    }

    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err("truncated header length".to_string());
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        other => return Err(format!("unsupported npy version {}.{}", other, bytes[7])),
    };

    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| "truncated header".to_string())?;
    let header = std::str::from_utf8(header)
        .map_err(|e| format!("header is not UTF-8: {}", e))?
        .trim();

    let descr = parse_descr(header)?;
    let dtype =
        NpyDtype::from_descr(descr).ok_or_else(|| format!("unsupported dtype '{}'", descr))?;
    if parse_fortran_order(header)? {
        return Err("Fortran-ordered arrays are not supported".to_string());
    }
    let shape = parse_shape(header)?;
    let (rows, dim) = match shape.as_slice() {
        [rows, dim] => (*rows, *dim),
        other => return Err(format!("expected a 2-D array, got shape {:?}", other)),
    };

    let byte_len = rows
        .checked_mul(dim)
        .and_then(|values| values.checked_mul(dtype.size()))
        .ok_or_else(|| format!("shape ({}, {}) is too large to address", rows, dim))?;
    let body = &bytes[data_start..];
    if body.len() < byte_len {
        return Err(format!(
            "data section holds {} bytes, shape ({}, {}) needs {}",
            body.len(),
            rows,
            dim,
            byte_len
        ));
    }

    let data = dtype.decode(&body[..byte_len]);
    EmbeddingMatrix::new(rows, dim, data).map_err(|e| e.to_string())
}

/// Value of a quoted header key, e.g. `'descr': '<f4'`.
fn header_value<'h>(header: &'h str, key: &str) -> std::result::Result<&'h str, String> {
    let key_pos = header
        .find(&format!("'{}'", key))
        .ok_or_else(|| format!("header is missing '{}'", key))?;
    let after = &header[key_pos + key.len() + 2..];
    let colon = after
        .find(':')
        .ok_or_else(|| format!("malformed '{}' entry", key))?;
    Ok(after[colon + 1..].trim_start())
}

fn parse_descr(header: &str) -> std::result::Result<&str, String> {
    let value = header_value(header, "descr")?;
    let value = value
        .strip_prefix('\'')
        .ok_or_else(|| "descr is not a string".to_string())?;
    let end = value
        .find('\'')
        .ok_or_else(|| "unterminated descr".to_string())?;
    Ok(&value[..end])
}

fn parse_fortran_order(header: &str) -> std::result::Result<bool, String> {
    let value = header_value(header, "fortran_order")?;
    if value.starts_with("True") {
        Ok(true)
    } else if value.starts_with("False") {
        Ok(false)
    } else {
        Err("fortran_order is not a boolean".to_string())
    }
}

fn parse_shape(header: &str) -> std::result::Result<Vec<usize>, String> {
    let value = header_value(header, "shape")?;
    let value = value
        .strip_prefix('(')
        .ok_or_else(|| "shape is not a tuple".to_string())?;
    let end = value
        .find(')')
        .ok_or_else(|| "unterminated shape".to_string())?;
    value[..end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            // numpy may emit `5L` on very old writers
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|e| format!("bad shape dimension '{}': {}", s, e))
        })
        .collect()
}

/// Write a matrix as a version 1.0 little-endian `<f4` `.npy` file.
///
/// # Errors
///
/// Returns `Io` if the file cannot be created or written.
pub fn write_npy(path: &Path, matrix: &EmbeddingMatrix) -> Result<()> {
    let header_dict = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        matrix.rows(),
        matrix.dim()
    );
    // magic + version + u16 length + dict + '\n', padded to 64 bytes
    let unpadded = NUMPY_MAGIC.len() + 2 + 2 + header_dict.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    let header = format!("{}{}\n", header_dict, " ".repeat(padding));

    let write = || -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(NUMPY_MAGIC)?;
        writer.write_all(&[1u8, 0u8])?;
        writer.write_all(&(header.len() as u16).to_le_bytes())?;
        writer.write_all(header.as_bytes())?;
        for value in matrix.as_slice() {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.flush()
    };
    write().map_err(|e| LinkerError::io(path, e))
}
