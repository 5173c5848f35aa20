//! Entity-to-index mapping loader.
//!
//! Two families of encodings are accepted:
//!
//! - **Tabular** (`.csv`, `.tsv`): a header row with an `entity` column; row
//!   order defines the index.
//! - **Serialized** (`.json`, `.bin`, `.bincode`): an identifier -> index
//!   object whose values must cover `[0, N)` exactly once.
//!
//! The format is chosen by extension before any file is opened, so an
//! unsupported mapping fails before any other input is touched.

use crate::types::entity::EntityIndexMap;
use crate::types::error::{LinkerError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Column holding identifiers in tabular mappings.
pub const ENTITY_COLUMN: &str = "entity";

/// Supported mapping encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingFormat {
    /// Comma-separated with header
    Csv,
    /// Tab-separated with header
    Tsv,
    /// JSON object `{"entity": index, ...}`
    Json,
    /// Bincode-encoded `HashMap<String, u32>`
    Bincode,
}

impl MappingFormat {
    /// Infer format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "json" => Some(Self::Json),
            "bin" | "bincode" => Some(Self::Bincode),
            _ => None,
        }
    }

    /// Infer format from a path.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::UnsupportedFormat` for any other extension,
    /// including pickle files (`.p`, `.pickle`).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        Self::from_extension(&ext).ok_or_else(|| {
            tracing::error!("Unsupported mapping format: {:?} ({})", ext, path.display());
            LinkerError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: ext,
            }
        })
    }
}

/// Load an entity mapping, selecting the decoder by extension.
///
/// # Errors
///
/// - `UnsupportedFormat` for unknown extensions
/// - `Io` if the file cannot be opened
/// - `InvalidMapping` if the content is not a bijection onto `[0, N)`
pub fn load_mapping(path: &Path) -> Result<EntityIndexMap> {
    let format = MappingFormat::from_path(path)?;
    tracing::info!("Loading entity-to-index mapping ({:?}) from {}", format, path.display());

    let map = match format {
        MappingFormat::Csv => load_tabular(path, b',')?,
        MappingFormat::Tsv => load_tabular(path, b'\t')?,
        MappingFormat::Json => {
            let reader = open(path)?;
            let assignments: HashMap<String, u32> = serde_json::from_reader(reader)?;
            EntityIndexMap::from_assignments(assignments)?
        }
        MappingFormat::Bincode => {
            let reader = open(path)?;
            let assignments: HashMap<String, u32> = bincode::deserialize_from(reader)?;
            EntityIndexMap::from_assignments(assignments)?
        }
    };

    tracing::debug!("Mapping holds {} entities", map.len());
    Ok(map)
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| LinkerError::io(path, e))
}

fn load_tabular(path: &Path, delimiter: u8) -> Result<EntityIndexMap> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(open(path)?);

    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == ENTITY_COLUMN)
        .ok_or_else(|| {
            LinkerError::InvalidMapping(format!(
                "{} has no '{}' column",
                path.display(),
                ENTITY_COLUMN
            ))
        })?;

    let mut entities = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let entity = record.get(column).ok_or_else(|| {
            LinkerError::InvalidMapping(format!(
                "{} record {} is missing the '{}' field",
                path.display(),
                line + 1,
                ENTITY_COLUMN
            ))
        })?;
        entities.push(entity.to_string());
    }

    EntityIndexMap::from_ordered(entities)
}
