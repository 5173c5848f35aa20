//! Similar-pairs writer.
//!
//! One line per pair, no header:
//!
//! ```text
//! <score, 4 decimals>\t<entity A>\t<entity B>\n
//! ```
//!
//! `Tsv` writes identifiers raw, so a tab or newline inside an identifier
//! breaks the line structure. `QuotedTsv` goes through the `csv` writer and
//! quotes such fields; identifiers without special characters come out
//! byte-identical in both formats.

use crate::export::atomic::{stage, write_atomic, StagedFile};
use crate::types::entity::EntityIndexMap;
use crate::types::error::Result;
use crate::types::pair::CandidatePair;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Line encoding for pair files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Raw tab-joined fields
    #[default]
    Tsv,
    /// Tab-delimited with csv quoting where needed
    QuotedTsv,
}

/// Score as written to pair files.
pub fn format_score(score: f32) -> String {
    format!("{:.4}", score)
}

/// Pair file exporter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairExporter {
    format: OutputFormat,
}

impl PairExporter {
    /// Exporter for `format`.
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Write `pairs` in order to `writer`. Returns the line count.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::IoError` or `LinkerError::Csv` on write failure.
    pub fn write_to<W: Write>(
        &self,
        pairs: &[CandidatePair],
        entities: &EntityIndexMap,
        writer: W,
    ) -> Result<usize> {
        match self.format {
            OutputFormat::Tsv => {
                let mut writer = writer;
                for pair in pairs {
                    let (a, b) = pair.entities(entities);
                    writeln!(writer, "{}\t{}\t{}", format_score(pair.score), a, b)?;
                }
                writer.flush()?;
            }
            OutputFormat::QuotedTsv => {
                let mut writer = csv::WriterBuilder::new()
                    .delimiter(b'\t')
                    .has_headers(false)
                    .quote_style(csv::QuoteStyle::Necessary)
                    .from_writer(writer);
                for pair in pairs {
                    let (a, b) = pair.entities(entities);
                    writer.write_record([format_score(pair.score).as_str(), a, b])?;
                }
                writer.flush()?;
            }
        }
        Ok(pairs.len())
    }

    /// Write `pairs` to `path`, replacing it atomically.
    ///
    /// # Errors
    ///
    /// Returns `LinkerError::Io` if the file cannot be written; `path` is left
    /// untouched in that case.
    pub fn export<P: AsRef<Path>>(
        &self,
        pairs: &[CandidatePair],
        entities: &EntityIndexMap,
        path: P,
    ) -> Result<usize> {
        let path = path.as_ref();
        write_atomic(path, |writer| self.write_to(pairs, entities, writer).map(|_| ()))?;
        tracing::info!("Wrote {} pairs to {}", pairs.len(), path.display());
        Ok(pairs.len())
    }

    /// Write `pairs` to the temp sibling of `path` without publishing it.
    ///
    /// The caller renames it into place with `atomic::commit_all`.
    pub(crate) fn stage<P: AsRef<Path>>(
        &self,
        pairs: &[CandidatePair],
        entities: &EntityIndexMap,
        path: P,
    ) -> Result<StagedFile> {
        let path = path.as_ref();
        let staged = stage(path, |writer| self.write_to(pairs, entities, writer).map(|_| ()))?;
        tracing::debug!("Staged {} pairs for {}", pairs.len(), path.display());
        Ok(staged)
    }
}
