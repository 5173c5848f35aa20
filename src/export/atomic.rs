//! Atomic file replacement: write a sibling temp file, sync, rename.
//!
//! A single file goes through [`write_atomic`]. Several files that must
//! appear together are each written with [`stage`] and published with
//! [`commit_all`], which renames them only once every write has succeeded.

use crate::types::error::{LinkerError, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sibling path used while writing `path`.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// A fully written and synced temp file waiting to be renamed into place.
///
/// Dropping an uncommitted file removes the temp file.
#[derive(Debug)]
pub(crate) struct StagedFile {
    tmp: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Final destination.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&mut self) -> Result<()> {
        fs::rename(&self.tmp, &self.path).map_err(|e| LinkerError::io(&self.path, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Write the bytes produced by `write` to the temp sibling of `path`.
///
/// Nothing appears at `path` until the result is committed.
///
/// # Errors
///
/// Returns `LinkerError::Io` on create/flush/sync failure, or whatever
/// `write` returns. The temp file is removed in either case.
pub(crate) fn stage<F>(path: &Path, write: F) -> Result<StagedFile>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let tmp = temp_path(path);
    let file = File::create(&tmp).map_err(|e| LinkerError::io(&tmp, e))?;
    let staged = StagedFile {
        tmp,
        path: path.to_path_buf(),
        committed: false,
    };

    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer.flush().map_err(|e| LinkerError::io(&staged.tmp, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| LinkerError::io(&staged.tmp, e.into_error()))?;
    file.sync_all().map_err(|e| LinkerError::io(&staged.tmp, e))?;
    Ok(staged)
}

/// Rename every staged file into place, in order.
///
/// If a rename fails, files already renamed by this call are removed and
/// the remaining temp files are dropped, so either all destinations are
/// written or none are.
///
/// # Errors
///
/// Returns `LinkerError::Io` for the first failed rename.
pub(crate) fn commit_all(files: Vec<StagedFile>) -> Result<()> {
    let mut done: Vec<PathBuf> = Vec::with_capacity(files.len());
    for mut file in files {
        if let Err(e) = file.commit() {
            for path in &done {
                let _ = fs::remove_file(path);
            }
            return Err(e);
        }
        done.push(file.path.clone());
    }
    Ok(())
}

/// Create `path` with the bytes produced by `write`.
///
/// Nothing appears at `path` unless `write` succeeds; the temp file is
/// removed on failure.
///
/// # Errors
///
/// Returns `LinkerError::Io` on create/flush/rename failure, or whatever
/// `write` returns.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    commit_all(vec![stage(path, write)?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path_is_sibling() {
        assert_eq!(temp_path(Path::new("/a/b/out.tsv")), PathBuf::from("/a/b/out.tsv.tmp"));
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.tsv");
        let err = write_atomic(&path, |w| {
            w.write_all(b"partial").map_err(LinkerError::IoError)?;
            Err(LinkerError::search("interrupted"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), "search_error");
        assert!(!path.exists());
        assert!(!temp_path(&path).exists());

        write_atomic(&path, |w| w.write_all(b"done").map_err(LinkerError::IoError)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "done");
    }

    #[test]
    fn test_dropped_stage_removes_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.tsv");
        let staged = stage(&path, |w| w.write_all(b"a").map_err(LinkerError::IoError)).unwrap();
        assert!(temp_path(&path).exists());
        assert_eq!(staged.path(), path.as_path());
        drop(staged);
        assert!(!temp_path(&path).exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_commit_all_publishes_together() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.tsv");
        let b = dir.path().join("b.tsv");
        let staged = vec![
            stage(&a, |w| w.write_all(b"a").map_err(LinkerError::IoError)).unwrap(),
            stage(&b, |w| w.write_all(b"b").map_err(LinkerError::IoError)).unwrap(),
        ];
        assert!(!a.exists() && !b.exists());
        commit_all(staged).unwrap();
        assert_eq!(fs::read_to_string(&a).unwrap(), "a");
        assert_eq!(fs::read_to_string(&b).unwrap(), "b");
        assert!(!temp_path(&a).exists() && !temp_path(&b).exists());
    }

    #[test]
    fn test_failed_rename_rolls_back_earlier_files() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.tsv");
        let b = dir.path().join("b.tsv");
        let first = stage(&a, |w| w.write_all(b"a").map_err(LinkerError::IoError)).unwrap();
        let second = stage(&b, |w| w.write_all(b"b").map_err(LinkerError::IoError)).unwrap();
        // a directory at the destination makes the second rename fail
        fs::create_dir(&b).unwrap();

        assert!(commit_all(vec![first, second]).is_err());
        assert!(!a.exists());
        assert!(!temp_path(&a).exists());
        assert!(!temp_path(&b).exists());
    }
}
