//! Atomic file writes for durable state records.
//!
//! Persisted run state must never be observed half-written: content goes to a
//! temporary file in the target directory, is fsynced, and is then renamed
//! over the destination. Readers see either the old snapshot or the new one.

use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tempfile::NamedTempFile;

/// Atomically write `content` to `path` (tempfile → fsync → rename).
///
/// The temporary file is created in the same directory as the target so the
/// final rename stays on one filesystem. Parent directories are created as
/// needed.
pub fn write_file_atomic(path: &Utf8Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory: {parent}"))?;
    }

    let temp_dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut temp_file = NamedTempFile::new_in(temp_dir)
        .with_context(|| format!("failed to create temporary file in: {temp_dir}"))?;

    temp_file
        .write_all(content.as_bytes())
        .context("failed to write content to temporary file")?;

    temp_file
        .as_file()
        .sync_all()
        .context("failed to fsync temporary file")?;

    temp_file
        .persist(path.as_std_path())
        .map_err(|e| anyhow::anyhow!(e.error))
        .with_context(|| format!("failed to atomically write file: {path}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8_path(dir: &TempDir, name: &str) -> camino::Utf8PathBuf {
        camino::Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn writes_content() {
        let dir = TempDir::new().unwrap();
        let path = utf8_path(&dir, "state.json");

        write_file_atomic(&path, "{\"ok\":true}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"ok\":true}");
    }

    #[test]
    fn overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = utf8_path(&dir, "state.json");

        write_file_atomic(&path, "old").unwrap();
        write_file_atomic(&path, "new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = utf8_path(&dir, "runs/RUN-AB12/state.json");

        write_file_atomic(&path, "snapshot").unwrap();

        assert!(path.exists());
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = TempDir::new().unwrap();
        let path = utf8_path(&dir, "state.json");

        write_file_atomic(&path, "snapshot").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
