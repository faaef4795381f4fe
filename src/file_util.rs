//! Small filesystem helpers for [`crate::repository::local::LocalRepository`].
//!
//! Adapted from `backpak::file_util::safe_copy_to_file`'s "write to a
//! sibling temp file, sync, then rename into place" pattern. This crate has
//! `tempfile` in its dependency stack (unlike `backpak`, which hand-rolled
//! the `.part` suffix), so `NamedTempFile` does the same job with less code.
//! `backpak`'s buffered-vs-memory-mapped `LoadedFile`/`read_file` split isn't
//! carried over: loose objects here are always small enough to read whole.

use std::io::prelude::*;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

/// Writes `contents` to a fresh file in `dir`, fsyncs it, then atomically
/// renames it to `dest`. Guarantees `dest` never contains a partial write.
pub fn atomic_write(dir: &Path, dest: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Couldn't create a temp file in {}", dir.display()))?;

    tmp.write_all(contents)
        .with_context(|| format!("Couldn't write {}", dest.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Couldn't sync {}", dest.display()))?;

    tmp.persist(dest)
        .with_context(|| format!("Couldn't rename into {}", dest.display()))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writes_and_renames() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("object");
        atomic_write(dir.path(), &dest, b"hello")?;
        assert_eq!(std::fs::read(&dest)?, b"hello");
        Ok(())
    }

    #[test]
    fn overwrites_existing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("object");
        atomic_write(dir.path(), &dest, b"first")?;
        atomic_write(dir.path(), &dest, b"second")?;
        assert_eq!(std::fs::read(&dest)?, b"second");
        Ok(())
    }
}
