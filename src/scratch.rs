//! The scratch sub-filesystem: where writable files actually live until
//! they're chunked and committed.
//!
//! Spec §9 calls for turning `backpak`'s implicit, process-wide temp
//! directory into an explicit, injectable capability. `backpak` itself has
//! no equivalent module (its working set is always a read-only pack/index
//! pair), so this is new; the default implementation is grounded in
//! `tempfile`, already part of the dependency stack for
//! [`crate::repository::local`]'s atomic writes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use tempfile::TempDir;

/// A single writable file inside a [`Scratch`] sub-filesystem.
pub trait ScratchFile: Send + Sync {
    fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize>;
    fn write_at(&self, buf: &[u8], off: u64) -> Result<usize>;
    fn set_len(&self, size: u64) -> Result<()>;
    fn len(&self) -> Result<u64>;
}

/// Allocates and opens scratch files for writable Nodes and `tempfile()` calls.
pub trait Scratch: Send + Sync {
    /// Creates a fresh, empty scratch file and returns a handle to it.
    fn create(&self, prefix: &str) -> Result<Box<dyn ScratchFile>>;
}

/// The default, OS-backed scratch sub-filesystem: a `tempfile` directory
/// under the process's temp dir, as `backpak`'s own (implicit) working set
/// would have used.
pub struct OsScratch {
    dir: TempDir,
    next_id: Mutex<u64>,
}

impl OsScratch {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("snapvfs-")
            .tempdir()
            .context("Couldn't create a scratch directory")?;
        Ok(Self {
            dir,
            next_id: Mutex::new(0),
        })
    }

    pub fn path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().to_owned())
            .expect("scratch directory isn't UTF-8")
    }
}

impl Scratch for OsScratch {
    fn create(&self, prefix: &str) -> Result<Box<dyn ScratchFile>> {
        let id = {
            let mut next_id = self.next_id.lock().unwrap();
            let id = *next_id;
            *next_id += 1;
            id
        };
        let path = self.dir.path().join(format!("{prefix}-{id:08x}"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Couldn't create scratch file {}", path.display()))?;
        Ok(Box::new(OsScratchFile {
            file: Mutex::new(file),
        }))
    }
}

struct OsScratchFile {
    file: Mutex<File>,
}

impl ScratchFile for OsScratchFile {
    fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(off))?;
        let mut total = 0;
        loop {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            if total == buf.len() {
                break;
            }
        }
        Ok(total)
    }

    fn write_at(&self, buf: &[u8], off: u64) -> Result<usize> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(off))?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn set_len(&self, size: u64) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.set_len(size)?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        let file = self.file.lock().unwrap();
        Ok(file.metadata()?.len())
    }
}

/// A pluggable, in-memory scratch sub-filesystem for tests.
#[derive(Default)]
pub struct MemoryScratch;

impl MemoryScratch {
    pub fn new() -> Self {
        Self
    }
}

impl Scratch for MemoryScratch {
    fn create(&self, _prefix: &str) -> Result<Box<dyn ScratchFile>> {
        Ok(Box::new(MemoryScratchFile {
            bytes: Mutex::new(Vec::new()),
        }))
    }
}

struct MemoryScratchFile {
    bytes: Mutex<Vec<u8>>,
}

impl ScratchFile for MemoryScratchFile {
    fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        let bytes = self.bytes.lock().unwrap();
        let off = off as usize;
        if off >= bytes.len() {
            return Ok(0);
        }
        let available = &bytes[off..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], off: u64) -> Result<usize> {
        let mut bytes = self.bytes.lock().unwrap();
        let off = off as usize;
        if bytes.len() < off + buf.len() {
            bytes.resize(off + buf.len(), 0);
        }
        bytes[off..off + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn set_len(&self, size: u64) -> Result<()> {
        let mut bytes = self.bytes.lock().unwrap();
        bytes.resize(size as usize, 0);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.lock().unwrap().len() as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn memory_scratch_round_trips() -> Result<()> {
        let scratch = MemoryScratch::new();
        let file = scratch.create("t")?;
        file.write_at(b"hello world", 0)?;
        let mut buf = [0u8; 5];
        file.read_at(&mut buf, 6)?;
        assert_eq!(&buf, b"world");
        Ok(())
    }

    #[test]
    fn memory_scratch_truncate() -> Result<()> {
        let scratch = MemoryScratch::new();
        let file = scratch.create("t")?;
        file.write_at(b"hello world", 0)?;
        file.set_len(5)?;
        assert_eq!(file.len()?, 5);
        Ok(())
    }

    #[test]
    fn os_scratch_round_trips() -> Result<()> {
        let scratch = OsScratch::new()?;
        let file = scratch.create("t")?;
        file.write_at(b"hello world", 0)?;
        let mut buf = [0u8; 11];
        file.read_at(&mut buf, 0)?;
        assert_eq!(&buf, b"hello world");
        Ok(())
    }
}
