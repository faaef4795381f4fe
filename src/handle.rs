//! A user-visible cursor over a file Node: a name, open flags, a position,
//! and closed/locked state. Holds no blob data itself - every I/O call asks
//! [`crate::node::Node::backing_snapshot`] fresh, so a promotion mid-flight
//! between two calls is visible starting with the second (spec §5).
//!
//! `backpak` has no equivalent: it only ever streams whole files through
//! [`crate::chunk::Chunker`], never hands a caller a cursor into one. The
//! shape here - one lock-free struct per open file, talking straight to the
//! Repository/cache it was handed at open time - is grounded in the same
//! "bypass the coarse mutex for I/O" discipline spec §5 lays out for
//! [`crate::fs::Filesystem`].

use std::sync::Arc;

use crate::cache::BlobCache;
use crate::error::{Result, VfsError};
use crate::fs::{OpenFlags, Whence};
use crate::node::Node;
use crate::repository::Repository;

/// An open file: either a reader over committed chunks, a writer over a
/// scratch file, or (briefly, mid-promotion) both.
pub struct FileHandle {
    node: Arc<Node>,
    repo: Arc<dyn Repository>,
    cache: Arc<BlobCache>,
    name: String,
    flags: OpenFlags,
    pos: u64,
    closed: bool,
    locked: bool,
}

impl FileHandle {
    pub(crate) fn new(
        node: Arc<Node>,
        repo: Arc<dyn Repository>,
        cache: Arc<BlobCache>,
        name: String,
        flags: OpenFlags,
    ) -> Self {
        Self {
            node,
            repo,
            cache,
            name,
            flags,
            pos: 0,
            closed: false,
            locked: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(VfsError::Closed);
        }
        Ok(())
    }

    /// Sets the advisory whole-file lock (spec §4.5). Idempotent.
    pub fn lock(&mut self) -> Result<()> {
        self.check_open()?;
        self.node.set_locked(true);
        self.locked = true;
        Ok(())
    }

    pub fn unlock(&mut self) -> Result<()> {
        self.check_open()?;
        if self.locked {
            self.node.set_locked(false);
            self.locked = false;
        }
        Ok(())
    }

    pub fn truncate(&mut self, size: u64) -> Result<()> {
        self.check_open()?;
        if !self.flags.write {
            return Err(VfsError::PermissionDenied);
        }
        let backing = self.node.backing_snapshot().unwrap_or_else(|| {
            crate::error::bug("truncate called on a handle with no Backing")
        });
        backing.truncate(size)?;
        self.node.set_size(size);
        Ok(())
    }

    /// Reads at an absolute offset, leaving the handle's cursor untouched.
    pub fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        self.check_open()?;
        let backing = self.node.backing_snapshot().unwrap_or_else(|| {
            crate::error::bug("read_at called on a handle with no Backing")
        });
        backing.read_at(self.repo.as_ref(), &self.cache, buf, off)
    }

    /// Reads from the handle's current position and advances it.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Writes at the handle's current position and advances it (spec §4.5).
    /// `APPEND` isn't supported (spec §4.1's Non-goals).
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        if !self.flags.write {
            return Err(VfsError::PermissionDenied);
        }
        if self.flags.append {
            return Err(VfsError::Unimplemented("O_APPEND"));
        }
        let backing = self.node.backing_snapshot().unwrap_or_else(|| {
            crate::error::bug("write called on a handle with no Backing")
        });
        let n = backing.write(buf, self.pos)?;
        self.pos += n as u64;
        let new_size = self.pos.max(self.node.size());
        self.node.set_size(new_size);
        Ok(n)
    }

    /// Repositions the cursor. `End` is relative to the Node's current
    /// declared size, not the underlying Backing's - the declared size is
    /// kept current on every write so this stays correct mid-edit.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        self.check_open()?;
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.pos,
            Whence::End => self.node.size(),
        };
        let new_pos = if offset >= 0 {
            base.checked_add(offset as u64)
        } else {
            base.checked_sub(offset.unsigned_abs())
        }
        .ok_or_else(|| VfsError::repo(anyhow::anyhow!("seek offset out of range")))?;
        self.pos = new_pos;
        Ok(new_pos)
    }

    /// Releases this handle. Idempotent calls after the first return `CLOSED`.
    pub fn close(&mut self) -> Result<()> {
        self.check_open()?;
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        if self.locked {
            self.node.set_locked(false);
            self.locked = false;
        }
        self.node.remove_handle();
        if self.flags.write {
            self.node.remove_writer();
        }
        self.closed = true;
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if !self.closed {
            self.release();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::repository::memory::MemoryRepository;
    use crate::scratch::MemoryScratch;
    use std::sync::Arc;

    fn fs() -> crate::fs::Filesystem {
        let repo = Arc::new(MemoryRepository::new(0));
        crate::fs::Filesystem::with_scratch(repo, None, Arc::new(MemoryScratch::new())).unwrap()
    }

    #[test]
    fn write_read_round_trip_and_seek() -> Result<()> {
        let fs = fs();
        fs.start_new_snapshot();

        let mut h = fs.create("a")?;
        h.write(b"hello world")?;
        h.seek(0, Whence::Start)?;
        let mut buf = [0u8; 5];
        h.read(&mut buf)?;
        assert_eq!(&buf, b"hello");

        let pos = h.seek(0, Whence::End)?;
        assert_eq!(pos, 11);
        h.close()?;
        Ok(())
    }

    #[test]
    fn methods_after_close_are_rejected() -> Result<()> {
        let fs = fs();
        fs.start_new_snapshot();
        let mut h = fs.create("a")?;
        h.close()?;
        assert!(matches!(h.close().unwrap_err(), VfsError::Closed));
        assert!(matches!(
            h.write(b"x").unwrap_err(),
            VfsError::Closed
        ));
        Ok(())
    }

    #[test]
    fn read_only_handle_rejects_writes() -> Result<()> {
        let fs = fs();
        fs.start_new_snapshot();
        fs.create("a")?.close()?;

        let mut h = fs.open("a")?;
        assert!(matches!(
            h.write(b"x").unwrap_err(),
            VfsError::PermissionDenied
        ));
        Ok(())
    }
}
