//! The two byte stores a [`crate::node::Node`] can be backed by.
//!
//! `backpak` has no equivalent - it only ever reads committed trees, never
//! mutates a working copy - so this is new, but the read-only half leans on
//! the same binary-search-over-prefix-sums idea `backpak::pack`'s manifest
//! lookups use, and the error paths reuse [`crate::error::VfsError`].

use std::sync::Arc;

use crate::cache::BlobCache;
use crate::error::{Result, VfsError};
use crate::hashing::ObjectId;
use crate::repository::Repository;
use crate::scratch::ScratchFile;

/// A read-only, random-access view over a file's ordered chunk list.
pub struct ChunkView {
    chunks: Vec<ObjectId>,
    /// `cumsize[i]` is the sum of the lengths of `chunks[0..i]`.
    cumsize: Vec<u64>,
}

impl ChunkView {
    /// Builds a view, verifying the chunk sizes the Repository reports sum
    /// to `declared_size` (spec §4.4: a mismatch is `SIZE_MISMATCH`).
    pub fn new(
        repo: &dyn Repository,
        chunks: Vec<ObjectId>,
        declared_size: u64,
    ) -> Result<Self> {
        let mut cumsize = Vec::with_capacity(chunks.len() + 1);
        cumsize.push(0u64);
        for id in &chunks {
            let len = repo
                .lookup_blob_size(*id, crate::blob::BlobKind::Data)
                .map_err(VfsError::repo)?
                .ok_or_else(|| VfsError::repo(anyhow::anyhow!("no size recorded for blob {id}")))?;
            let last = *cumsize.last().unwrap();
            cumsize.push(last + u64::from(len));
        }
        let computed = *cumsize.last().unwrap();
        if computed != declared_size {
            return Err(VfsError::size_mismatch("chunk view", declared_size, computed));
        }
        Ok(Self { chunks, cumsize })
    }

    pub fn total_size(&self) -> u64 {
        *self.cumsize.last().unwrap_or(&0)
    }

    pub fn chunks(&self) -> &[ObjectId] {
        &self.chunks
    }

    /// Binary searches the prefix sums, then walks blobs copying bytes into
    /// `buf`, fetching each through `cache`/`repo` as needed.
    pub fn read_at(
        &self,
        repo: &dyn Repository,
        cache: &BlobCache,
        buf: &mut [u8],
        off: u64,
    ) -> Result<usize> {
        let total = self.total_size();
        if off >= total || buf.is_empty() {
            return Ok(0);
        }

        // Find i such that cumsize[i] <= off < cumsize[i+1].
        let mut i = match self.cumsize.binary_search(&off) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        if i >= self.chunks.len() {
            i = self.chunks.len().saturating_sub(1);
        }

        let mut written = 0usize;
        let mut pos = off;
        while written < buf.len() && i < self.chunks.len() {
            let id = self.chunks[i];
            let bytes = load_blob(repo, cache, id)?;
            let chunk_start = self.cumsize[i];
            let start_in_chunk = (pos - chunk_start) as usize;
            if start_in_chunk >= bytes.len() {
                i += 1;
                continue;
            }
            let available = &bytes[start_in_chunk..];
            let to_copy = available.len().min(buf.len() - written);
            buf[written..written + to_copy].copy_from_slice(&available[..to_copy]);
            written += to_copy;
            pos += to_copy as u64;
            i += 1;
        }
        Ok(written)
    }
}

fn load_blob(repo: &dyn Repository, cache: &BlobCache, id: ObjectId) -> Result<Arc<[u8]>> {
    if let Some(bytes) = cache.get(&id) {
        return Ok(bytes);
    }
    let bytes: Arc<[u8]> = repo
        .load_blob(crate::blob::BlobKind::Data, id, None)
        .map_err(VfsError::repo)?
        .into();
    cache.insert(id, bytes.clone());
    Ok(bytes)
}

/// Either half of a Node's current byte store.
pub enum Backing {
    /// Read-only: data comes from committed blobs.
    Chunks(ChunkView),
    /// Writable: data lives in the scratch sub-filesystem.
    Scratch(Box<dyn ScratchFile>),
}

impl Backing {
    pub fn read_at(
        &self,
        repo: &dyn Repository,
        cache: &BlobCache,
        buf: &mut [u8],
        off: u64,
    ) -> Result<usize> {
        match self {
            Backing::Chunks(view) => view.read_at(repo, cache, buf, off),
            Backing::Scratch(f) => f.read_at(buf, off).map_err(VfsError::repo),
        }
    }

    /// Reads directly from a Scratch backing, with no Repository or cache
    /// involved. Used by [`crate::tree::commit`] to slurp a dirty file's
    /// bytes before chunking; a dirty file's backing is always Scratch
    /// (content is `None` iff dirty, and only Scratch backings are
    /// writable), so the Chunks arm is a programming-error path.
    pub fn read_scratch_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        match self {
            Backing::Chunks(_) => Err(VfsError::repo(anyhow::anyhow!(
                "read_scratch_at called on a read-only chunk view"
            ))),
            Backing::Scratch(f) => f.read_at(buf, off).map_err(VfsError::repo),
        }
    }

    pub fn write(&self, buf: &[u8], off: u64) -> Result<usize> {
        match self {
            Backing::Chunks(_) => Err(VfsError::ReadOnlyFs),
            Backing::Scratch(f) => f.write_at(buf, off).map_err(VfsError::repo),
        }
    }

    pub fn truncate(&self, size: u64) -> Result<()> {
        match self {
            Backing::Chunks(_) => Err(VfsError::ReadOnlyFs),
            Backing::Scratch(f) => f.set_len(size).map_err(VfsError::repo),
        }
    }

    pub fn len(&self) -> Result<u64> {
        match self {
            Backing::Chunks(view) => Ok(view.total_size()),
            Backing::Scratch(f) => f.len().map_err(VfsError::repo),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::repository::memory::MemoryRepository;

    #[test]
    fn chunk_view_reads_across_boundaries() -> anyhow::Result<()> {
        let repo = MemoryRepository::new(0);
        let a = repo.put_data(b"hello ")?;
        let b = repo.put_data(b"world")?;

        let view = ChunkView::new(&repo, vec![a, b], 11)?;
        let cache = BlobCache::new(byte_unit::Byte::from_u64(1024));

        let mut buf = [0u8; 11];
        let n = view.read_at(&repo, &cache, &mut buf, 0)?;
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");

        let mut buf = [0u8; 5];
        let n = view.read_at(&repo, &cache, &mut buf, 6)?;
        assert_eq!(n, 5);
        assert_eq!(&buf, b"world");
        Ok(())
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let repo = MemoryRepository::new(0);
        let a = repo.put_data(b"hello").unwrap();
        let err = ChunkView::new(&repo, vec![a], 999).unwrap_err();
        assert!(matches!(err, VfsError::SizeMismatch { .. }));
    }
}
