//! Cut a writable Backing into content-defined chunks on commit.
//!
//! Adapted from `backpak::chunk::chunk_file`: same `fastcdc::v2020::FastCDC`
//! call and the same min/target/max sizing rationale (content-defined
//! chunking over Duplicati-style whole-file dedup, FastCDC over Restic's
//! Rabin chunking for speed - see the teacher's doc comment history). Two
//! differences: this crate's chunker runs over a [`crate::scratch::ScratchFile`]
//! instead of a memory-mapped input file (there's no pack to avoid copying
//! into), and it's reset/reused across files instead of being a one-shot
//! free function, per spec §4.6 ("its buffer is reused across files").
//!
//! `chunker_polynomial` (spec §4.6, threaded from [`crate::config::Configuration`])
//! is carried on `Chunker` to match the Repository capability surface, but
//! `fastcdc::v2020::FastCDC` bakes in a single gear table rather than
//! exposing a seedable polynomial the way Restic's Rabin fingerprinting
//! does; see DESIGN.md for why this is currently inert rather than faked.

use fastcdc::v2020::FastCDC;
use tracing::trace;

use crate::blob::BlobKind;
use crate::cancel::CancellationToken;
use crate::error::{Result, VfsError};
use crate::hashing::ObjectId;
use crate::repository::Repository;

const MIN_SIZE: u32 = 1024 * 512;
const TARGET_SIZE: u32 = 1024 * 1024;
const MAX_SIZE: u32 = 1024 * 1024 * 8;

/// Drives content-defined chunking for one Filesystem. One instance, reused
/// across every file committed in a session, per spec §9 ("one chunker
/// instance and one working buffer per Filesystem... single-consumer; do
/// not share across threads").
pub struct Chunker {
    polynomial: u64,
    buf: Vec<u8>,
}

impl Chunker {
    pub fn new(polynomial: u64) -> Self {
        Self {
            polynomial,
            buf: Vec::new(),
        }
    }

    pub fn polynomial(&self) -> u64 {
        self.polynomial
    }

    /// Reads `bytes` whole, cuts it into chunks, and saves each chunk as a
    /// data blob the Repository doesn't already have. Returns the ordered
    /// list of chunk ids and the total byte count.
    pub fn chunk_and_save(
        &mut self,
        repo: &dyn Repository,
        cancel: &CancellationToken,
        bytes: &[u8],
    ) -> Result<(Vec<ObjectId>, u64)> {
        self.buf.clear();
        self.buf.extend_from_slice(bytes);

        let mut ids = Vec::new();
        let mut total = 0u64;
        for chunk in FastCDC::new(&self.buf, MIN_SIZE, TARGET_SIZE, MAX_SIZE) {
            cancel.check()?;
            let span = &self.buf[chunk.offset..chunk.offset + chunk.length];
            let id = ObjectId::hash(span);

            let already_present = repo.index_has(id, BlobKind::Data).map_err(VfsError::repo)?;
            if !already_present {
                repo.save_blob(BlobKind::Data, span, id, true)
                    .map_err(VfsError::repo)?;
                crate::counters::bump(&crate::counters::counters().blob_save);
            } else {
                crate::counters::bump(&crate::counters::counters().blob_save_dedup);
            }
            trace!("chunk [{}..{}] -> {id}", chunk.offset, chunk.offset + chunk.length);

            ids.push(id);
            total += chunk.length as u64;
        }
        Ok((ids, total))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::repository::memory::MemoryRepository;

    #[test]
    fn chunking_is_deterministic() -> anyhow::Result<()> {
        let repo = MemoryRepository::new(0);
        let mut chunker = Chunker::new(0);
        let cancel = CancellationToken::new();

        let data = b"the quick brown fox jumps over the lazy dog".repeat(20_000);
        let (first, size1) = chunker.chunk_and_save(&repo, &cancel, &data)?;
        let (second, size2) = chunker.chunk_and_save(&repo, &cancel, &data)?;

        assert_eq!(first, second);
        assert_eq!(size1, size2);
        assert_eq!(size1, data.len() as u64);
        Ok(())
    }

    #[test]
    fn identical_bytes_save_each_chunk_once() -> anyhow::Result<()> {
        let repo = MemoryRepository::new(0);
        let mut chunker = Chunker::new(0);
        let cancel = CancellationToken::new();

        let data = b"duplicate me please".repeat(50_000);
        chunker.chunk_and_save(&repo, &cancel, &data)?;
        let saves_after_first = repo.save_blob_calls();

        chunker.chunk_and_save(&repo, &cancel, &data)?;
        let saves_after_second = repo.save_blob_calls();

        assert_eq!(saves_after_first, saves_after_second);
        Ok(())
    }
}
