//! An in-memory `Repository`, for unit and integration tests.
//!
//! Grounded in `backpak::backend::memory::MemoryBackend` ("stores everything
//! as path-addressed buffers... great for testing"), generalized from
//! string paths to `(BlobKind, ObjectId)` keys, plus call counters so spec
//! §8's dedup property ("assert via `save_blob` counting") is directly
//! observable in tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};

use super::{Repository, Snapshot};
use crate::blob::BlobKind;
use crate::hashing::ObjectId;

#[derive(Default)]
struct Store {
    blobs: HashMap<(BlobKind, ObjectId), Vec<u8>>,
    snapshots: HashMap<ObjectId, Snapshot>,
}

/// A `Repository` backed entirely by in-process `HashMap`s.
pub struct MemoryRepository {
    store: Mutex<Store>,
    polynomial: u64,
    save_blob_calls: AtomicUsize,
    data_blob_save_calls: AtomicUsize,
    flush_calls: AtomicUsize,
    next_snapshot_disambiguator: AtomicU64,
}

impl MemoryRepository {
    pub fn new(polynomial: u64) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            polynomial,
            save_blob_calls: AtomicUsize::new(0),
            data_blob_save_calls: AtomicUsize::new(0),
            flush_calls: AtomicUsize::new(0),
            next_snapshot_disambiguator: AtomicU64::new(0),
        }
    }

    /// How many times [`Repository::save_blob`] has actually written a new
    /// blob (calls that found the blob already present via `index_has`
    /// aren't expected to reach `save_blob` at all - see
    /// [`crate::chunk::Chunker`] - but this still counts every call made).
    /// Counts both `data` and `tree` blobs; use [`Self::data_blob_save_calls`]
    /// to observe only the chunker's dedup behavior without tree-commit
    /// noise.
    pub fn save_blob_calls(&self) -> usize {
        self.save_blob_calls.load(Ordering::SeqCst)
    }

    /// As [`Self::save_blob_calls`], but counting only `BlobKind::Data`
    /// saves - the granularity spec §8's dedup property actually cares
    /// about, since every commit also saves exactly one (new) tree blob
    /// regardless of whether any file content changed.
    pub fn data_blob_save_calls(&self) -> usize {
        self.data_blob_save_calls.load(Ordering::SeqCst)
    }

    pub fn flush_calls(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }

    /// Test convenience: hash and store a data blob directly.
    pub fn put_data(&self, bytes: &[u8]) -> Result<ObjectId> {
        let id = crate::hashing::ObjectId::hash(bytes);
        self.save_blob(BlobKind::Data, bytes, id, true)?;
        Ok(id)
    }
}

impl Repository for MemoryRepository {
    fn load_blob(&self, kind: BlobKind, id: ObjectId, _hint_size: Option<u32>) -> Result<Vec<u8>> {
        let store = self.store.lock().unwrap();
        store
            .blobs
            .get(&(kind, id))
            .cloned()
            .ok_or_else(|| anyhow!("no {kind} blob {id}"))
    }

    fn save_blob(&self, kind: BlobKind, bytes: &[u8], id: ObjectId, _uncached: bool) -> Result<()> {
        self.save_blob_calls.fetch_add(1, Ordering::SeqCst);
        if kind == BlobKind::Data {
            self.data_blob_save_calls.fetch_add(1, Ordering::SeqCst);
        }
        let mut store = self.store.lock().unwrap();
        store.blobs.entry((kind, id)).or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    fn lookup_blob_size(&self, id: ObjectId, kind: BlobKind) -> Result<Option<u32>> {
        let store = self.store.lock().unwrap();
        Ok(store.blobs.get(&(kind, id)).map(|b| b.len() as u32))
    }

    fn index_has(&self, id: ObjectId, kind: BlobKind) -> Result<bool> {
        let store = self.store.lock().unwrap();
        Ok(store.blobs.contains_key(&(kind, id)))
    }

    fn save_json_unpacked(&self, _kind: &str, snapshot: &Snapshot) -> Result<ObjectId> {
        // Unlike blobs, two snapshots with identical fields are still two
        // distinct events; fold in a disambiguator so repeated commits in a
        // test (same tree, same second) don't collide in the map.
        let disambiguator = self.next_snapshot_disambiguator.fetch_add(1, Ordering::SeqCst);
        let mut bytes = serde_json::to_vec(snapshot)?;
        bytes.extend_from_slice(&disambiguator.to_le_bytes());
        let id = ObjectId::hash(&bytes);

        let mut store = self.store.lock().unwrap();
        store.snapshots.insert(id, snapshot.clone());
        Ok(id)
    }

    fn load_snapshot(&self, id: ObjectId) -> Result<Snapshot> {
        let store = self.store.lock().unwrap();
        store
            .snapshots
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("no snapshot {id}"))
    }

    fn flush(&self) -> Result<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn chunker_polynomial(&self) -> u64 {
        self.polynomial
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_a_blob() -> Result<()> {
        let repo = MemoryRepository::new(0);
        let id = repo.put_data(b"hello")?;
        assert!(repo.index_has(id, BlobKind::Data)?);
        assert_eq!(repo.load_blob(BlobKind::Data, id, None)?, b"hello");
        assert_eq!(repo.lookup_blob_size(id, BlobKind::Data)?, Some(5));
        Ok(())
    }

    #[test]
    fn second_save_of_same_id_is_a_noop_write_but_still_counted() -> Result<()> {
        let repo = MemoryRepository::new(0);
        let id = repo.put_data(b"hello")?;
        repo.save_blob(BlobKind::Data, b"hello", id, true)?;
        assert_eq!(repo.save_blob_calls(), 2);
        assert_eq!(repo.load_blob(BlobKind::Data, id, None)?, b"hello");
        Ok(())
    }
}
