//! A bounded, in-memory cache for decoded blob bytes.
//!
//! `backpak::backend::cache` persists a content cache to a SQLite database
//! shared across processes; that's overkill for the VFS's job, which only
//! ever needs to avoid re-fetching a blob from the [`crate::repository::Repository`]
//! within a single process's lifetime (spec §3, "Size bound (64 MiB by
//! default)"). This is a plain in-memory LRU keyed by [`ObjectId`], evicted
//! by total byte size rather than entry count, instrumented the way
//! `backpak::counters` instruments the backend cache.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use byte_unit::Byte;
use rustc_hash::FxHashMap;

use crate::counters::counters;
use crate::hashing::ObjectId;

/// Default cache size bound: 64 MiB.
pub const DEFAULT_SIZE: Byte = Byte::from_u64(64 * 1024 * 1024);

struct Entry {
    bytes: Arc<[u8]>,
    seq: u64,
}

struct Inner {
    max_bytes: u64,
    used_bytes: u64,
    next_seq: u64,
    entries: FxHashMap<ObjectId, Entry>,
    /// Ascending by `seq`: the front is the least recently used entry.
    order: BTreeMap<u64, ObjectId>,
}

/// A thread-safe, size-bounded cache of blob contents.
///
/// Shared by cloning; all methods take `&self` and lock internally, so one
/// `BlobCache` can sit behind an `Arc` on [`crate::fs::Filesystem`] and be
/// used by every open [`crate::handle::FileHandle`] without going through
/// the coarse structural mutex.
pub struct BlobCache {
    inner: Mutex<Inner>,
}

impl BlobCache {
    pub fn new(max_bytes: Byte) -> Self {
        Self {
            inner: Mutex::new(Inner {
                max_bytes: max_bytes.as_u64(),
                used_bytes: 0,
                next_seq: 0,
                entries: FxHashMap::default(),
                order: BTreeMap::new(),
            }),
        }
    }

    /// Looks up `id`, bumping it to most-recently-used on a hit.
    pub fn get(&self, id: &ObjectId) -> Option<Arc<[u8]>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.entries.get(id) else {
            crate::counters::bump(&counters().cache_miss);
            return None;
        };
        let bytes = entry.bytes.clone();
        let old_seq = entry.seq;
        let new_seq = inner.next_seq;
        inner.next_seq += 1;

        inner.order.remove(&old_seq);
        inner.order.insert(new_seq, *id);
        inner.entries.get_mut(id).unwrap().seq = new_seq;

        crate::counters::bump(&counters().cache_hit);
        Some(bytes)
    }

    /// Inserts `bytes` under `id`, evicting least-recently-used entries
    /// until the cache fits within its byte budget. The budget is advisory
    /// (spec §3): a single blob larger than the whole budget still gets
    /// cached, after evicting every other entry, and stays retrievable
    /// until the next insert evicts it in turn.
    pub fn insert(&self, id: ObjectId, bytes: Arc<[u8]>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.contains_key(&id) {
            return;
        }

        let len = bytes.len() as u64;

        while inner.used_bytes + len > inner.max_bytes {
            let Some((&oldest_seq, &oldest_id)) = inner.order.iter().next() else {
                break;
            };
            inner.order.remove(&oldest_seq);
            if let Some(evicted) = inner.entries.remove(&oldest_id) {
                inner.used_bytes -= evicted.bytes.len() as u64;
            }
            crate::counters::bump(&counters().cache_eviction);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, id);
        inner.used_bytes += len;
        inner.entries.insert(id, Entry { bytes, seq });
        crate::counters::bump(&counters().cache_insert);
    }

    #[cfg(test)]
    fn used_bytes(&self) -> u64 {
        self.inner.lock().unwrap().used_bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(n: u8) -> ObjectId {
        ObjectId::hash(&[n])
    }

    #[test]
    fn hit_after_insert() {
        let cache = BlobCache::new(Byte::from_u64(1024));
        let bytes: Arc<[u8]> = Arc::from(vec![1, 2, 3]);
        cache.insert(id(1), bytes.clone());
        assert_eq!(cache.get(&id(1)).unwrap().as_ref(), bytes.as_ref());
    }

    #[test]
    fn miss_for_unknown() {
        let cache = BlobCache::new(Byte::from_u64(1024));
        assert!(cache.get(&id(1)).is_none());
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = BlobCache::new(Byte::from_u64(16));
        cache.insert(id(1), Arc::from(vec![0u8; 8]));
        cache.insert(id(2), Arc::from(vec![0u8; 8]));
        // Touch id(1) so id(2) becomes the LRU entry.
        assert!(cache.get(&id(1)).is_some());
        cache.insert(id(3), Arc::from(vec![0u8; 8]));

        assert!(cache.get(&id(1)).is_some());
        assert!(cache.get(&id(2)).is_none());
        assert!(cache.get(&id(3)).is_some());
        assert!(cache.used_bytes() <= 16);
    }

    #[test]
    fn oversized_blob_is_cached_until_replaced() {
        let cache = BlobCache::new(Byte::from_u64(4));
        let bytes: Arc<[u8]> = Arc::from(vec![0u8; 8]);
        cache.insert(id(1), bytes.clone());
        assert_eq!(cache.get(&id(1)).unwrap().as_ref(), bytes.as_ref());
        assert_eq!(cache.used_bytes(), 8);

        // A second insert evicts the oversized entry like any other.
        cache.insert(id(2), Arc::from(vec![0u8; 2]));
        assert!(cache.get(&id(1)).is_none());
        assert!(cache.get(&id(2)).is_some());
    }
}
