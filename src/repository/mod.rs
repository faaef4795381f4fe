//! The `Repository` capability: everything the VFS needs from whatever
//! stores its blobs and snapshots, and nothing about how that storage
//! actually works.
//!
//! Spec §1 puts encryption, key derivation, packing, and the actual blob
//! store backends out of scope, treating `Repository` as an opaque external
//! capability. `backpak` doesn't have a single trait playing this role - its
//! `backend::CachedBackend` plus `index`/`pack` together do the job - so
//! this trait collects exactly the operations spec §3/§6 name, letting
//! [`memory::MemoryRepository`] and [`local::LocalRepository`] each
//! implement the plumbing `backpak` splits across those modules.

pub mod local;
pub mod memory;

use anyhow::Result;
use jiff::Timestamp;
use serde_derive::{Deserialize, Serialize};

use crate::blob::BlobKind;
use crate::hashing::ObjectId;
use crate::node::TreeRecord;

/// The record a snapshot commit produces (spec §3/§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub paths: Vec<String>,
    pub tags: Vec<String>,
    pub hostname: String,
    pub time: Timestamp,
    pub tree: ObjectId,
}

/// Everything the VFS needs from a blob store. Consumed, never implemented,
/// by [`crate::fs::Filesystem`]; `memory`/`local` are reference
/// implementations used by tests and as a minimal runnable example.
pub trait Repository: Send + Sync {
    /// Loads and parses the tree blob `id`.
    fn load_tree(&self, id: ObjectId) -> Result<TreeRecord> {
        let bytes = self.load_blob(BlobKind::Tree, id, None)?;
        decode_tree(&bytes)
    }

    /// Loads the raw bytes of the blob `id` of kind `kind`. `hint_size`, if
    /// given, is an optimization hint only (e.g. `cumsize` deltas from
    /// [`crate::backing::ChunkView`]); implementations may ignore it.
    fn load_blob(&self, kind: BlobKind, id: ObjectId, hint_size: Option<u32>) -> Result<Vec<u8>>;

    /// Stores `bytes` under `id`, which the caller has already computed as
    /// `ObjectId::hash(bytes)`. `uncached` hints that the Repository
    /// shouldn't bother keeping its own copy warm (spec §4.6: data blobs
    /// are `uncached=true`; tree blobs pass `false`, spec §4.2).
    fn save_blob(&self, kind: BlobKind, bytes: &[u8], id: ObjectId, uncached: bool) -> Result<()>;

    /// The length of blob `id`, if known, without loading its bytes.
    fn lookup_blob_size(&self, id: ObjectId, kind: BlobKind) -> Result<Option<u32>>;

    /// Whether blob `id` of kind `kind` is already stored.
    fn index_has(&self, id: ObjectId, kind: BlobKind) -> Result<bool>;

    /// Stores an "unpacked" JSON value (in this crate, always a [`Snapshot`])
    /// and returns its content id.
    fn save_json_unpacked(&self, kind: &str, snapshot: &Snapshot) -> Result<ObjectId>;

    /// Loads a previously saved snapshot record.
    fn load_snapshot(&self, id: ObjectId) -> Result<Snapshot>;

    /// Persists any buffered writes. Spec §4.7: called once per commit,
    /// before the snapshot record is saved.
    fn flush(&self) -> Result<()>;

    /// The 64-bit polynomial that seeds [`crate::chunk::Chunker`] (spec §4.6).
    fn chunker_polynomial(&self) -> u64;
}

/// Serializes a tree's node list to the canonical form spec §4.2/§6
/// describes: a JSON object `{"nodes": [...]}` followed by a single `\n`,
/// with the trailing newline counted in the hashed bytes.
pub fn encode_tree(tree: &TreeRecord) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(tree)?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode_tree(bytes: &[u8]) -> Result<TreeRecord> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::{NodeContents, NodeRecord};

    #[test]
    fn tree_encoding_ends_with_newline() {
        let tree = TreeRecord {
            nodes: vec![NodeRecord {
                name: "a".into(),
                contents: NodeContents::Symlink {
                    target: "b".into(),
                },
                mode: 0o777,
                size: 0,
                uid: 0,
                gid: 0,
                user: String::new(),
                group: String::new(),
                mtime: Timestamp::UNIX_EPOCH,
                atime: Timestamp::UNIX_EPOCH,
                ctime: Timestamp::UNIX_EPOCH,
            }],
        };
        let bytes = encode_tree(&tree).unwrap();
        assert_eq!(*bytes.last().unwrap(), b'\n');
        let decoded = decode_tree(&bytes).unwrap();
        assert_eq!(decoded.nodes, tree.nodes);
    }
}
