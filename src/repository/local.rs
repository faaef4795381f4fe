//! A loose-object, one-blob-per-file disk `Repository`.
//!
//! Grounded in `backpak::backend::fs::FilesystemBackend`'s bucketed
//! directory layout (`packs/<xx>/...`) and `backpak::file_util`'s
//! atomic-rename-into-place discipline, now used directly through
//! [`crate::file_util::atomic_write`]. Each blob is written as a small
//! `ciborium`-encoded envelope (uncompressed length plus a `zstd`-compressed
//! body) exactly the way `backpak::pack`/`backpak::index` frame their
//! on-disk records, but with no pack-level batching: this is a *reference*
//! backend for a complete, runnable crate, not a production store (spec
//! §1 puts packing/encryption/real backends out of scope).

use std::fs;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use serde_bytes::ByteBuf;
use serde_derive::{Deserialize, Serialize};

use super::{Repository, Snapshot};
use crate::blob::BlobKind;
use crate::file_util;
use crate::hashing::ObjectId;

#[derive(Serialize, Deserialize)]
struct Envelope {
    uncompressed_len: u64,
    compressed: ByteBuf,
}

/// A `Repository` whose blobs and snapshots live as loose files on a local
/// disk, bucketed by the first byte of their id to keep any one directory
/// from growing too large.
pub struct LocalRepository {
    base_directory: Utf8PathBuf,
    polynomial: u64,
    flushed: Mutex<()>,
}

fn bucket_dirs(base: &Utf8Path, sub: &str) -> impl Iterator<Item = Utf8PathBuf> + '_ {
    (0u16..=255).map(move |b| base.join(sub).join(format!("{b:02x}")))
}

impl LocalRepository {
    /// Creates the on-disk directory layout at `path`. Fails if `path`
    /// already exists, mirroring `FilesystemBackend::initialize`.
    pub fn init(path: &Utf8Path) -> Result<()> {
        ensure!(!path.exists(), "The directory {path} already exists");
        fs::create_dir_all(path).with_context(|| format!("Couldn't create {path}"))?;

        for kind in ["data", "tree"] {
            for dir in bucket_dirs(path, &format!("blobs/{kind}")) {
                fs::create_dir_all(&dir).with_context(|| format!("Couldn't create {dir}"))?;
            }
        }
        fs::create_dir_all(path.join("snapshots"))
            .with_context(|| format!("Couldn't create {path}/snapshots"))?;
        Ok(())
    }

    pub fn open(path: &Utf8Path, polynomial: u64) -> Result<Self> {
        ensure!(path.exists(), "The directory {path} doesn't exist");
        for kind in ["data", "tree"] {
            ensure!(
                path.join("blobs").join(kind).exists(),
                "The directory {path}/blobs/{kind} doesn't exist"
            );
        }
        Ok(Self {
            base_directory: path.to_owned(),
            polynomial,
            flushed: Mutex::new(()),
        })
    }

    fn blob_path(&self, kind: BlobKind, id: ObjectId) -> Utf8PathBuf {
        let name = id.to_string();
        self.base_directory
            .join("blobs")
            .join(kind.as_str())
            .join(&name[0..2])
            .join(&name)
    }

    fn snapshot_path(&self, id: ObjectId) -> Utf8PathBuf {
        self.base_directory.join("snapshots").join(id.to_string())
    }

    fn write_envelope(&self, path: &Utf8Path, bytes: &[u8]) -> Result<()> {
        let compressed = zstd::stream::encode_all(bytes, 0)
            .with_context(|| format!("Couldn't compress blob for {path}"))?;
        let envelope = Envelope {
            uncompressed_len: bytes.len() as u64,
            compressed: ByteBuf::from(compressed),
        };
        let mut encoded = Vec::new();
        ciborium::into_writer(&envelope, &mut encoded)
            .with_context(|| format!("Couldn't encode envelope for {path}"))?;

        let dir = path.parent().expect("blob path always has a parent");
        file_util::atomic_write(dir.as_std_path(), path.as_std_path(), &encoded)
    }

    fn read_envelope(&self, path: &Utf8Path) -> Result<Vec<u8>> {
        let envelope = self.decode_envelope(path)?;
        let bytes = zstd::stream::decode_all(envelope.compressed.as_slice())
            .with_context(|| format!("Couldn't decompress blob at {path}"))?;
        ensure!(
            bytes.len() as u64 == envelope.uncompressed_len,
            "Blob at {path} decompressed to the wrong length"
        );
        Ok(bytes)
    }

    /// Decodes just the CBOR envelope, without paying for a `zstd` decode -
    /// enough to answer `lookup_blob_size` from `uncompressed_len`.
    fn decode_envelope(&self, path: &Utf8Path) -> Result<Envelope> {
        let encoded = fs::read(path).with_context(|| format!("Couldn't open {path}"))?;
        ciborium::from_reader(encoded.as_slice())
            .with_context(|| format!("Couldn't decode envelope at {path}"))
    }
}

impl Repository for LocalRepository {
    fn load_blob(&self, kind: BlobKind, id: ObjectId, _hint_size: Option<u32>) -> Result<Vec<u8>> {
        self.read_envelope(&self.blob_path(kind, id))
    }

    fn save_blob(&self, kind: BlobKind, bytes: &[u8], id: ObjectId, _uncached: bool) -> Result<()> {
        let path = self.blob_path(kind, id);
        if path.exists() {
            return Ok(());
        }
        self.write_envelope(&path, bytes)
    }

    fn lookup_blob_size(&self, id: ObjectId, kind: BlobKind) -> Result<Option<u32>> {
        let path = self.blob_path(kind, id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(self.decode_envelope(&path)?.uncompressed_len as u32))
    }

    fn index_has(&self, id: ObjectId, kind: BlobKind) -> Result<bool> {
        Ok(self.blob_path(kind, id).exists())
    }

    fn save_json_unpacked(&self, _kind: &str, snapshot: &Snapshot) -> Result<ObjectId> {
        let mut bytes = serde_json::to_vec(snapshot)?;
        bytes.push(b'\n');
        let id = ObjectId::hash(&bytes);

        let path = self.snapshot_path(id);
        let dir = path.parent().expect("snapshot path always has a parent");
        file_util::atomic_write(dir.as_std_path(), path.as_std_path(), &bytes)?;
        Ok(id)
    }

    fn load_snapshot(&self, id: ObjectId) -> Result<Snapshot> {
        let path = self.snapshot_path(id);
        let bytes = fs::read(&path).with_context(|| format!("Couldn't open {path}"))?;
        serde_json::from_slice(&bytes).map_err(|e| anyhow!("Couldn't parse snapshot {path}: {e}"))
    }

    fn flush(&self) -> Result<()> {
        // Loose objects are written (and fsynced, via atomic_write) as soon
        // as they're saved, so there's nothing buffered to flush; the lock
        // just documents the happens-before relationship with concurrent
        // saves, the way a real pack-flushing backend would need one.
        let _guard = self.flushed.lock().unwrap();
        Ok(())
    }

    fn chunker_polynomial(&self) -> u64 {
        self.polynomial
    }
}
