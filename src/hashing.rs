//! Tools for hashing everything we care about into a unique [`ObjectId`].
//!
//! Adapted from `backpak::hashing`: same base32 `ObjectId` idea and the same
//! `HashingReader`/`HashingWriter` pattern, but widened from SHA-224 to the
//! SHA-256/32-byte id spec §3 calls for, and serialized unconditionally as a
//! string (tree and snapshot blobs are JSON here, not CBOR, so there's no
//! need for `backpak::hashing`'s dual bytes-or-hex serialization hack).

use std::fmt;
use std::io;
use std::io::prelude::*;
use std::str::FromStr;

use data_encoding::BASE32_DNSSEC as BASE32HEX;
use sha2::{Digest, Sha256, digest::Output};

type Sha256Digest = Output<Sha256>;

/// The hash (a SHA-256) used to identify every blob and snapshot in the
/// repository.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectId {
    digest: Sha256Digest,
}

impl ObjectId {
    /// Calculates an id from the given bytes.
    pub fn hash(bytes: &[u8]) -> Self {
        Self {
            digest: Sha256::digest(bytes),
        }
    }

    pub fn from_digest(digest: Sha256Digest) -> Self {
        Self { digest }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.digest.as_slice()
    }

    /// A git-like shortened form, unique enough for UI purposes.
    pub fn short_name(&self) -> String {
        let mut full = format!("{self}");
        full.truncate(8);
        full
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", BASE32HEX.encode(&self.digest))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE32HEX.encode(&self.digest))
    }
}

impl FromStr for ObjectId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let bytes = BASE32HEX
            .decode(s.as_bytes())
            .map_err(|e| anyhow::anyhow!("Couldn't decode {s} as base32: {e}"))?;

        anyhow::ensure!(
            bytes.len() == <Sha256 as Digest>::output_size(),
            "Expected a SHA-256 base32hex id, got {} bytes",
            bytes.len()
        );
        Ok(ObjectId::from_digest(*Sha256Digest::from_slice(&bytes)))
    }
}

impl serde::Serialize for ObjectId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE32HEX.encode(self.digest.as_slice()))
    }
}

impl<'de> serde::Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> Result<ObjectId, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn finalize(self) -> (ObjectId, R) {
        (ObjectId::from_digest(self.hasher.finalize()), self.inner)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}

pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn finalize(self) -> (ObjectId, W) {
        (ObjectId::from_digest(self.hasher.finalize()), self.inner)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
