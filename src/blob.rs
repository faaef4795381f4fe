//! Blob kinds stored by the [`Repository`](crate::repository::Repository).
//!
//! `backpak::blob::Type` distinguishes `Chunk`/`Tree`; spec §3 names the same
//! two kinds `data`/`tree`, so `BlobKind` just renames `Type` to match.

use serde_derive::*;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    /// A content-defined chunk of a file.
    Data,
    /// A serialized directory.
    Tree,
}

impl BlobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlobKind::Data => "data",
            BlobKind::Tree => "tree",
        }
    }
}

impl std::fmt::Display for BlobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
