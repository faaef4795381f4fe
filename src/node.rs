//! The single directory entry: metadata, mutation state, and the bits
//! serialized into a tree blob on commit.
//!
//! Adapted from `backpak::tree`'s `Node`/`NodeContents`/`NodeMetadata`: same
//! idea of "typed contents plus metadata, tagged on the wire", but the
//! metadata is flattened to the cross-platform field set spec §3 calls for
//! (`mode`, `mtime`, `atime`, `ctime`, `uid`, `gid`, `user`, `group`) instead
//! of `backpak`'s Posix/Windows split, and the live, in-memory `Node` now
//! carries mutation state (`backing`, `open_writers`, a materialized child
//! tree index) that `backpak::tree::Node` never needed, since `backpak`
//! only ever reads trees, never mutates them in place.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use camino::Utf8PathBuf;
use jiff::Timestamp;
use serde_derive::{Deserialize, Serialize};

use crate::backing::{Backing, ChunkView};
use crate::cache::BlobCache;
use crate::error::{Result, VfsError};
use crate::fs::OpenFlags;
use crate::hashing::ObjectId;
use crate::repository::Repository;
use crate::scratch::{Scratch, ScratchFile as _};

/// A directory entry's type, independent of its mutation state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeKind {
    File,
    Directory,
    Symlink,
}

/// The typed, committed contents of a [`NodeRecord`] - what actually goes
/// on the wire in a tree blob. A file's `content` and a directory's
/// `subtree` are always present here: a `NodeRecord` only exists once its
/// owning Node has been committed (see [`crate::tree::commit`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum NodeContents {
    File { content: Vec<ObjectId> },
    Directory { subtree: ObjectId },
    Symlink { target: Utf8PathBuf },
}

impl NodeContents {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeContents::File { .. } => NodeKind::File,
            NodeContents::Directory { .. } => NodeKind::Directory,
            NodeContents::Symlink { .. } => NodeKind::Symlink,
        }
    }
}

/// The on-the-wire form of a directory entry: what a tree blob's `nodes`
/// array actually contains (spec §6: "Node JSON preserves all metadata
/// fields exactly as the Repository expects for compatibility with
/// non-VFS readers").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    #[serde(flatten)]
    pub contents: NodeContents,
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub user: String,
    pub group: String,
    pub mtime: Timestamp,
    pub atime: Timestamp,
    pub ctime: Timestamp,
}

/// A tree blob: an ordered list of entries, exactly as stored (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeRecord {
    pub nodes: Vec<NodeRecord>,
}

/// Mutable, type-specific state behind a live [`Node`]'s lock.
pub(crate) enum NodeState {
    File {
        /// `None` iff dirty (uncommitted), per spec §3.
        content: Option<Vec<ObjectId>>,
        /// Shared by `Arc` so a [`crate::handle::FileHandle`] can capture a
        /// reference at the moment of an I/O call (spec §5) without holding
        /// the Node's lock for the duration of the read or write.
        backing: Option<Arc<Backing>>,
    },
    Directory {
        /// `None` iff the child tree was never materialized; the existing
        /// id remains authoritative until a write happens underneath it.
        subtree: Option<ObjectId>,
        /// Arena index of the materialized child [`crate::tree::TreeSlot`].
        materialized: Option<usize>,
    },
    Symlink {
        target: Utf8PathBuf,
    },
}

impl NodeState {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            NodeState::File { .. } => NodeKind::File,
            NodeState::Directory { .. } => NodeKind::Directory,
            NodeState::Symlink { .. } => NodeKind::Symlink,
        }
    }
}

pub(crate) struct NodeInner {
    pub name: String,
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub user: String,
    pub group: String,
    pub mtime: Timestamp,
    pub atime: Timestamp,
    pub ctime: Timestamp,
    pub state: NodeState,
}

/// A single file, directory, or symlink, live inside a [`crate::tree::TreeSlot`].
///
/// Shared by `Arc`: a [`crate::handle::FileHandle`] holds its own `Arc<Node>`
/// so I/O can bypass the Filesystem's coarse structural mutex (spec §5)
/// while still seeing Backing promotions atomically through `inner`'s lock.
pub struct Node {
    pub(crate) inner: Mutex<NodeInner>,
    open_writers: AtomicUsize,
    /// Every open [`crate::handle::FileHandle`], reader or writer. Spec §9's
    /// open-handle-at-commit design decision ("no open handles on the file
    /// at commit", tightened from the source's reader-survives-commit
    /// behavior) checks this, not just `open_writers`.
    open_handles: AtomicUsize,
    locked: AtomicBool,
}

impl Node {
    pub(crate) fn new(name: String, meta: NewNodeMeta, state: NodeState) -> Self {
        Self {
            inner: Mutex::new(NodeInner {
                name,
                mode: meta.mode,
                size: meta.size,
                uid: meta.uid,
                gid: meta.gid,
                user: meta.user,
                group: meta.group,
                mtime: meta.mtime,
                atime: meta.atime,
                ctime: meta.ctime,
                state,
            }),
            open_writers: AtomicUsize::new(0),
            open_handles: AtomicUsize::new(0),
            locked: AtomicBool::new(false),
        }
    }

    pub(crate) fn from_record(record: NodeRecord) -> Self {
        let state = match &record.contents {
            NodeContents::File { content } => NodeState::File {
                content: Some(content.clone()),
                backing: None,
            },
            NodeContents::Directory { subtree } => NodeState::Directory {
                subtree: Some(*subtree),
                materialized: None,
            },
            NodeContents::Symlink { target } => NodeState::Symlink {
                target: target.clone(),
            },
        };
        Self::new(
            record.name,
            NewNodeMeta {
                mode: record.mode,
                size: record.size,
                uid: record.uid,
                gid: record.gid,
                user: record.user,
                group: record.group,
                mtime: record.mtime,
                atime: record.atime,
                ctime: record.ctime,
            },
            state,
        )
    }

    pub fn name(&self) -> String {
        self.inner.lock().unwrap().name.clone()
    }

    pub fn kind(&self) -> NodeKind {
        self.inner.lock().unwrap().state.kind()
    }

    pub fn stat(&self) -> NodeStat {
        let inner = self.inner.lock().unwrap();
        NodeStat {
            name: inner.name.clone(),
            size: inner.size,
            mode: inner.mode,
            mtime: inner.mtime,
            is_dir: matches!(inner.state, NodeState::Directory { .. }),
        }
    }

    pub(crate) fn open_writers(&self) -> usize {
        self.open_writers.load(Ordering::SeqCst)
    }

    pub(crate) fn add_writer(&self) {
        self.open_writers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn remove_writer(&self) {
        self.open_writers.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub(crate) fn add_handle(&self) {
        self.open_handles.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn remove_handle(&self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }

    /// Sets the advisory whole-file lock flag. Idempotent: returns whether
    /// this call actually changed the flag.
    pub(crate) fn set_locked(&self, locked: bool) -> bool {
        self.locked.swap(locked, Ordering::SeqCst) != locked
    }

    /// Runs the file-open state machine of spec §4.3, creating or promoting
    /// this Node's Backing as `flags` demand. Returns whether the Node
    /// transitioned from clean to dirty (the caller, which already knows
    /// which Tree this Node lives in, uses that to propagate dirtiness -
    /// see [`crate::fs::Filesystem::open_file`]).
    ///
    /// Only valid for file Nodes; callers must have already checked
    /// `kind() == NodeKind::File`.
    pub(crate) fn open_for_file(
        &self,
        flags: OpenFlags,
        repo: &dyn Repository,
        cache: &BlobCache,
        scratch: &dyn Scratch,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let name = inner.name.clone();
        let size = inner.size;
        let has_writer_already = self.open_writers() > 0;

        let became_dirty = {
            let NodeState::File { content, backing } = &mut inner.state else {
                crate::error::bug("open_for_file called on a non-file Node");
            };
            match (backing.as_ref(), content.is_some()) {
                (None, false) => {
                    // Brand new, already-dirty file: give it a scratch backing.
                    let file = scratch.create(&name).map_err(VfsError::repo)?;
                    *backing = Some(Arc::new(Backing::Scratch(file)));
                    false
                }
                (None, true) => {
                    let chunks = content.clone().expect("checked Some above");
                    let view = ChunkView::new(repo, chunks, size)?;
                    *backing = Some(Arc::new(Backing::Chunks(view)));
                    if flags.write {
                        promote(content, backing, &name, repo, cache, scratch)?;
                        true
                    } else {
                        false
                    }
                }
                (Some(_), true) if flags.write => {
                    promote(content, backing, &name, repo, cache, scratch)?;
                    true
                }
                (Some(_), false) if flags.write && has_writer_already => {
                    return Err(VfsError::InUse);
                }
                _ => false,
            }
        };

        if flags.trunc {
            if let NodeState::File { backing, .. } = &inner.state {
                if let Some(b) = backing.as_ref() {
                    b.truncate(0)?;
                }
            }
            inner.size = 0;
        }
        Ok(became_dirty)
    }

    /// The file Node's current Backing, or `None` for non-file Nodes. Held
    /// only long enough to clone the `Arc`, per spec §5.
    pub(crate) fn backing_snapshot(&self) -> Option<Arc<Backing>> {
        let inner = self.inner.lock().unwrap();
        match &inner.state {
            NodeState::File { backing, .. } => backing.clone(),
            _ => None,
        }
    }

    pub fn set_size(&self, size: u64) {
        self.inner.lock().unwrap().size = size;
    }

    pub fn size(&self) -> u64 {
        self.inner.lock().unwrap().size
    }
}

/// Promotes a file Node's Backing from read-only chunks to a writable
/// scratch file, copying any existing bytes across (spec §4.3's "promote
/// (copy blob data into scratch, swap Backing, mark_dirty)").
fn promote(
    content: &mut Option<Vec<ObjectId>>,
    backing: &mut Option<Arc<Backing>>,
    name: &str,
    repo: &dyn Repository,
    cache: &BlobCache,
    scratch: &dyn Scratch,
) -> Result<()> {
    let file = scratch.create(name).map_err(VfsError::repo)?;
    if let Some(old) = backing.as_ref() {
        const BUF: usize = 64 * 1024;
        let mut buf = vec![0u8; BUF];
        let mut off = 0u64;
        loop {
            let n = old.read_at(repo, cache, &mut buf, off)?;
            if n == 0 {
                break;
            }
            file.write_at(&buf[..n], off).map_err(VfsError::repo)?;
            off += n as u64;
        }
    }
    *backing = Some(Arc::new(Backing::Scratch(file)));
    *content = None;
    Ok(())
}

/// Metadata needed to create a brand new Node (as opposed to one restored
/// from a [`NodeRecord`]).
pub struct NewNodeMeta {
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub user: String,
    pub group: String,
    pub mtime: Timestamp,
    pub atime: Timestamp,
    pub ctime: Timestamp,
}

impl Default for NewNodeMeta {
    fn default() -> Self {
        let now = Timestamp::now();
        Self {
            mode: 0o644,
            size: 0,
            uid: 0,
            gid: 0,
            user: String::new(),
            group: String::new(),
            mtime: now,
            atime: now,
            ctime: now,
        }
    }
}

/// The result of [`Node::stat`] - spec §4.1's `{name, size, mode, mtime, is_dir}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStat {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub mtime: Timestamp,
    pub is_dir: bool,
}
