//! The public VFS API: path resolution, the single-writer discipline, and
//! snapshot commit, all behind one coarse structural mutex (spec §4.1/§5).
//!
//! `backpak` has no equivalent façade - its trees are read-only and walked
//! directly by `ui/restore.rs`/`diff.rs` - so this module is new. Its shape
//! (one mutex-guarded session struct driving path resolution over an arena,
//! handing out handles that bypass the mutex for I/O) is grounded in the
//! concurrency discipline spec §5 describes and in `backpak::rcu`'s general
//! "one writer, many readers, swap the reference" idea, generalized here to
//! per-Node granularity instead of one whole-repository RCU cell.

use std::sync::{Arc, Mutex};

use jiff::Timestamp;

use crate::cache::BlobCache;
use crate::cancel::CancellationToken;
use crate::chunk::Chunker;
use crate::error::{Result, VfsError};
use crate::handle::FileHandle;
use crate::hashing::ObjectId;
use crate::node::{Node, NewNodeMeta, NodeKind, NodeState, NodeStat};
use crate::repository::{Repository, Snapshot};
use crate::scratch::{OsScratch, Scratch};
use crate::tree::Forest;

/// Open-mode flags, mirroring the POSIX `open(2)` vocabulary spec §4.1
/// builds its contracts on (`RO`, `RW|CREATE|TRUNC`, `EXCL`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub write: bool,
    pub create: bool,
    pub excl: bool,
    pub trunc: bool,
    pub append: bool,
}

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags {
        write: false,
        create: false,
        excl: false,
        trunc: false,
        append: false,
    };

    /// The flags `Filesystem::create` opens with: `RW|CREATE|TRUNC` (spec §4.1).
    pub fn create_read_write_truncate() -> OpenFlags {
        OpenFlags {
            write: true,
            create: true,
            trunc: true,
            ..Default::default()
        }
    }
}

/// `FileHandle::seek` origins (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Default mode for directories this crate creates along the way to a
/// path (spec §4.1 names this mask only for `mkdirall`; auto-vivified
/// ancestor directories during `open_file` use the same convention).
const DEFAULT_DIR_MODE: u32 = 0o777;
/// Spec §4.1: `mkdirall`'s creation mode is masked by this before use.
const UMASK: u32 = 0o002;

struct FsState {
    forest: Forest,
    chunker: Chunker,
    writable: bool,
}

/// The snapshot filesystem façade: the public surface a version-control
/// driver talks to (spec §4.1). One mutable root Tree, many `FileHandle`s.
pub struct Filesystem {
    repo: Arc<dyn Repository>,
    cache: Arc<BlobCache>,
    scratch: Arc<dyn Scratch>,
    state: Mutex<FsState>,
    cancel: CancellationToken,
}

impl Filesystem {
    /// Opens a Filesystem rooted at `parent`'s tree (or empty, if `None`),
    /// using the host OS temp directory as its scratch sub-filesystem.
    pub fn new(repo: Arc<dyn Repository>, parent: Option<ObjectId>) -> Result<Self> {
        let scratch = OsScratch::new().map_err(VfsError::repo)?;
        Self::with_scratch(repo, parent, Arc::new(scratch))
    }

    /// As [`Filesystem::new`], but with an injected scratch sub-filesystem
    /// (spec §9: tests use [`crate::scratch::MemoryScratch`]).
    pub fn with_scratch(
        repo: Arc<dyn Repository>,
        parent: Option<ObjectId>,
        scratch: Arc<dyn Scratch>,
    ) -> Result<Self> {
        let forest = match parent {
            Some(id) => Forest::from_root(repo.as_ref(), id)?,
            None => Forest::new_empty(),
        };
        let polynomial = repo.chunker_polynomial();
        Ok(Self {
            cache: Arc::new(BlobCache::new(crate::cache::DEFAULT_SIZE)),
            scratch,
            state: Mutex::new(FsState {
                forest,
                chunker: Chunker::new(polynomial),
                writable: false,
            }),
            repo,
            cancel: CancellationToken::new(),
        })
    }

    /// Returns a clone of this Filesystem's cancellation token. The caller
    /// holds the other end: calling `.cancel()` on the clone fails every
    /// subsequent (and any in-flight, cooperatively-checked) operation on
    /// this Filesystem with `CANCELLED` (spec §5).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sets the writable flag. Idempotent (spec §4.1).
    pub fn start_new_snapshot(&self) {
        self.state.lock().unwrap().writable = true;
    }

    pub fn is_writable(&self) -> bool {
        self.state.lock().unwrap().writable
    }

    /// `open(path, RW|CREATE|TRUNC, 0o666)` (spec §4.1).
    pub fn create(&self, path: &str) -> Result<FileHandle> {
        self.open_file(path, OpenFlags::create_read_write_truncate(), 0o666)
    }

    /// `open(path, RO, 0)` (spec §4.1).
    pub fn open(&self, path: &str) -> Result<FileHandle> {
        self.open_file(path, OpenFlags::READ_ONLY, 0)
    }

    pub fn open_file(&self, path: &str, flags: OpenFlags, perm: u32) -> Result<FileHandle> {
        self.cancel.check()?;
        let mut state = self.state.lock().unwrap();
        if flags.write && !state.writable {
            return Err(VfsError::PermissionDenied);
        }

        let (dir, name) = split_parent(path)?;
        let dir_idx = self.resolve_dir(&mut state.forest, &dir, flags.create, DEFAULT_DIR_MODE)?;

        let existing = state.forest.slots[dir_idx].find(&name);
        let node = match existing {
            Some(node) => {
                if flags.create && flags.excl {
                    return Err(VfsError::Exist);
                }
                if node.kind() != NodeKind::File {
                    return Err(VfsError::NotAFile);
                }
                node
            }
            None => {
                if !flags.create {
                    return Err(VfsError::NotExist);
                }
                let node = Arc::new(Node::new(
                    name.clone(),
                    NewNodeMeta {
                        mode: perm,
                        ..Default::default()
                    },
                    NodeState::File {
                        content: None,
                        backing: None,
                    },
                ));
                state.forest.add_node(dir_idx, node.clone())?;
                node
            }
        };

        if flags.write && node.open_writers() > 0 {
            return Err(VfsError::InUse);
        }

        let became_dirty =
            node.open_for_file(flags, self.repo.as_ref(), &self.cache, self.scratch.as_ref())?;
        if became_dirty {
            state.forest.mark_dirty(dir_idx);
        }

        node.add_handle();
        if flags.write {
            node.add_writer();
        }

        Ok(FileHandle::new(
            node,
            self.repo.clone(),
            self.cache.clone(),
            path.to_string(),
            flags,
        ))
    }

    pub fn stat(&self, path: &str) -> Result<NodeStat> {
        self.cancel.check()?;
        let mut state = self.state.lock().unwrap();
        let (dir, name) = split_parent(path)?;
        let dir_idx = self.resolve_dir(&mut state.forest, &dir, false, 0)?;
        let node = state.forest.slots[dir_idx]
            .find(&name)
            .ok_or(VfsError::NotExist)?;
        Ok(node.stat())
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.cancel.check()?;
        let mut state = self.state.lock().unwrap();
        if !state.writable {
            return Err(VfsError::PermissionDenied);
        }

        let (old_dir, old_name) = split_parent(old)?;
        let (new_dir, new_name) = split_parent(new)?;

        let old_dir_idx = self.resolve_dir(&mut state.forest, &old_dir, false, 0)?;
        let new_dir_idx = self.resolve_dir(&mut state.forest, &new_dir, false, 0)?;

        let moved = state.forest.slots[old_dir_idx]
            .find(&old_name)
            .ok_or(VfsError::NotExist)?;
        if state.forest.slots[new_dir_idx].find(&new_name).is_some() {
            return Err(VfsError::Exist);
        }

        // A directory can't be moved inside itself - that would graft the
        // arena's parent chain into a cycle unreachable from the root.
        let moved_subtree_idx = match &moved.inner.lock().unwrap().state {
            NodeState::Directory {
                materialized: Some(idx),
                ..
            } => Some(*idx),
            _ => None,
        };
        if let Some(moved_subtree_idx) = moved_subtree_idx {
            if state.forest.is_descendant(new_dir_idx, moved_subtree_idx) {
                return Err(VfsError::InvalidArgument(
                    "cannot move a directory inside itself",
                ));
            }
        }

        let node = state.forest.remove_node(old_dir_idx, &old_name)?;
        let child_idx = {
            let mut inner = node.inner.lock().unwrap();
            inner.name = new_name;
            match &inner.state {
                NodeState::Directory { materialized, .. } => *materialized,
                _ => None,
            }
        };
        state.forest.add_node(new_dir_idx, node)?;
        // A renamed directory's materialized subtree must bubble dirtiness
        // up through its *new* parent from now on (spec §9's parent-link
        // design note).
        if let Some(child_idx) = child_idx {
            state.forest.slots[child_idx].parent = Some(new_dir_idx);
        }
        Ok(())
    }

    pub fn remove(&self, path: &str) -> Result<()> {
        self.cancel.check()?;
        let mut state = self.state.lock().unwrap();
        if !state.writable {
            return Err(VfsError::PermissionDenied);
        }
        let (dir, name) = split_parent(path)?;
        let dir_idx = self.resolve_dir(&mut state.forest, &dir, false, 0)?;
        state.forest.remove_node(dir_idx, &name)?;
        Ok(())
    }

    /// Returns the Tree's Nodes in their stored order (spec §4.1: "no
    /// forced sort").
    pub fn readdir(&self, path: &str) -> Result<Vec<NodeStat>> {
        self.cancel.check()?;
        let mut state = self.state.lock().unwrap();
        let dir_idx = self.resolve_dir(&mut state.forest, path, false, 0)?;
        Ok(state.forest.slots[dir_idx]
            .nodes
            .iter()
            .map(|n| n.stat())
            .collect())
    }

    pub fn mkdirall(&self, path: &str, perm: u32) -> Result<()> {
        self.cancel.check()?;
        let mut state = self.state.lock().unwrap();
        if !state.writable {
            return Err(VfsError::PermissionDenied);
        }
        self.resolve_dir(&mut state.forest, path, true, perm & !UMASK)?;
        Ok(())
    }

    /// Allocates a unique name in the scratch sub-filesystem and returns a
    /// writable handle over it. The file isn't attached to any directory -
    /// it's plumbing for a driver that needs scratch space outside the
    /// committed tree (spec §4.1/§6).
    pub fn tempfile(&self, dir: &str, prefix: &str) -> Result<FileHandle> {
        self.cancel.check()?;
        let state = self.state.lock().unwrap();
        if !state.writable {
            return Err(VfsError::PermissionDenied);
        }
        drop(state);

        let scratch_name = format!("{dir}-{prefix}").replace('/', "_");
        let file = self.scratch.create(&scratch_name).map_err(VfsError::repo)?;
        let node = Arc::new(Node::new(
            prefix.to_string(),
            NewNodeMeta::default(),
            NodeState::File {
                content: None,
                backing: Some(Arc::new(crate::backing::Backing::Scratch(file))),
            },
        ));
        node.add_handle();
        node.add_writer();

        Ok(FileHandle::new(
            node,
            self.repo.clone(),
            self.cache.clone(),
            prefix.to_string(),
            OpenFlags::create_read_write_truncate(),
        ))
    }

    /// Commits the dirty root Tree and returns the new snapshot's id (spec §4.7).
    pub fn commit_snapshot(&self, source_path: &str, tags: Vec<String>) -> Result<ObjectId> {
        self.cancel.check()?;
        let mut state = self.state.lock().unwrap();
        if !state.forest.slots[0].is_dirty() {
            return Err(VfsError::NoChanges);
        }

        let FsState {
            forest, chunker, ..
        } = &mut *state;
        let tree_id = forest.commit(self.repo.as_ref(), chunker, &self.cancel, 0)?;
        self.repo.flush().map_err(VfsError::repo)?;
        self.cancel.check()?;

        let hostname = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();

        let snapshot = Snapshot {
            paths: vec![source_path.to_string()],
            tags,
            hostname,
            time: Timestamp::now(),
            tree: tree_id,
        };
        self.repo
            .save_json_unpacked("snapshot", &snapshot)
            .map_err(VfsError::repo)
    }

    /// Walks `path`'s components as directories, materializing or creating
    /// each as `create_missing` allows, and returns the arena index of the
    /// directory the path names.
    fn resolve_dir(
        &self,
        forest: &mut Forest,
        path: &str,
        create_missing: bool,
        mode: u32,
    ) -> Result<usize> {
        let mut idx = 0;
        for comp in split_components(path) {
            idx = self.step_into_dir(forest, idx, &comp, create_missing, mode)?;
        }
        Ok(idx)
    }

    fn step_into_dir(
        &self,
        forest: &mut Forest,
        idx: usize,
        name: &str,
        create_missing: bool,
        mode: u32,
    ) -> Result<usize> {
        match forest.slots[idx].find(name) {
            Some(node) => {
                if node.kind() != NodeKind::Directory {
                    return Err(VfsError::NotADir);
                }
                forest.materialize_child(self.repo.as_ref(), idx, name)
            }
            None => {
                if !create_missing {
                    return Err(VfsError::NotExist);
                }
                let node = forest.create_dir(
                    idx,
                    name.to_string(),
                    NewNodeMeta {
                        mode,
                        ..Default::default()
                    },
                )?;
                let child_idx = match &node.inner.lock().unwrap().state {
                    NodeState::Directory { materialized, .. } => {
                        materialized.expect("create_dir always materializes")
                    }
                    _ => unreachable!(),
                };
                Ok(child_idx)
            }
        }
    }
}

/// Splits `path` into forward-slash components, dropping empty segments and
/// `.` (spec §4.1: "leading/trailing separators stripped during resolution").
fn split_components(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string)
        .collect()
}

/// Splits `path` into its parent directory path and leaf name. Fails
/// `NOT_EXIST` if `path` has no leaf component (the root itself has no
/// name to open/stat/rename/remove as a leaf entry).
fn split_parent(path: &str) -> Result<(String, String)> {
    let mut comps = split_components(path);
    let name = comps.pop().ok_or(VfsError::NotExist)?;
    Ok((comps.join("/"), name))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::repository::memory::MemoryRepository;
    use crate::scratch::MemoryScratch;

    fn new_fs() -> Filesystem {
        let repo = Arc::new(MemoryRepository::new(0));
        Filesystem::with_scratch(repo, None, Arc::new(MemoryScratch::new())).unwrap()
    }

    #[test]
    fn read_only_fs_rejects_writes() {
        let fs = new_fs();
        assert!(matches!(
            fs.create("x").unwrap_err(),
            VfsError::PermissionDenied
        ));
        assert!(matches!(
            fs.tempfile("", "t").unwrap_err(),
            VfsError::PermissionDenied
        ));
        assert!(matches!(
            fs.mkdirall("a/b", 0o777).unwrap_err(),
            VfsError::PermissionDenied
        ));
    }

    #[test]
    fn create_write_commit_round_trip() -> Result<()> {
        let fs = new_fs();
        fs.start_new_snapshot();

        let mut h = fs.create("file-1")?;
        h.write(b"content of file-1\n")?;
        h.close()?;

        let id = fs.commit_snapshot("/tmp", vec![])?;
        assert_ne!(id, ObjectId::hash(b""));
        Ok(())
    }

    #[test]
    fn no_changes_is_idempotent() {
        let fs = new_fs();
        fs.start_new_snapshot();
        assert!(matches!(
            fs.commit_snapshot("/tmp", vec![]).unwrap_err(),
            VfsError::NoChanges
        ));
    }

    #[test]
    fn mkdirall_then_file_then_mkdirall_on_file_fails() -> Result<()> {
        let fs = new_fs();
        fs.start_new_snapshot();
        fs.mkdirall("foo/bar", 0o777)?;

        let mut h = fs.create("foo/bar/file-1")?;
        h.write(b"hi")?;
        h.close()?;

        assert!(matches!(
            fs.mkdirall("foo/bar/file-1", 0o777).unwrap_err(),
            VfsError::NotADir
        ));
        Ok(())
    }

    #[test]
    fn rename_requires_destination_absent() -> Result<()> {
        let fs = new_fs();
        fs.start_new_snapshot();
        fs.create("a")?.close()?;
        fs.create("b")?.close()?;
        assert!(matches!(fs.rename("a", "b").unwrap_err(), VfsError::Exist));
        fs.rename("a", "c")?;
        assert!(fs.stat("c").is_ok());
        assert!(matches!(fs.stat("a").unwrap_err(), VfsError::NotExist));
        Ok(())
    }
}
