//! The tree arena: an ordered set of Nodes representing a directory, plus
//! the bookkeeping that ties every materialized directory in a Filesystem
//! together into dirty-propagating "forest" (spec §9: "implement as an
//! arena-of-trees with integer indices").
//!
//! `backpak::tree` only ever reads a `BTreeMap<Utf8PathBuf, Node>` out of a
//! pack - it's never mutated, so entries come back alphabetically sorted by
//! construction. Spec §4.1 requires `readdir` to preserve insertion order
//! ("no forced sort"), which a `BTreeMap` can't do, hence the arena-of-`Vec`
//! redesign here; the per-entry `Node`/metadata shape is still the one
//! `backpak::tree::Node` established (see [`crate::node`]).

use rustc_hash::FxHashMap;

use crate::cancel::CancellationToken;
use crate::chunk::Chunker;
use crate::error::{Result, VfsError, bug};
use crate::hashing::ObjectId;
use crate::node::{Node, NodeContents, NodeKind, NodeRecord, NodeState, TreeRecord};
use crate::repository::{Repository, encode_tree};
use std::sync::Arc;

/// One materialized directory: an ordered list of entries plus a name
/// index, a link to its parent slot (`None` only for the root), and the id
/// it was last committed under (`None` means dirty, spec §3).
pub struct TreeSlot {
    pub parent: Option<usize>,
    pub id: Option<ObjectId>,
    pub nodes: Vec<Arc<Node>>,
    pub index: FxHashMap<String, usize>,
}

impl TreeSlot {
    fn empty(parent: Option<usize>) -> Self {
        Self {
            parent,
            id: None,
            nodes: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    fn from_record(parent: Option<usize>, id: ObjectId, record: TreeRecord) -> Self {
        let mut nodes = Vec::with_capacity(record.nodes.len());
        let mut index = FxHashMap::default();
        for rec in record.nodes {
            index.insert(rec.name.clone(), nodes.len());
            nodes.push(Arc::new(Node::from_record(rec)));
        }
        Self {
            parent,
            id: Some(id),
            nodes,
            index,
        }
    }

    pub fn find(&self, name: &str) -> Option<Arc<Node>> {
        self.index.get(name).map(|&i| self.nodes[i].clone())
    }

    pub fn is_dirty(&self) -> bool {
        self.id.is_none()
    }
}

/// All materialized directories for one Filesystem session. Index 0 is
/// always the root.
pub struct Forest {
    pub slots: Vec<TreeSlot>,
}

impl Forest {
    /// A brand new, empty, writable root - no parent snapshot.
    pub fn new_empty() -> Self {
        Self {
            slots: vec![TreeSlot::empty(None)],
        }
    }

    /// A root materialized from an existing tree id.
    pub fn from_root(repo: &dyn Repository, root: ObjectId) -> Result<Self> {
        let record = repo.load_tree(root).map_err(VfsError::repo)?;
        Ok(Self {
            slots: vec![TreeSlot::from_record(None, root, record)],
        })
    }

    /// Materializes the child tree for the directory Node at
    /// `(tree_idx, name)`, if it hasn't been already, and returns its arena
    /// index.
    pub fn materialize_child(
        &mut self,
        repo: &dyn Repository,
        tree_idx: usize,
        name: &str,
    ) -> Result<usize> {
        let node = self.slots[tree_idx]
            .find(name)
            .unwrap_or_else(|| bug(&format!("materialize_child: no node named {name:?} in this tree")));

        let (subtree_id, already_materialized) = {
            let inner = node.inner.lock().unwrap();
            match &inner.state {
                NodeState::Directory {
                    subtree,
                    materialized,
                } => (*subtree, *materialized),
                _ => return Err(VfsError::NotADir),
            }
        };

        if let Some(idx) = already_materialized {
            crate::counters::bump(&crate::counters::counters().tree_materialize_hit);
            return Ok(idx);
        }
        crate::counters::bump(&crate::counters::counters().tree_materialize_miss);

        // Not yet materialized, so this must be a committed directory with a
        // subtree id to load (a brand-new directory is materialized at
        // creation time - see `Forest::create_dir` - so it never reaches
        // this branch with `subtree == None`).
        let subtree_id = subtree_id
            .expect("directory node missing subtree id before materialization");
        let record = repo.load_tree(subtree_id).map_err(VfsError::repo)?;
        let new_idx = self.slots.len();
        self.slots
            .push(TreeSlot::from_record(Some(tree_idx), subtree_id, record));

        let mut inner = node.inner.lock().unwrap();
        if let NodeState::Directory { materialized, .. } = &mut inner.state {
            *materialized = Some(new_idx);
        }
        Ok(new_idx)
    }

    /// Whether `ancestor_idx` appears on `idx`'s parent chain (inclusive of
    /// `idx` itself). Used by `Filesystem::rename` to refuse moving a
    /// directory inside its own subtree, which would otherwise graft the
    /// arena's parent links into a cycle unreachable from the root.
    pub fn is_descendant(&self, idx: usize, ancestor_idx: usize) -> bool {
        let mut cur = Some(idx);
        while let Some(i) = cur {
            if i == ancestor_idx {
                return true;
            }
            cur = self.slots[i].parent;
        }
        false
    }

    /// Clears the committed id on `idx` and every ancestor up to the root -
    /// the sole mechanism for dirty propagation (spec §4.3's `mark_dirty`).
    pub fn mark_dirty(&mut self, mut idx: usize) {
        loop {
            self.slots[idx].id = None;
            match self.slots[idx].parent {
                Some(parent) => idx = parent,
                None => break,
            }
        }
    }

    /// Creates a brand-new, empty directory under `parent_idx`, already
    /// materialized (there's no subtree id to load - it doesn't exist until
    /// this directory is committed). Marks `parent_idx` dirty.
    pub fn create_dir(
        &mut self,
        parent_idx: usize,
        name: String,
        meta: crate::node::NewNodeMeta,
    ) -> Result<Arc<Node>> {
        let new_idx = self.slots.len();
        self.slots.push(TreeSlot::empty(Some(parent_idx)));

        let node = Arc::new(Node::new(
            name,
            meta,
            NodeState::Directory {
                subtree: None,
                materialized: Some(new_idx),
            },
        ));
        self.add_node(parent_idx, node.clone())?;
        Ok(node)
    }

    pub fn add_node(&mut self, tree_idx: usize, node: Arc<Node>) -> Result<()> {
        let name = node.name();
        let slot = &mut self.slots[tree_idx];
        if slot.index.contains_key(&name) {
            // The façade must check for this before calling add_node; a
            // collision here is a programming error, not a user one.
            bug(&format!("add_node: {name:?} already exists in this tree"));
        }
        slot.index.insert(name, slot.nodes.len());
        slot.nodes.push(node);
        self.mark_dirty(tree_idx);
        Ok(())
    }

    pub fn remove_node(&mut self, tree_idx: usize, name: &str) -> Result<Arc<Node>> {
        let slot = &mut self.slots[tree_idx];
        let Some(&i) = slot.index.get(name) else {
            return Err(VfsError::NotExist);
        };
        let removed = slot.nodes.remove(i);
        slot.index.remove(name);
        for (_, idx) in slot.index.iter_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        self.mark_dirty(tree_idx);
        Ok(removed)
    }

    /// Recursively commits the tree at `idx`: commits every child Node,
    /// serializes the node list, and stores it as a tree blob if the
    /// Repository doesn't already have it. Idempotent when already clean.
    pub fn commit(
        &mut self,
        repo: &dyn Repository,
        chunker: &mut Chunker,
        cancel: &CancellationToken,
        idx: usize,
    ) -> Result<ObjectId> {
        if let Some(id) = self.slots[idx].id {
            return Ok(id);
        }

        let nodes: Vec<Arc<Node>> = self.slots[idx].nodes.clone();
        let mut records = Vec::with_capacity(nodes.len());
        for node in nodes {
            cancel.check()?;
            records.push(commit_node(self, repo, chunker, cancel, &node)?);
        }

        let tree = TreeRecord { nodes: records };
        let bytes = encode_tree(&tree).map_err(VfsError::repo)?;
        let id = ObjectId::hash(&bytes);

        let already_present = repo
            .index_has(id, crate::blob::BlobKind::Tree)
            .map_err(VfsError::repo)?;
        if !already_present {
            repo.save_blob(crate::blob::BlobKind::Tree, &bytes, id, false)
                .map_err(VfsError::repo)?;
        }

        self.slots[idx].id = Some(id);
        Ok(id)
    }
}

/// Commits a single Node, recursing into its child tree if it's a
/// materialized directory (spec §4.3).
fn commit_node(
    forest: &mut Forest,
    repo: &dyn Repository,
    chunker: &mut Chunker,
    cancel: &CancellationToken,
    node: &Arc<Node>,
) -> Result<NodeRecord> {
    let needs_chunking = {
        let inner = node.inner.lock().unwrap();
        matches!(&inner.state, NodeState::File { content: None, .. })
    };

    if needs_chunking {
        if node.open_handles() > 0 {
            return Err(VfsError::InUse);
        }

        let backing = {
            let mut inner = node.inner.lock().unwrap();
            match &mut inner.state {
                NodeState::File { backing, .. } => backing
                    .take()
                    .expect("dirty file node must have a backing to chunk"),
                _ => unreachable!("needs_chunking only set for File nodes"),
            }
        };

        let mut buf = Vec::new();
        read_whole(&backing, &mut buf)?;
        let (ids, size) = chunker.chunk_and_save(repo, cancel, &buf)?;

        let mut inner = node.inner.lock().unwrap();
        if let NodeState::File { content, backing } = &mut inner.state {
            *content = Some(ids);
            *backing = None;
        }
        inner.size = size;
    }

    let materialized_child = {
        let inner = node.inner.lock().unwrap();
        match &inner.state {
            NodeState::Directory { materialized, .. } => *materialized,
            _ => None,
        }
    };

    if let Some(child_idx) = materialized_child {
        let subtree = forest.commit(repo, chunker, cancel, child_idx)?;
        let mut inner = node.inner.lock().unwrap();
        if let NodeState::Directory { subtree: s, .. } = &mut inner.state {
            *s = Some(subtree);
        }
    }

    let inner = node.inner.lock().unwrap();
    let contents = match &inner.state {
        NodeState::File { content, .. } => NodeContents::File {
            content: content.clone().expect("file committed above"),
        },
        NodeState::Directory { subtree, .. } => NodeContents::Directory {
            subtree: subtree.expect("directory committed above"),
        },
        NodeState::Symlink { target } => NodeContents::Symlink {
            target: target.clone(),
        },
    };

    assert_kind_matches(inner.state.kind(), &contents);

    Ok(NodeRecord {
        name: inner.name.clone(),
        contents,
        mode: inner.mode,
        size: inner.size,
        uid: inner.uid,
        gid: inner.gid,
        user: inner.user.clone(),
        group: inner.group.clone(),
        mtime: inner.mtime,
        atime: inner.atime,
        ctime: inner.ctime,
    })
}

fn read_whole(backing: &crate::backing::Backing, buf: &mut Vec<u8>) -> Result<()> {
    const CHUNK: usize = 64 * 1024;
    let mut tmp = vec![0u8; CHUNK];
    let mut off = 0u64;
    loop {
        let n = backing.read_scratch_at(&mut tmp, off)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        off += n as u64;
    }
    Ok(())
}

fn assert_kind_matches(kind: NodeKind, contents: &NodeContents) {
    debug_assert_eq!(kind, contents.kind());
}
