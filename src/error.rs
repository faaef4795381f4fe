//! The VFS's own error type.
//!
//! Internal plumbing (the reference [`crate::repository`] implementations,
//! [`crate::file_util`]) uses `anyhow` the way `backpak`'s backend and pack
//! code does. The façade itself returns `VfsError` so a driver can match on
//! error kinds without downcasting, per spec §7.

use std::fmt;

use crate::hashing::ObjectId;

/// One of the error kinds a VFS operation can fail with.
#[derive(Debug)]
pub enum VfsError {
    /// The named entry doesn't exist.
    NotExist,
    /// The named entry already exists (`EXCL` open, or a `rename` target).
    Exist,
    /// A write-implying operation was attempted on a read-only Filesystem or
    /// a read-only handle.
    PermissionDenied,
    /// An intermediate path component isn't a directory.
    NotADir,
    /// The target of a file open isn't a file.
    NotAFile,
    /// A write-implying call reached a read-only Backing.
    ReadOnlyFs,
    /// A second writer tried to open a Node that already has one, or
    /// `Node::commit` was attempted while handles remain open.
    InUse,
    /// A method was called on an already-closed FileHandle.
    Closed,
    /// `commit_snapshot` was called on a Filesystem whose root Tree isn't dirty.
    NoChanges,
    /// A chunk-view Backing's cumulative chunk sizes didn't add up to the
    /// Node's declared size.
    SizeMismatch { declared: u64, computed: u64 },
    /// The calling context was cancelled mid-operation.
    Cancelled,
    /// `write` was attempted with `APPEND`, which this VFS doesn't support.
    Unimplemented(&'static str),
    /// `rename` was asked to move a directory inside itself.
    InvalidArgument(&'static str),
    /// An underlying Repository call failed.
    Repo(anyhow::Error),
}

impl VfsError {
    pub fn repo(e: impl Into<anyhow::Error>) -> Self {
        VfsError::Repo(e.into())
    }

    pub fn size_mismatch(node: &str, declared: u64, computed: u64) -> Self {
        tracing::warn!(
            "{node}: declared size {declared} doesn't match the sum of its chunk sizes ({computed})"
        );
        VfsError::SizeMismatch { declared, computed }
    }
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VfsError::NotExist => write!(f, "no such file or directory"),
            VfsError::Exist => write!(f, "already exists"),
            VfsError::PermissionDenied => write!(f, "permission denied"),
            VfsError::NotADir => write!(f, "not a directory"),
            VfsError::NotAFile => write!(f, "not a file"),
            VfsError::ReadOnlyFs => write!(f, "read-only filesystem"),
            VfsError::InUse => write!(f, "in use"),
            VfsError::Closed => write!(f, "file handle is closed"),
            VfsError::NoChanges => write!(f, "no changes to commit"),
            VfsError::SizeMismatch { declared, computed } => write!(
                f,
                "size mismatch: node declares {declared} bytes, chunks sum to {computed}"
            ),
            VfsError::Cancelled => write!(f, "operation was cancelled"),
            VfsError::Unimplemented(what) => write!(f, "not implemented: {what}"),
            VfsError::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            VfsError::Repo(e) => write!(f, "repository error: {e}"),
        }
    }
}

impl std::error::Error for VfsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VfsError::Repo(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, VfsError>;

/// A tree or blob the façade expected to find but didn't - a programming
/// invariant violation (a bug in the driver or in this crate), not a user
/// error. Per spec §7, these terminate the process rather than bubble up
/// as `VfsError`.
#[track_caller]
pub fn missing_object(what: &str, id: ObjectId) -> ! {
    panic!("invariant violated: {what} {id} is missing from the repository");
}

/// Any other programming-invariant violation (duplicate node insertion,
/// missing root tree, ...) - terminates the process per spec §7.
#[track_caller]
pub fn bug(what: &str) -> ! {
    panic!("invariant violated: {what}");
}
