//! A copy-on-write snapshot filesystem over a content-addressed blob store.
//!
//! [`fs::Filesystem`] is the entry point: a mutable working tree backed by
//! an immutable, content-addressed [`repository::Repository`], with writes
//! staged through a [`scratch::Scratch`] sub-filesystem and folded into
//! deduplicated, content-defined chunks on [`fs::Filesystem::commit_snapshot`].

pub mod backing;
pub mod blob;
pub mod cache;
pub mod cancel;
pub mod chunk;
pub mod config;
pub mod counters;
pub mod error;
pub mod file_util;
pub mod fs;
pub mod handle;
pub mod hashing;
pub mod node;
pub mod repository;
pub mod scratch;
pub mod tree;
