//! The six end-to-end scenarios a reviewer would run by hand against a
//! freshly opened Filesystem.

mod common;

use std::sync::Arc;

use snapvfs::error::VfsError;
use snapvfs::fs::{Filesystem, Whence};
use snapvfs::repository::memory::MemoryRepository;
use snapvfs::scratch::MemoryScratch;

use common::{read_all, seed_sample_tree, README_BYTES};

#[test]
fn scenario_1_readdir_and_read_match_the_seeded_tree() {
    let (repo, tree_id) = seed_sample_tree();
    let fs = Filesystem::with_scratch(repo, Some(tree_id), Arc::new(MemoryScratch::new()))
        .expect("opening a committed tree should succeed");

    let root = fs.readdir("").unwrap();
    assert_eq!(root.len(), 2);
    assert_eq!(root[0].name, "README.md");
    assert_eq!(root[0].mode, 0o644);
    assert_eq!(root[0].size, 116);
    assert_eq!(root[1].name, "images");
    assert!(root[1].is_dir);
    assert_eq!(root[1].mode, 0o755);

    let images = fs.readdir("images").unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].name, "IMG_8646.jpeg");
    assert_eq!(images[0].size, 1_635_171);

    let mut h = fs.open("README.md").unwrap();
    let bytes = read_all(&mut h);
    assert_eq!(bytes, README_BYTES);
}

#[test]
fn scenario_2_reader_sees_old_bytes_writer_sees_new() {
    let (repo, tree_id) = seed_sample_tree();
    let fs = Filesystem::with_scratch(repo, Some(tree_id), Arc::new(MemoryScratch::new()))
        .expect("opening a committed tree should succeed");
    fs.start_new_snapshot();

    let mut h1 = fs.open("README.md").unwrap();
    let mut buf = [0u8; 20];
    h1.read(&mut buf).unwrap();
    assert_eq!(&buf, b"# Sample Directory\n\n");

    let new_contents = b"# Sample Directory\n\nBut with revised content.\n";
    let mut h2 = fs.create("README.md").unwrap();

    // H1 was opened before the promotion; its view is frozen at the old
    // content, so it now reads past its own EOF.
    let mut tail = [0u8; 8];
    let n = h1.read(&mut tail).unwrap();
    assert_eq!(n, 0);

    h2.write(new_contents).unwrap();
    h2.close().unwrap();

    let mut after = [0u8; 20];
    let n = h1.read_at(&mut after, 20).unwrap();
    assert_eq!(&after[..n], b"But with revised con");
}

#[test]
fn scenario_3_create_write_commit_round_trip() {
    let fs = common::new_fs();

    let mut h = fs.create("file-1").unwrap();
    h.write(b"content of file-1\n").unwrap();
    h.close().unwrap();

    let id = fs.commit_snapshot("/tmp", vec![]).unwrap();
    assert_ne!(id.to_string(), "");
}

#[test]
fn scenario_4_mkdirall_then_not_a_dir() {
    let fs = common::new_fs();
    fs.mkdirall("foo/bar", 0o777).unwrap();

    let mut h = fs.create("foo/bar/file-1").unwrap();
    h.write(b"hi").unwrap();
    h.close().unwrap();

    let err = fs.mkdirall("foo/bar/file-1", 0o777).unwrap_err();
    assert!(matches!(err, VfsError::NotADir));
}

#[test]
fn scenario_5_read_only_filesystem_rejects_every_mutation() {
    let repo: Arc<MemoryRepository> = Arc::new(MemoryRepository::new(0));
    let fs = Filesystem::with_scratch(repo, None, Arc::new(MemoryScratch::new())).unwrap();
    assert!(!fs.is_writable());

    assert!(matches!(
        fs.create("x").unwrap_err(),
        VfsError::PermissionDenied
    ));
    assert!(matches!(
        fs.tempfile("", "t").unwrap_err(),
        VfsError::PermissionDenied
    ));
    assert!(matches!(
        fs.rename("a", "b").unwrap_err(),
        VfsError::PermissionDenied
    ));
    assert!(matches!(
        fs.remove("a").unwrap_err(),
        VfsError::PermissionDenied
    ));
    assert!(matches!(
        fs.mkdirall("a", 0o777).unwrap_err(),
        VfsError::PermissionDenied
    ));

    // No state change: the root is still clean and empty.
    assert!(fs.readdir("").unwrap().is_empty());
}

#[test]
fn scenario_6_identical_bytes_save_each_chunk_once() {
    let repo = Arc::new(MemoryRepository::new(0));
    let fs = Filesystem::with_scratch(repo.clone(), None, Arc::new(MemoryScratch::new())).unwrap();
    fs.start_new_snapshot();

    let payload = b"duplicate me please".repeat(50_000);
    let mut a = fs.create("a").unwrap();
    a.write(&payload).unwrap();
    a.close().unwrap();

    let mut b = fs.create("b").unwrap();
    b.write(&payload).unwrap();
    b.close().unwrap();

    fs.commit_snapshot("/tmp", vec![]).unwrap();
    let data_saves_for_both_files = repo.data_blob_save_calls();

    // A second Filesystem writing the exact same bytes under one more name
    // should not cause any *new* chunk to be saved: every chunk it produces
    // already has an entry `index_has` reports as present. The commit still
    // saves one new tree blob (the root now has three entries instead of
    // two), so only the data-blob count is asserted unchanged.
    fs.start_new_snapshot();
    let mut c = fs.create("c").unwrap();
    c.write(&payload).unwrap();
    c.close().unwrap();
    fs.commit_snapshot("/tmp", vec![]).unwrap();

    assert_eq!(repo.data_blob_save_calls(), data_saves_for_both_files);
}

#[test]
fn seek_whence_variants() {
    let fs = common::new_fs();
    let mut h = fs.create("f").unwrap();
    h.write(b"0123456789").unwrap();

    assert_eq!(h.seek(0, Whence::Start).unwrap(), 0);
    assert_eq!(h.seek(5, Whence::Current).unwrap(), 5);
    assert_eq!(h.seek(-2, Whence::End).unwrap(), 8);
    h.close().unwrap();
}
