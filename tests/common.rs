#![allow(dead_code)]

//! Shared harness for the integration tests: a once-only tracing
//! subscriber and fixture builders for the `README.md`/`images/...` sample
//! tree scenarios describe.

use std::sync::{Arc, Once};

use snapvfs::fs::{Filesystem, OpenFlags};
use snapvfs::repository::memory::MemoryRepository;
use snapvfs::scratch::MemoryScratch;

static TRACING: Once = Once::new();

/// Installs a `tracing-subscriber` fmt layer once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    });
}

/// A fresh, in-memory, writable Filesystem with no parent snapshot.
pub fn new_fs() -> Filesystem {
    init_tracing();
    let repo = Arc::new(MemoryRepository::new(0));
    let fs = Filesystem::with_scratch(repo, None, Arc::new(MemoryScratch::new()))
        .expect("building an empty Filesystem never fails");
    fs.start_new_snapshot();
    fs
}

pub const README_BYTES: &[u8] =
    b"# Sample Directory\n\nThis directory has some files but isn't a git repository. \
It's for testing the raw vfs methods.\n";

/// Builds a snapshot containing `README.md` (116 bytes) and
/// `images/IMG_8646.jpeg` (1_635_171 bytes), matching spec §8 scenario 1,
/// and returns the repository plus the snapshot's tree id so callers can
/// reopen a [`Filesystem`] against it.
pub fn seed_sample_tree() -> (Arc<MemoryRepository>, snapvfs::hashing::ObjectId) {
    let repo = Arc::new(MemoryRepository::new(0));
    let fs = Filesystem::with_scratch(repo.clone(), None, Arc::new(MemoryScratch::new()))
        .expect("building an empty Filesystem never fails");
    fs.start_new_snapshot();

    assert_eq!(README_BYTES.len(), 116);
    let mut readme = fs
        .open_file("README.md", OpenFlags::create_read_write_truncate(), 0o644)
        .unwrap();
    readme.write(README_BYTES).unwrap();
    readme.close().unwrap();

    fs.mkdirall("images", 0o755).unwrap();
    let jpeg_bytes = vec![0x42u8; 1_635_171];
    let mut jpeg = fs.create("images/IMG_8646.jpeg").unwrap();
    jpeg.write(&jpeg_bytes).unwrap();
    jpeg.close().unwrap();

    let snapshot_id = fs
        .commit_snapshot("/home/example/sample", vec![])
        .unwrap();
    let snapshot = repo.load_snapshot(snapshot_id).unwrap();
    (repo, snapshot.tree)
}

/// Reads a handle to EOF.
pub fn read_all(h: &mut snapvfs::handle::FileHandle) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = h.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}
