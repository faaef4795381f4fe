//! Single-writer discipline, commit-time handle checks, and the path
//! operations (`rename`/`remove`/`tempfile`) that don't fit the seed
//! scenarios or cross-cutting properties.

mod common;

use snapvfs::error::VfsError;

#[test]
fn a_second_writer_is_rejected_while_the_first_is_open() {
    let fs = common::new_fs();
    let mut first = fs.create("f").unwrap();
    first.write(b"hi").unwrap();

    let err = fs.create("f").unwrap_err();
    assert!(matches!(err, VfsError::InUse));

    first.close().unwrap();
    // Once closed, a new writer is fine.
    fs.create("f").unwrap().close().unwrap();
}

#[test]
fn commit_fails_while_any_handle_on_the_file_is_open() {
    let fs = common::new_fs();
    let mut h = fs.create("f").unwrap();
    h.write(b"hi").unwrap();

    let err = fs.commit_snapshot("/tmp", vec![]).unwrap_err();
    assert!(matches!(err, VfsError::InUse));

    h.close().unwrap();
    fs.commit_snapshot("/tmp", vec![]).unwrap();
}

#[test]
fn rename_moves_an_entry_and_rejects_existing_destinations() {
    let fs = common::new_fs();
    fs.create("a").unwrap().close().unwrap();
    fs.mkdirall("dir", 0o777).unwrap();
    fs.create("dir/b").unwrap().close().unwrap();

    // Destination exists.
    let err = fs.rename("a", "dir/b").unwrap_err();
    assert!(matches!(err, VfsError::Exist));

    // A clean rename across directories.
    fs.rename("a", "dir/a").unwrap();
    assert!(matches!(fs.stat("a").unwrap_err(), VfsError::NotExist));
    assert!(fs.stat("dir/a").is_ok());
}

#[test]
fn rename_of_a_directory_into_another_parent_keeps_its_children_reachable() {
    let fs = common::new_fs();
    fs.mkdirall("src/nested", 0o777).unwrap();
    fs.create("src/nested/leaf").unwrap().close().unwrap();
    fs.mkdirall("container", 0o777).unwrap();

    fs.rename("src", "container/dst").unwrap();
    assert!(fs.stat("container/dst/nested/leaf").is_ok());
    assert!(matches!(fs.stat("src").unwrap_err(), VfsError::NotExist));

    // Mutating under the new location must still bubble dirtiness up
    // through the new parent, not the old one.
    fs.create("container/dst/nested/leaf2")
        .unwrap()
        .close()
        .unwrap();
    fs.commit_snapshot("/tmp", vec![]).unwrap();
}

#[test]
fn rename_of_a_directory_into_its_own_subtree_is_rejected() {
    let fs = common::new_fs();
    fs.mkdirall("a/b", 0o777).unwrap();
    fs.create("a/leaf").unwrap().close().unwrap();

    let err = fs.rename("a", "a/b/a2").unwrap_err();
    assert!(matches!(err, VfsError::InvalidArgument(_)));

    // Rejected in place: nothing moved, "a" and its contents are untouched.
    assert!(fs.stat("a").is_ok());
    assert!(fs.stat("a/leaf").is_ok());
    assert!(fs.stat("a/b/a2").is_err());
}

#[test]
fn remove_deletes_an_entry() {
    let fs = common::new_fs();
    fs.create("gone").unwrap().close().unwrap();
    fs.remove("gone").unwrap();
    assert!(matches!(fs.stat("gone").unwrap_err(), VfsError::NotExist));
    assert!(matches!(fs.remove("gone").unwrap_err(), VfsError::NotExist));
}

#[test]
fn opening_a_missing_file_without_create_fails() {
    let fs = common::new_fs();
    assert!(matches!(
        fs.open("nope").unwrap_err(),
        VfsError::NotExist
    ));
}

#[test]
fn opening_a_directory_as_a_file_fails() {
    let fs = common::new_fs();
    fs.mkdirall("d", 0o777).unwrap();
    assert!(matches!(fs.open("d").unwrap_err(), VfsError::NotAFile));
}

#[test]
fn tempfile_is_writable_and_not_visible_in_readdir() {
    let fs = common::new_fs();
    let mut t = fs.tempfile("", "scratch").unwrap();
    t.write(b"throwaway").unwrap();
    t.close().unwrap();
    assert!(fs.readdir("").unwrap().is_empty());
}
