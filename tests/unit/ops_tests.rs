use std::{fs, path::Path};

use tempfile::{tempdir, TempDir};
use tierfs::{
    fs::{ops::Ops, union::Union},
    lock::LockTable,
    Error,
};

fn new_ops() -> tierfs::Result<(Ops, TempDir, TempDir)> {
    let primary = tempdir()?;
    let fallback = tempdir()?;
    let union = Union::new(primary.path(), fallback.path())?;
    let ops = Ops::new(union, LockTable::in_memory()?);
    Ok((ops, primary, fallback))
}

#[test]
fn getattr_returns_fallback_metadata_when_primary_lacks_entry() -> tierfs::Result<()> {
    let (ops, _primary, fallback) = new_ops()?;
    fs::write(fallback.path().join("legacy.txt"), b"12345")?;

    let meta = ops.getattr(Path::new("legacy.txt"))?;
    assert_eq!(5, meta.len());
    Ok(())
}

#[test]
fn getattr_prefers_primary_when_both_stores_hold_the_path() -> tierfs::Result<()> {
    let (ops, primary, fallback) = new_ops()?;
    fs::write(primary.path().join("both.txt"), b"primary!")?;
    fs::write(fallback.path().join("both.txt"), b"f")?;

    let meta = ops.getattr(Path::new("both.txt"))?;
    assert_eq!(8, meta.len());
    Ok(())
}

#[test]
fn getattr_missing_in_both_stores_errors() {
    let (ops, _primary, _fallback) = new_ops().unwrap();

    let err = ops
        .getattr(Path::new("ghost.txt"))
        .expect_err("missing entry should fail");
    let actual = err
        .downcast_ref::<Error>()
        .expect("should downcast to tierfs::Error");
    assert!(matches!(actual, Error::NotFound(_)));
}

#[test]
fn create_write_read_roundtrip() -> tierfs::Result<()> {
    let (ops, primary, _fallback) = new_ops()?;
    let rel = Path::new("notes/today.txt");

    ops.create(rel, 0o644)?;
    let payload = b"hello union".to_vec();
    let written = ops.write(rel, &payload, 0)?;
    assert_eq!(payload.len(), written);

    let read = ops.read(rel, payload.len(), 0)?;
    assert_eq!(payload, read);

    // New files land in the primary store.
    assert!(primary.path().join(rel).exists());
    Ok(())
}

#[test]
fn create_seeds_an_unlocked_record_and_keeps_existing_ones() -> tierfs::Result<()> {
    let (ops, _primary, _fallback) = new_ops()?;
    let rel = Path::new("file.txt");

    ops.create(rel, 0o644)?;
    assert_eq!(Some(false), ops.locks().is_locked(rel)?);

    // A held lock is left as-is by a subsequent create.
    assert!(ops.locks().acquire(rel)?);
    ops.create(rel, 0o644)?;
    assert_eq!(Some(true), ops.locks().is_locked(rel)?);
    Ok(())
}

#[test]
fn create_truncates_a_preexisting_file() -> tierfs::Result<()> {
    let (ops, primary, _fallback) = new_ops()?;
    let rel = Path::new("trunc.txt");
    fs::write(primary.path().join(rel), b"old contents")?;

    ops.create(rel, 0o644)?;
    assert_eq!(0, fs::metadata(primary.path().join(rel))?.len());
    Ok(())
}

#[test]
fn read_and_write_fail_busy_while_the_lock_is_held() -> tierfs::Result<()> {
    let (ops, primary, _fallback) = new_ops()?;
    let rel = Path::new("contended.txt");
    fs::write(primary.path().join(rel), b"data")?;

    assert!(ops.locks().acquire(rel)?);

    let read_err = ops.read(rel, 4, 0).expect_err("read must observe busy");
    assert!(matches!(
        read_err.downcast_ref::<Error>(),
        Some(Error::Busy(_))
    ));

    let write_err = ops
        .write(rel, b"nope", 0)
        .expect_err("write must observe busy");
    assert!(matches!(
        write_err.downcast_ref::<Error>(),
        Some(Error::Busy(_))
    ));

    // Busy performs no I/O.
    assert_eq!(b"data", fs::read(primary.path().join(rel))?.as_slice());

    ops.locks().release(rel)?;
    assert_eq!(b"data".to_vec(), ops.read(rel, 4, 0)?);
    Ok(())
}

#[test]
fn read_releases_the_lock_even_when_io_fails() -> tierfs::Result<()> {
    let (ops, _primary, _fallback) = new_ops()?;
    let rel = Path::new("vanished.txt");

    let err = ops.read(rel, 16, 0).expect_err("missing file should fail");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::NotFound(_))
    ));
    assert_eq!(
        Some(false),
        ops.locks().is_locked(rel)?,
        "lock must be released after the failed read"
    );
    Ok(())
}

#[test]
fn write_targets_the_store_already_holding_the_file() -> tierfs::Result<()> {
    let (ops, primary, fallback) = new_ops()?;
    let rel = Path::new("resident.txt");
    fs::write(fallback.path().join(rel), b"original")?;

    ops.write(rel, b"UPDATED!", 0)?;

    assert_eq!(b"UPDATED!", fs::read(fallback.path().join(rel))?.as_slice());
    assert!(
        !primary.path().join(rel).exists(),
        "write must not migrate the file to the primary store"
    );
    Ok(())
}

#[test]
fn write_does_not_truncate_existing_contents() -> tierfs::Result<()> {
    let (ops, primary, _fallback) = new_ops()?;
    let rel = Path::new("patch.txt");
    fs::write(primary.path().join(rel), b"AAAAAAAA")?;

    ops.write(rel, b"ZZ", 2)?;

    assert_eq!(b"AAZZAAAA", fs::read(primary.path().join(rel))?.as_slice());
    Ok(())
}

#[test]
fn write_beyond_eof_extends_with_stable_zero_padding() -> tierfs::Result<()> {
    let (ops, _primary, _fallback) = new_ops()?;
    let rel = Path::new("sparse.txt");

    ops.create(rel, 0o644)?;
    ops.write(rel, b"tail", 8)?;

    let first = ops.read(rel, 12, 0)?;
    assert_eq!(12, first.len());
    assert!(first[..8].iter().all(|b| *b == 0));
    assert_eq!(b"tail", &first[8..]);

    // Padding must be stable on re-read.
    let second = ops.read(rel, 12, 0)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn list_directory_seeds_lock_records_for_plain_files_only() -> tierfs::Result<()> {
    let (ops, primary, fallback) = new_ops()?;
    fs::write(primary.path().join("a.txt"), b"")?;
    fs::write(fallback.path().join("b.txt"), b"")?;
    fs::create_dir(primary.path().join("subdir"))?;

    let listing = ops.list_directory(Path::new(""))?;
    assert_eq!(vec![".", "..", "a.txt", "b.txt", "subdir"], listing);

    assert_eq!(Some(false), ops.locks().is_locked(Path::new("a.txt"))?);
    assert_eq!(Some(false), ops.locks().is_locked(Path::new("b.txt"))?);
    assert_eq!(
        None,
        ops.locks().is_locked(Path::new("subdir"))?,
        "directories must not get lock records"
    );
    Ok(())
}

#[test]
fn listed_preexisting_files_are_subject_to_locking() -> tierfs::Result<()> {
    let (ops, _primary, fallback) = new_ops()?;
    fs::write(fallback.path().join("old.txt"), b"pre-mount data")?;

    ops.list_directory(Path::new(""))?;

    let rel = Path::new("old.txt");
    assert!(ops.locks().acquire(rel)?);
    let err = ops.read(rel, 4, 0).expect_err("read must observe busy");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Busy(_))));
    ops.locks().release(rel)?;
    Ok(())
}

#[test]
fn delete_prefers_primary_then_falls_back() -> tierfs::Result<()> {
    let (ops, primary, fallback) = new_ops()?;
    let rel = Path::new("twice.txt");
    fs::write(primary.path().join(rel), b"p")?;
    fs::write(fallback.path().join(rel), b"f")?;

    ops.delete(rel)?;
    assert!(!primary.path().join(rel).exists());
    assert!(
        fallback.path().join(rel).exists(),
        "only the primary copy is removed when both stores hold the path"
    );

    ops.delete(rel)?;
    assert!(!fallback.path().join(rel).exists());
    Ok(())
}

#[test]
fn delete_missing_in_both_stores_errors() {
    let (ops, _primary, _fallback) = new_ops().unwrap();

    let err = ops
        .delete(Path::new("ghost.txt"))
        .expect_err("deleting a missing entry should fail");
    let actual = err
        .downcast_ref::<Error>()
        .expect("should downcast to tierfs::Error");
    assert!(matches!(actual, Error::NotFound(_)));
}

#[test]
fn delete_then_create_starts_unlocked() -> tierfs::Result<()> {
    let (ops, _primary, _fallback) = new_ops()?;
    let rel = Path::new("reborn.txt");

    ops.create(rel, 0o644)?;
    assert!(ops.locks().acquire(rel)?);

    // Deletion drops the record even while locked, so the recreated path
    // starts unlocked.
    ops.delete(rel)?;
    ops.create(rel, 0o644)?;
    assert!(ops.locks().acquire(rel)?);
    ops.locks().release(rel)?;
    Ok(())
}

#[test]
fn busy_rejections_show_up_in_the_ops_snapshot() -> tierfs::Result<()> {
    let (ops, primary, _fallback) = new_ops()?;
    let rel = Path::new("metered.txt");
    fs::write(primary.path().join(rel), b"data")?;

    assert!(ops.locks().acquire(rel)?);
    let _ = ops.read(rel, 4, 0);
    ops.locks().release(rel)?;
    let _ = ops.read(rel, 4, 0)?;
    ops.write(rel, b"x", 0)?;

    let snapshot = ops.snapshot();
    assert_eq!(1, snapshot.busy_rejections);
    assert_eq!(1, snapshot.reads);
    assert_eq!(1, snapshot.writes);
    Ok(())
}
