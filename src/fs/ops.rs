//! Filesystem operation handlers composing the union resolver with the
//! shared lock table.
//!
//! Only `read` and `write` are gated by the per-path lock; `create`,
//! `list_directory`, `getattr`, and `delete` deliberately bypass it and may
//! interleave with a locked read/write on the same path.

use std::{
    fs::{self, File, Metadata, OpenOptions},
    os::unix::fs::{FileExt, OpenOptionsExt},
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tracing::debug;

use crate::{
    fs::union::{Tier, Union},
    lock::LockTable,
    logging::MountOpsSnapshot,
    Error, Result,
};

#[derive(Debug, Default)]
struct OpCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    busy_rejections: AtomicU64,
}

/// The set of operations exposed to the filesystem bridge. Cheap to clone;
/// clones share the union roots, the lock table, and the op counters.
#[derive(Debug, Clone)]
pub struct Ops {
    union: Union,
    locks: LockTable,
    counters: Arc<OpCounters>,
}

impl Ops {
    pub fn new(union: Union, locks: LockTable) -> Self {
        Self {
            union,
            locks,
            counters: Arc::new(OpCounters::default()),
        }
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Metadata of whichever store's entry resolves for reading.
    pub fn getattr(&self, rel: &Path) -> Result<Metadata> {
        let resolved = self.union.resolve_for_read(rel)?;
        Ok(resolved.path.symlink_metadata()?)
    }

    /// Create (or truncate) a file with the given permission mode, seeding an
    /// unlocked lock record for the path. Returns the open handle.
    pub fn create(&self, rel: &Path, mode: u32) -> Result<File> {
        // A pre-existing record for this path is acceptable and left as-is.
        self.locks.ensure(rel)?;

        let resolved = self.union.resolve_for_write(rel);
        if resolved.tier == Tier::Primary {
            if let Some(parent) = resolved.path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&resolved.path)?;
        debug!(path = %rel.display(), tier = ?resolved.tier, "created file");
        Ok(file)
    }

    /// Merged listing of both stores. As a side effect, every plain file
    /// discovered gets a lock record, so pre-existing files are subject to
    /// locking on later reads and writes.
    pub fn list_directory(&self, rel: &Path) -> Result<Vec<String>> {
        let listing = self.union.list_merged(rel)?;
        for name in listing.iter().skip(2) {
            let child = rel.join(name);
            if let Ok(resolved) = self.union.resolve_for_read(&child) {
                if resolved.path.is_file() {
                    self.locks.ensure(&child)?;
                }
            }
        }
        Ok(listing)
    }

    /// Read up to `size` bytes at `offset`, holding the path lock for the
    /// duration of the I/O. Fails busy when another operation holds the lock.
    pub fn read(&self, rel: &Path, size: usize, offset: u64) -> Result<Vec<u8>> {
        if !self.locks.acquire(rel)? {
            self.counters.busy_rejections.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Busy(rel.display().to_string()).into());
        }
        let result = self.read_locked(rel, size, offset);
        // Release unconditionally, including on I/O error.
        self.locks.release(rel)?;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        result
    }

    fn read_locked(&self, rel: &Path, size: usize, offset: u64) -> Result<Vec<u8>> {
        let resolved = self.union.resolve_for_read(rel)?;
        let file = File::open(&resolved.path)?;
        let mut buf = vec![0u8; size];
        let mut read = 0usize;
        while read < size {
            let n = file.read_at(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(buf)
    }

    /// Write `buf` at `offset`, holding the path lock for the duration of the
    /// I/O. Opens without truncation when the target exists, else creates it.
    pub fn write(&self, rel: &Path, buf: &[u8], offset: u64) -> Result<usize> {
        if !self.locks.acquire(rel)? {
            self.counters.busy_rejections.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Busy(rel.display().to_string()).into());
        }
        let result = self.write_locked(rel, buf, offset);
        self.locks.release(rel)?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        result
    }

    fn write_locked(&self, rel: &Path, buf: &[u8], offset: u64) -> Result<usize> {
        let resolved = self.union.resolve_for_write(rel);
        let exists = resolved.path.symlink_metadata().is_ok();
        if !exists {
            if let Some(parent) = resolved.path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(!exists)
            .open(&resolved.path)?;
        file.write_all_at(buf, offset)?;
        Ok(buf.len())
    }

    /// Delete the entry, preferring the primary store, and drop its lock
    /// record unconditionally so a recreation starts unlocked.
    pub fn delete(&self, rel: &Path) -> Result<()> {
        self.locks.forget(rel)?;

        for root in [self.union.primary_root(), self.union.fallback_root()] {
            let candidate = root.join(rel);
            if candidate.symlink_metadata().is_ok() {
                fs::remove_file(&candidate)?;
                debug!(path = %rel.display(), "deleted file");
                return Ok(());
            }
        }
        Err(Error::NotFound(rel.display().to_string()).into())
    }

    /// Point-in-time counters for metric logging.
    pub fn snapshot(&self) -> MountOpsSnapshot {
        MountOpsSnapshot {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            busy_rejections: self.counters.busy_rejections.load(Ordering::Relaxed),
        }
    }
}
