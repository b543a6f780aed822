//! SQLite persistence for per-path lock records.
//!
//! One row per logical path, keyed by the path digest. The `locked` column is
//! the sole source of truth for whether a read or write may proceed; all
//! mutation goes through `acquire`/`release`/`forget`/`ensure`.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::{lock::digest, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS locks (
    identifier TEXT PRIMARY KEY,
    logical_path TEXT NOT NULL,
    locked INTEGER NOT NULL DEFAULT 0
);
"#;

/// A persisted lock record, as stored in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub identifier: String,
    pub logical_path: String,
    pub locked: bool,
}

/// Handle to the shared lock table. Cloning is cheap; all clones observe the
/// same underlying connection, and every statement runs under its mutex.
#[derive(Debug, Clone)]
pub struct LockTable {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl LockTable {
    /// Open or create the lock database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref()).map_err(crate::Error::Lock)?;
        conn.execute_batch(SCHEMA).map_err(crate::Error::Lock)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Create an in-memory table (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(crate::Error::Lock)?;
        conn.execute_batch(SCHEMA).map_err(crate::Error::Lock)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Try to take the lock for `path`. Returns `false` when another in-flight
    /// operation already holds it; callers surface that as busy, never retry
    /// internally.
    ///
    /// The check and the set are a single upsert statement, so two concurrent
    /// acquires on the same identifier can never both succeed.
    pub fn acquire(&self, path: &Path) -> Result<bool> {
        let id = digest(path);
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "INSERT INTO locks (identifier, logical_path, locked) VALUES (?1, ?2, 1)
                 ON CONFLICT(identifier) DO UPDATE SET locked = 1 WHERE locked = 0",
                params![id, path.to_string_lossy()],
            )
            .map_err(crate::Error::Lock)?;
        let acquired = changed == 1;
        if !acquired {
            debug!(path = %path.display(), "lock contended");
        }
        Ok(acquired)
    }

    /// Release the lock for `path`. No-op when no record exists.
    pub fn release(&self, path: &Path) -> Result<()> {
        let id = digest(path);
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE locks SET locked = 0 WHERE identifier = ?1",
            params![id],
        )
        .map_err(crate::Error::Lock)?;
        Ok(())
    }

    /// Remove the record entirely, so a later recreation of the same logical
    /// path starts unlocked. Called on file deletion.
    pub fn forget(&self, path: &Path) -> Result<()> {
        let id = digest(path);
        let conn = self.conn.lock();
        conn.execute("DELETE FROM locks WHERE identifier = ?1", params![id])
            .map_err(crate::Error::Lock)?;
        Ok(())
    }

    /// Idempotently insert an unlocked record for `path`. A pre-existing
    /// record (locked or not) is left as-is.
    pub fn ensure(&self, path: &Path) -> Result<()> {
        let id = digest(path);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO locks (identifier, logical_path, locked) VALUES (?1, ?2, 0)",
            params![id, path.to_string_lossy()],
        )
        .map_err(crate::Error::Lock)?;
        Ok(())
    }

    /// Current lock state for `path`; `None` when no record exists.
    pub fn is_locked(&self, path: &Path) -> Result<Option<bool>> {
        let id = digest(path);
        let conn = self.conn.lock();
        let locked = conn
            .query_row(
                "SELECT locked FROM locks WHERE identifier = ?1",
                params![id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(crate::Error::Lock)?;
        Ok(locked.map(|v| v != 0))
    }

    /// Fetch the full record for `path`, if any.
    pub fn get(&self, path: &Path) -> Result<Option<LockRecord>> {
        let id = digest(path);
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT identifier, logical_path, locked FROM locks WHERE identifier = ?1",
                params![id],
                |row| {
                    Ok(LockRecord {
                        identifier: row.get(0)?,
                        logical_path: row.get(1)?,
                        locked: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()
            .map_err(crate::Error::Lock)?;
        Ok(record)
    }

    /// Number of records currently in the table.
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM locks", [], |row| row.get(0))
            .map_err(crate::Error::Lock)?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
