//! Two-tier path resolution over a primary and a fallback store.
//!
//! Reads prefer the primary store and transparently fail over to the
//! fallback. Writes target whichever store already holds the file (primary
//! wins on conflict) and default to the primary for new files, so a file
//! keeps living in the store that created it until deleted. Listings union
//! both directories by entry name.

use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{Error, Result};

/// Name of the lock database kept under the primary root. Hidden from
/// listings together with its SQLite sidecar files.
pub const LOCK_DB_FILE: &str = ".tierfs-locks.db";

/// Which store root produced a resolved path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Fallback,
}

/// Absolute location of a logical path in one of the two stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub tier: Tier,
}

#[derive(Debug)]
struct UnionInner {
    primary: PathBuf,
    fallback: PathBuf,
}

/// The union view over the two configured store roots. Roots are validated
/// once at construction and never change for the lifetime of the mount.
#[derive(Debug, Clone)]
pub struct Union {
    inner: Arc<UnionInner>,
}

impl Union {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(primary: P, fallback: Q) -> Result<Self> {
        let primary = primary.as_ref().to_path_buf();
        let fallback = fallback.as_ref().to_path_buf();
        for root in [&primary, &fallback] {
            if !root.is_dir() {
                return Err(Error::InvalidStoreDir(root.display().to_string()).into());
            }
        }
        Ok(Self {
            inner: Arc::new(UnionInner { primary, fallback }),
        })
    }

    pub fn primary_root(&self) -> &Path {
        &self.inner.primary
    }

    pub fn fallback_root(&self) -> &Path {
        &self.inner.fallback
    }

    fn at(&self, tier: Tier, rel: &Path) -> PathBuf {
        match tier {
            Tier::Primary => self.inner.primary.join(rel),
            Tier::Fallback => self.inner.fallback.join(rel),
        }
    }

    /// Locate `rel` for reading: primary first, then fallback.
    pub fn resolve_for_read(&self, rel: &Path) -> Result<Resolved> {
        for tier in [Tier::Primary, Tier::Fallback] {
            let path = self.at(tier, rel);
            if path.symlink_metadata().is_ok() {
                return Ok(Resolved { path, tier });
            }
        }
        Err(Error::NotFound(rel.display().to_string()).into())
    }

    /// Locate `rel` for writing: the store already holding the entry wins
    /// (primary on conflict); a new file defaults to the primary store.
    pub fn resolve_for_write(&self, rel: &Path) -> Resolved {
        for tier in [Tier::Primary, Tier::Fallback] {
            let path = self.at(tier, rel);
            if path.symlink_metadata().is_ok() {
                return Resolved { path, tier };
            }
        }
        Resolved {
            path: self.at(Tier::Primary, rel),
            tier: Tier::Primary,
        }
    }

    /// Merged directory listing: `.` and `..` first, then the deduplicated
    /// union of both stores' entry names in sorted order. Tolerates either
    /// root lacking the subpath; fails `NotFound` only when both do.
    pub fn list_merged(&self, rel: &Path) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        let mut found_any = false;

        for tier in [Tier::Primary, Tier::Fallback] {
            match fs::read_dir(self.at(tier, rel)) {
                Ok(entries) => {
                    found_any = true;
                    for entry in entries {
                        let entry = entry?;
                        let name = entry.file_name().to_string_lossy().to_string();
                        if name.starts_with(LOCK_DB_FILE) {
                            continue;
                        }
                        names.insert(name);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        if !found_any {
            return Err(Error::NotFound(rel.display().to_string()).into());
        }

        let mut listing = vec![".".to_string(), "..".to_string()];
        listing.extend(names);
        Ok(listing)
    }
}
