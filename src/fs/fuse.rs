//! FUSE adapter that projects the union of the primary and fallback stores
//! and routes read/write through the per-path lock table.

use std::{
    collections::HashMap,
    ffi::OsStr,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use fuser::{
    BackgroundSession, FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use libc::{EBUSY, EIO, ENOENT};

use crate::{fs::ops::Ops, logging, Error, Result};

const TTL: Duration = Duration::from_secs(1);

pub struct UnionFs {
    ops: Ops,
    paths: Mutex<HashMap<u64, PathBuf>>,  // ino -> rel path
    inodes: Mutex<HashMap<PathBuf, u64>>, // rel path -> ino
    next_ino: Mutex<u64>,
}

impl UnionFs {
    pub fn new(ops: Ops) -> Self {
        let mut paths = HashMap::new();
        let mut inodes = HashMap::new();
        paths.insert(1, PathBuf::from(""));
        inodes.insert(PathBuf::from(""), 1);
        Self {
            ops,
            paths: Mutex::new(paths),
            inodes: Mutex::new(inodes),
            next_ino: Mutex::new(2),
        }
    }

    fn rel_for(&self, ino: u64) -> Option<PathBuf> {
        self.paths.lock().unwrap().get(&ino).cloned()
    }

    fn get_or_insert_ino(&self, rel: &Path) -> u64 {
        if let Some(id) = self.inodes.lock().unwrap().get(rel).copied() {
            return id;
        }
        let mut next = self.next_ino.lock().unwrap();
        let ino = *next;
        *next += 1;
        self.paths.lock().unwrap().insert(ino, rel.to_path_buf());
        self.inodes.lock().unwrap().insert(rel.to_path_buf(), ino);
        ino
    }

    fn child_rel(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        let parent_path = self.rel_for(parent)?;
        Some(if parent_path.as_os_str().is_empty() {
            PathBuf::from(name)
        } else {
            parent_path.join(name)
        })
    }

    fn stat_path(&self, rel: &Path) -> Option<FileAttr> {
        let meta = self.ops.getattr(rel).ok()?;

        let kind = if meta.is_dir() {
            FileType::Directory
        } else if meta.is_file() {
            FileType::RegularFile
        } else {
            FileType::Symlink
        };

        Some(FileAttr {
            ino: self.get_or_insert_ino(rel),
            size: meta.len(),
            blocks: meta.blocks(),
            atime: meta
                .accessed()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            mtime: meta
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            ctime: meta.created().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            crtime: meta.created().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            kind,
            perm: meta.mode() as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: 0,
            blksize: meta.blksize() as u32,
            flags: 0,
        })
    }
}

fn io_errno(err: &std::io::Error) -> i32 {
    err.raw_os_error().unwrap_or(EIO)
}

/// Translate a handler error into the boundary's native error code.
fn errno_for(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<Error>() {
        return match e {
            Error::NotFound(_) => ENOENT,
            Error::Busy(_) => EBUSY,
            Error::Io(io) => io_errno(io),
            _ => EIO,
        };
    }
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        return io_errno(io);
    }
    EIO
}

impl Filesystem for UnionFs {
    fn destroy(&mut self) {
        logging::log_mount_ops_metrics(self.ops.snapshot());
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let rel = match self.child_rel(parent, name) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.stat_path(&rel) {
            Some(attr) => reply.entry(&TTL, &attr, 0),
            None => reply.error(ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.rel_for(ino).and_then(|p| self.stat_path(&p)) {
            Some(attr) => reply.attr(&TTL, &attr),
            None => reply.error(ENOENT),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        if self.rel_for(ino).is_none() {
            reply.error(ENOENT);
            return;
        }
        reply.opened(ino, 0);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let rel = match self.child_rel(parent, name) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.ops.create(&rel, mode) {
            Ok(_file) => match self.stat_path(&rel) {
                Some(attr) => reply.created(&TTL, &attr, 0, attr.ino, 0),
                None => reply.error(EIO),
            },
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let rel = match self.rel_for(ino) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        if fh != ino {
            reply.error(EIO);
            return;
        }

        match self.ops.read(&rel, size as usize, offset.max(0) as u64) {
            Ok(bytes) => reply.data(&bytes),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let rel = match self.rel_for(ino) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        if fh != ino {
            reply.error(EIO);
            return;
        }

        match self.ops.write(&rel, data, offset.max(0) as u64) {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if offset != 0 {
            reply.ok();
            return;
        }
        let rel = match self.rel_for(ino) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let names = match self.ops.list_directory(&rel) {
            Ok(names) => names,
            Err(err) => {
                reply.error(errno_for(&err));
                return;
            }
        };

        let parent_ino = if rel.as_os_str().is_empty() {
            ino
        } else {
            let parent = rel.parent().unwrap_or(Path::new(""));
            self.get_or_insert_ino(parent)
        };

        let mut entries = Vec::new();
        for name in names {
            match name.as_str() {
                "." => entries.push((ino, FileType::Directory, name)),
                ".." => entries.push((parent_ino, FileType::Directory, name)),
                _ => {
                    let child_rel = if rel.as_os_str().is_empty() {
                        PathBuf::from(&name)
                    } else {
                        rel.join(&name)
                    };
                    if let Some(attr) = self.stat_path(&child_rel) {
                        entries.push((attr.ino, attr.kind, name));
                    }
                }
            }
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate() {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let rel = match self.child_rel(parent, name) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        match self.ops.delete(&rel) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno_for(&err)),
        }
    }
}

/// Handle to a running mount; dropping it will not unmount automatically, so
/// callers should invoke `unmount` explicitly to clean up.
pub struct MountHandle {
    mountpoint: String,
    session: BackgroundSession,
}

impl std::fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountHandle")
            .field("mountpoint", &self.mountpoint)
            .finish()
    }
}

impl MountHandle {
    pub fn unmount(self) {
        self.session.join();
    }
}

/// Spawn a background FUSE mount for the given operation handlers.
pub fn spawn_union<P: AsRef<Path>>(ops: Ops, mountpoint: P) -> Result<MountHandle> {
    let mountpoint = mountpoint.as_ref().to_string_lossy().to_string();
    let fs = UnionFs::new(ops.clone());
    let options = vec![MountOption::FSName("tierfs".into())];
    match fuser::spawn_mount2(fs, &mountpoint, &options) {
        Ok(session) => Ok(MountHandle {
            mountpoint,
            session,
        }),
        Err(e) => {
            // Fallback to legacy spawn_mount for environments where spawn_mount2
            // isn't supported (older fusermount/fuse). Keep the error if the
            // fallback also fails.
            if let Some(code) = e.raw_os_error() {
                if code != libc::ENOSYS && code != libc::EPERM && code != libc::EACCES {
                    return Err(e.into());
                }
            }

            let fs_fallback = UnionFs::new(ops);
            let opt = std::ffi::OsString::from("fsname=tierfs");
            let args: [&std::ffi::OsStr; 2] = [std::ffi::OsStr::new("-o"), opt.as_os_str()];
            #[allow(deprecated)]
            let session = fuser::spawn_mount(fs_fallback, &mountpoint, &args)?;
            Ok(MountHandle {
                mountpoint,
                session,
            })
        }
    }
}
