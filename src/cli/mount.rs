//! Implementation of `tierfs mount` subcommand.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::mpsc,
    time::Duration,
};

use clap::Args;
use tracing::{info, instrument};

use crate::{
    fs::{
        fuse,
        ops::Ops,
        union::{Union, LOCK_DB_FILE},
        MountSession, MountTarget,
    },
    lock::LockTable,
    logging, Error, Result,
};

#[derive(Debug, Clone, Args)]
pub struct MountArgs {
    /// Path to the mount target directory
    #[arg(long = "mnt-path")]
    pub mnt_path: Option<PathBuf>,

    /// Path to the primary store root
    #[arg(short = 'p', long = "primary")]
    pub primary: Option<PathBuf>,

    /// Path to the fallback store root
    #[arg(short = 'f', long = "fallback")]
    pub fallback: Option<PathBuf>,

    /// Path to the lock database (defaults to a dot-file under the primary root)
    #[arg(long = "lock-db")]
    pub lock_db: Option<PathBuf>,
}

#[derive(Debug)]
pub struct MountContext {
    pub union: Union,
    pub ops: Ops,
    pub session: MountSession,
    pub fuse_handle: Option<fuse::MountHandle>,
}

pub fn execute(args: MountArgs) -> Result<()> {
    // Execute the mount and hold it until a termination signal is received.
    let mut ctx = mount(args)?;

    if let Some(handle) = ctx.fuse_handle.take() {
        info!("tierfs mount active; press Ctrl+C to unmount");

        #[derive(Debug)]
        enum Event {
            Signal,
            Unmounted,
        }

        let (tx, rx) = mpsc::channel();

        // Handle SIGINT/SIGTERM.
        ctrlc::set_handler({
            let tx = tx.clone();
            move || {
                let _ = tx.send(Event::Signal);
            }
        })
        .map_err(|e| Error::Cli(format!("failed to install signal handler: {e}")))?;

        // Watch for external unmounts.
        let mount_path = ctx.session.mountpoint.clone();
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_millis(500));
            if !is_mounted(&mount_path) {
                let _ = tx.send(Event::Unmounted);
                break;
            }
        });

        // Wait for either event.
        match rx.recv() {
            Ok(Event::Signal) => {
                info!("signal received; unmounting {}", ctx.session.mountpoint.display());
                handle.unmount();
            }
            Ok(Event::Unmounted) => {
                info!(
                    "detected external unmount; exiting for {}",
                    ctx.session.mountpoint.display()
                );
                // Join the session to ensure the background thread is cleaned up.
                handle.unmount();
            }
            Err(_) => {
                handle.unmount();
            }
        }

        ctx.session.mark_unmounted();
        logging::log_mount_ops_metrics(ctx.ops.snapshot());
    }

    Ok(())
}

/// Check if a path is currently mounted (Linux-only, /proc/mounts).
fn is_mounted(path: &Path) -> bool {
    if let Ok(contents) = fs::read_to_string("/proc/mounts") {
        let target = path.to_string_lossy();
        return contents
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|p| p == target);
    }
    false
}

/// Perform mount orchestration used by both the CLI and tests.
#[instrument(skip(args), fields(mnt = ?args.mnt_path, primary = ?args.primary, fallback = ?args.fallback))]
pub fn mount(args: MountArgs) -> Result<MountContext> {
    let mnt_path = args
        .mnt_path
        .ok_or_else(|| Error::Cli("mnt_path is required".into()))?;
    let primary = args
        .primary
        .ok_or_else(|| Error::Cli("primary is required".into()))?;
    let fallback = args
        .fallback
        .ok_or_else(|| Error::Cli("fallback is required".into()))?;

    let target = MountTarget::new(&mnt_path);
    target.validate()?;
    info!("validated target directory");

    let union = Union::new(&primary, &fallback)?;
    info!(
        primary = %union.primary_root().display(),
        fallback = %union.fallback_root().display(),
        "store roots validated"
    );

    let lock_db_path = args
        .lock_db
        .unwrap_or_else(|| primary.join(LOCK_DB_FILE));
    let locks = LockTable::open(&lock_db_path)?;
    info!(lock_db = %lock_db_path.display(), "lock table opened");

    let ops = Ops::new(union.clone(), locks);

    let mut session = MountSession::new(&mnt_path);

    // Start FUSE session; if it fails, surface the error.
    let fuse_handle = Some(fuse::spawn_union(ops.clone(), &mnt_path)?);

    session.mark_ready();
    info!(mount_id = %session.mount_id, "mount ready");

    Ok(MountContext {
        union,
        ops,
        session,
        fuse_handle,
    })
}
