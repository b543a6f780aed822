//! Logging initialization using `tracing` and `tracing-subscriber`.

use tracing::info;
use tracing_subscriber::{fmt, util::SubscriberInitExt, EnvFilter};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

/// Snapshot of per-mount operation counters, emitted when a mount shuts down
/// so contention on the lock table is visible in logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MountOpsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub busy_rejections: u64,
}

/// Initialize global tracing subscriber. Safe to call multiple times;
/// subsequent calls will no-op.
pub fn init_logging(format: LogFormat) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Human => {
            let _ = builder.finish().try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().finish().try_init();
        }
    };

    Ok(())
}

/// Emit structured counters for a mount's lifetime of operations.
pub fn log_mount_ops_metrics(snapshot: MountOpsSnapshot) {
    info!(
        target = "tierfs::ops",
        reads = snapshot.reads,
        writes = snapshot.writes,
        busy_rejections = snapshot.busy_rejections,
        "mount_ops_snapshot"
    );
}
