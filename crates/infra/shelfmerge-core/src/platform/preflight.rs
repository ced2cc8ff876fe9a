use crate::error::{MergeError, Result};
use crate::platform::linux::{FUSE_DEVICE, FUSERMOUNT_BINARIES, MERGERFS_BIN};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Verify the environment can run union mounts at all.
///
/// Called once before the daemon or a one-shot pass starts. Failures here are
/// terminal (exit code 70): nothing downstream can succeed without mergerfs
/// on PATH and a reachable FUSE device.
pub fn check_environment() -> Result<()> {
    let mergerfs = which::which(MERGERFS_BIN).map_err(|_| MergeError::ToolNotFound {
        tool: MERGERFS_BIN.to_string(),
    })?;
    debug!("Found mergerfs at: {}", mergerfs.display());

    if !Path::new(FUSE_DEVICE).exists() {
        return Err(MergeError::EnvPrecondition {
            message: format!("{FUSE_DEVICE} not found. Is the FUSE kernel module loaded?"),
        });
    }

    info!(event = "supervisor.preflight_ok", "Environment preflight passed");
    Ok(())
}

/// Locate fusermount, preferring fusermount3.
///
/// Optional: unmounting falls back to `umount -l` when neither is present.
pub fn find_fusermount() -> Option<PathBuf> {
    FUSERMOUNT_BINARIES
        .iter()
        .find_map(|binary| which::which(binary).ok())
}
