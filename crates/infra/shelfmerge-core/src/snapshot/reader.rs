use crate::exec::{CommandExecutor, CommandRequest};
use crate::platform::linux::{FINDMNT_BIN, UNION_FS_MARKER};
use crate::snapshot::parser::parse_pairs_output;
use crate::snapshot::types::{MountSnapshot, SnapshotWarning, WARN_SNAPSHOT_COMMAND};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Captures the current mount table via the mount-listing tool.
///
/// `capture` is total: command failure degrades to an empty snapshot with a
/// `MOUNT-SNAP-001` warning, malformed lines degrade to `MOUNT-SNAP-002`
/// warnings. Nothing here returns an error.
pub struct MountSnapshotReader {
    executor: Arc<CommandExecutor>,
    merged_root: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    max_output_chars: usize,
    health_check_enabled: bool,
}

impl MountSnapshotReader {
    pub fn new(
        executor: Arc<CommandExecutor>,
        merged_root: PathBuf,
        timeout: Duration,
        poll_interval: Duration,
        max_output_chars: usize,
        health_check_enabled: bool,
    ) -> Self {
        Self {
            executor,
            merged_root,
            timeout,
            poll_interval,
            max_output_chars,
            health_check_enabled,
        }
    }

    pub async fn capture(&self, cancel: &CancellationToken) -> MountSnapshot {
        let request = CommandRequest {
            program: FINDMNT_BIN.to_string(),
            args: vec![
                "-P".to_string(),
                "-o".to_string(),
                "TARGET,FSTYPE,SOURCE,OPTIONS".to_string(),
            ],
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            max_output_chars: self.max_output_chars,
        };

        let result = match self.executor.execute(&request, cancel).await {
            Ok(result) => result,
            Err(e) => {
                return MountSnapshot {
                    entries: vec![],
                    warnings: vec![SnapshotWarning {
                        code: WARN_SNAPSHOT_COMMAND,
                        message: format!("mount listing could not run: {e}"),
                    }],
                };
            }
        };

        if !result.success() {
            warn!(
                event = "mount.snapshot.command_failed",
                outcome = result.outcome.as_str(),
                stderr = %result.stderr,
                "Mount listing command failed"
            );
            return MountSnapshot {
                entries: vec![],
                warnings: vec![SnapshotWarning {
                    code: WARN_SNAPSHOT_COMMAND,
                    message: format!(
                        "mount listing failed ({}): {}",
                        result.outcome.as_str(),
                        result.stderr.trim()
                    ),
                }],
            };
        }

        let (mut entries, warnings) = parse_pairs_output(&result.stdout);
        for warning in &warnings {
            warn!(
                event = "mount.snapshot.malformed_line",
                code = warning.code,
                "{}",
                warning.message
            );
        }

        if self.health_check_enabled {
            for entry in &mut entries {
                if is_union_mount(&entry.fs_type) && entry.mountpoint.starts_with(&self.merged_root)
                {
                    entry.healthy = Some(probe_mountpoint(&entry.mountpoint).await);
                }
            }
        }

        debug!(
            entries = entries.len(),
            warnings = warnings.len(),
            "Captured mount snapshot"
        );
        MountSnapshot { entries, warnings }
    }
}

fn is_union_mount(fs_type: &str) -> bool {
    fs_type.to_lowercase().contains(UNION_FS_MARKER)
}

/// A dead FUSE mount typically fails stat with ENOTCONN; any metadata error
/// marks the mount unhealthy.
async fn probe_mountpoint(mountpoint: &Path) -> bool {
    tokio::fs::metadata(mountpoint).await.is_ok()
}
