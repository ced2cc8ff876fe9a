use crate::utils::paths::mountpoint_key;
use std::path::{Path, PathBuf};

/// Emitted when the mount-listing command itself failed.
pub const WARN_SNAPSHOT_COMMAND: &str = "MOUNT-SNAP-001";
/// Emitted per unparsable output line.
pub const WARN_SNAPSHOT_LINE: &str = "MOUNT-SNAP-002";

/// One observed mount, as reported by the listing tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSnapshotEntry {
    /// Normalized absolute mountpoint
    pub mountpoint: PathBuf,
    pub fs_type: String,
    pub source: String,
    pub options: String,
    /// Set only when health probing ran for this entry
    pub healthy: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotWarning {
    pub code: &'static str,
    pub message: String,
}

/// Point-in-time view of the mount table.
///
/// Entries are deduplicated by mountpoint and sorted by mountpoint so
/// snapshot diffs are stable.
#[derive(Debug, Clone, Default)]
pub struct MountSnapshot {
    pub entries: Vec<MountSnapshotEntry>,
    pub warnings: Vec<SnapshotWarning>,
}

impl MountSnapshot {
    pub fn entry_at(&self, mountpoint: &Path) -> Option<&MountSnapshotEntry> {
        let key = mountpoint_key(mountpoint);
        self.entries
            .iter()
            .find(|e| mountpoint_key(&e.mountpoint) == key)
    }

    pub fn contains(&self, mountpoint: &Path) -> bool {
        self.entry_at(mountpoint).is_some()
    }
}
