/// Platform constants for union mount operations

pub mod linux {
    /// Filesystem type identifier for mergerfs mounts
    pub const MERGERFS_FSTYPE: &str = "fuse.mergerfs";

    /// Case-insensitive marker that identifies a union filesystem in FSTYPE
    pub const UNION_FS_MARKER: &str = "mergerfs";

    /// FUSE device node required for userspace mounts
    pub const FUSE_DEVICE: &str = "/dev/fuse";

    /// Default mount options for mergerfs merged views
    pub const DEFAULT_MOUNT_OPTIONS: &[&str] = &[
        "category.create=ff",
        "cache.files=off",
        "dropcacheonclose=true",
    ];

    /// fusermount binary names to search for, preferred first
    pub const FUSERMOUNT_BINARIES: &[&str] = &["fusermount3", "fusermount"];

    /// Mount listing tool
    pub const FINDMNT_BIN: &str = "findmnt";

    /// Union filesystem tool
    pub const MERGERFS_BIN: &str = "mergerfs";

    /// Lazy-unmount fallback tool
    pub const UMOUNT_BIN: &str = "umount";

    /// Filesystem event monitor
    pub const INOTIFYWAIT_BIN: &str = "inotifywait";

    /// Cleanup-priority wrapper tools
    pub const IONICE_BIN: &str = "ionice";
    pub const NICE_BIN: &str = "nice";
}

/// Common constants across platforms
pub mod common {
    use std::time::Duration;

    /// Default permissions for mount point directories
    pub const MOUNT_POINT_PERMISSIONS: u32 = 0o755;

    /// Timeout for readiness probing after a mount
    pub const READINESS_TIMEOUT: Duration = Duration::from_secs(5);

    /// Poll interval for readiness probing
    pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

    /// Delay between busy unmount retries
    pub const BUSY_RETRY_DELAY: Duration = Duration::from_millis(500);
}
