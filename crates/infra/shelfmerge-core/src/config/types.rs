use crate::error::{MergeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const SETTINGS_FILE: &str = "settings.yml";
pub const EQUIVALENTS_FILE: &str = "manga_equivalents.yml";
pub const SCENE_TAGS_FILE: &str = "scene_tags.yml";
pub const SOURCE_PRIORITY_FILE: &str = "source_priority.yml";

/// Daemon settings, deserialized from `settings.yml`.
///
/// Every knob has a default so a minimal document only names the four roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root containing one directory per source volume
    pub sources_root: PathBuf,

    /// Optional root whose volumes take precedence over every source
    #[serde(default)]
    pub override_root: Option<PathBuf>,

    /// Root under which one union mount per title is exposed
    pub merged_root: PathBuf,

    /// State directory: lock file and branch-link staging trees
    pub state_root: PathBuf,

    #[serde(default = "default_merge_interval_secs")]
    pub merge_interval_secs: u64,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_command_poll_interval_ms")]
    pub command_poll_interval_ms: u64,

    /// Per-stream cap on captured subprocess output
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,

    /// Fast-fail bound on consecutive failed Mount/Remount actions
    #[serde(default = "default_max_consecutive_mount_failures")]
    pub max_consecutive_mount_failures: u32,

    /// Busy unmount retries before falling back to `umount -l`
    #[serde(default = "default_busy_retry_limit")]
    pub busy_retry_limit: u32,

    /// Extra mergerfs options appended after the built-in defaults
    #[serde(default)]
    pub mergerfs_options: Vec<String>,

    #[serde(default = "default_true")]
    pub mount_read_only: bool,

    /// Unmount unowned union mounts under the merged root on the first pass
    #[serde(default)]
    pub cleanup_on_startup: bool,

    /// Unmount every managed mount during graceful shutdown
    #[serde(default = "default_true")]
    pub cleanup_on_shutdown: bool,

    /// Prefix mount tools with `ionice -c <class> nice -n <value>`
    #[serde(default)]
    pub cleanup_apply_high_priority: bool,

    #[serde(default = "default_ionice_class")]
    pub ionice_class: u8,

    #[serde(default = "default_nice_value")]
    pub nice_value: i8,

    /// Probe managed mounts and remount ones that fail the probe
    #[serde(default)]
    pub health_check_enabled: bool,

    /// Source volume names skipped during planning (case-insensitive)
    #[serde(default)]
    pub excluded_sources: Vec<String>,

    #[serde(default = "default_true")]
    pub watcher_enabled: bool,

    /// Back-off before retrying a failed deep watch session
    #[serde(default = "default_watcher_retry_secs")]
    pub watcher_retry_secs: u64,

    /// Budget for draining outstanding work on graceful stop
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Worker restarts tolerated before the supervisor gives up
    #[serde(default = "default_worker_restart_limit")]
    pub worker_restart_limit: u32,
}

fn default_merge_interval_secs() -> u64 {
    300
}
fn default_command_timeout_secs() -> u64 {
    30
}
fn default_command_poll_interval_ms() -> u64 {
    100
}
fn default_max_output_chars() -> usize {
    64 * 1024
}
fn default_max_consecutive_mount_failures() -> u32 {
    3
}
fn default_busy_retry_limit() -> u32 {
    3
}
fn default_ionice_class() -> u8 {
    3
}
fn default_nice_value() -> i8 {
    10
}
fn default_watcher_retry_secs() -> u64 {
    30
}
fn default_stop_timeout_secs() -> u64 {
    20
}
fn default_worker_restart_limit() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

impl Settings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn command_poll_interval(&self) -> Duration {
        Duration::from_millis(self.command_poll_interval_ms)
    }

    pub fn merge_interval(&self) -> Duration {
        Duration::from_secs(self.merge_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn watcher_retry(&self) -> Duration {
        Duration::from_secs(self.watcher_retry_secs)
    }

    /// Staging root for per-mount branch link trees
    pub fn branch_links_root(&self) -> PathBuf {
        self.state_root.join(".mergerfs-branches")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_root.join("daemon.lock")
    }

    /// Guard invariants the rest of the system assumes.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("sources_root", &self.sources_root),
            ("merged_root", &self.merged_root),
            ("state_root", &self.state_root),
        ] {
            if path.as_os_str().is_empty() {
                return Err(MergeError::ConfigInvalid {
                    message: format!("{name} must not be empty"),
                });
            }
            if !path.is_absolute() {
                return Err(MergeError::ConfigInvalid {
                    message: format!("{name} must be an absolute path: {}", path.display()),
                });
            }
        }
        if self.merged_root == self.sources_root {
            return Err(MergeError::ConfigInvalid {
                message: "merged_root must differ from sources_root".to_string(),
            });
        }
        if self.merge_interval_secs == 0 {
            return Err(MergeError::ConfigInvalid {
                message: "merge_interval_secs must be positive".to_string(),
            });
        }
        if self.command_timeout_secs == 0 {
            return Err(MergeError::ConfigInvalid {
                message: "command_timeout_secs must be positive".to_string(),
            });
        }
        if self.command_poll_interval_ms == 0 {
            return Err(MergeError::ConfigInvalid {
                message: "command_poll_interval_ms must be positive".to_string(),
            });
        }
        if self.max_output_chars == 0 {
            return Err(MergeError::ConfigInvalid {
                message: "max_output_chars must be positive".to_string(),
            });
        }
        if self.max_consecutive_mount_failures == 0 {
            return Err(MergeError::ConfigInvalid {
                message: "max_consecutive_mount_failures must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// `manga_equivalents.yml`: canonical display name -> aliases.
///
/// A BTreeMap keeps construction-order deterministic so conflict diagnostics
/// are stable across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EquivalentsDoc {
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
}

/// `scene_tags.yml`: bracketed tokens stripped during matcher-aware
/// normalization (e.g. `Official`, `Color`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneTagsDoc {
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `source_priority.yml`: ordered source names, index = priority rank.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcePriorityDoc {
    #[serde(default)]
    pub sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn minimal_yaml() -> &'static str {
        "sources_root: /library/sources\nmerged_root: /library/merged\nstate_root: /var/lib/shelfmerge\n"
    }

    #[test]
    fn minimal_settings_fill_defaults() {
        let settings: Settings = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(settings.merge_interval_secs, 300);
        assert_eq!(settings.max_consecutive_mount_failures, 3);
        assert_eq!(settings.busy_retry_limit, 3);
        assert!(settings.mount_read_only);
        assert!(settings.cleanup_on_shutdown);
        assert!(!settings.cleanup_on_startup);
        assert!(settings.override_root.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn branch_links_root_is_under_state_root() {
        let settings: Settings = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(
            settings.branch_links_root(),
            PathBuf::from("/var/lib/shelfmerge/.mergerfs-branches")
        );
        assert_eq!(
            settings.lock_path(),
            PathBuf::from("/var/lib/shelfmerge/daemon.lock")
        );
    }

    #[test]
    fn validate_rejects_relative_roots() {
        let mut settings: Settings = serde_yaml::from_str(minimal_yaml()).unwrap();
        settings.merged_root = PathBuf::from("relative/merged");
        let err = settings.validate().unwrap_err();
        assert!(format!("{err}").contains("merged_root"));
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let mut settings: Settings = serde_yaml::from_str(minimal_yaml()).unwrap();
        settings.command_poll_interval_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn equivalents_doc_parses_groups() {
        let doc: EquivalentsDoc = serde_yaml::from_str(
            "groups:\n  Manga Alpha:\n    - The Manga Alpha\n    - Manga-Alpha\n",
        )
        .unwrap();
        assert_eq!(doc.groups.len(), 1);
        assert_eq!(doc.groups["Manga Alpha"].len(), 2);
    }
}
