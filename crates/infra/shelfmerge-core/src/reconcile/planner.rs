use crate::plan::MountPlan;
use crate::platform::linux::UNION_FS_MARKER;
use crate::reconcile::actions::{ActionKind, ActionReason, ReconciliationAction};
use crate::snapshot::MountSnapshot;
use crate::utils::paths::{mountpoint_key, path_depth};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::debug;

/// Diffs the desired plan against the captured mount table.
pub struct ReconciliationPlanner {
    merged_root: PathBuf,
}

/// Per-pass inputs that change how the diff is interpreted.
pub struct ReconcileContext<'a> {
    /// Remount every existing desired mount regardless of fingerprints
    pub force: bool,
    /// Unmount unowned union mounts under the merged root (startup or
    /// shutdown cleanup)
    pub cleanup_foreign: bool,
    /// Mountpoint key -> branch link dir retained from previous passes
    pub last_desired: &'a HashMap<String, PathBuf>,
}

impl ReconciliationPlanner {
    pub fn new(merged_root: PathBuf) -> Self {
        Self { merged_root }
    }

    /// Produce the ordered action list: unmounts (deepest first), then
    /// remounts, then mounts, then no-ops, each tier sorted by mountpoint.
    /// The ordering avoids parent-before-child races and keeps diffs
    /// auditable.
    pub fn plan(
        &self,
        desired: &[MountPlan],
        snapshot: &MountSnapshot,
        ctx: &ReconcileContext<'_>,
    ) -> Vec<ReconciliationAction> {
        let desired_keys: HashSet<String> = desired
            .iter()
            .map(|plan| mountpoint_key(&plan.mountpoint))
            .collect();

        let mut unmounts: Vec<ReconciliationAction> = Vec::new();
        let mut remounts: Vec<ReconciliationAction> = Vec::new();
        let mut mounts: Vec<ReconciliationAction> = Vec::new();
        let mut noops: Vec<ReconciliationAction> = Vec::new();

        // Observed union mounts under our root that nothing desires anymore.
        for entry in &snapshot.entries {
            let key = mountpoint_key(&entry.mountpoint);
            if desired_keys.contains(&key) {
                continue;
            }
            if !entry.mountpoint.starts_with(&self.merged_root)
                || !is_union_fs(&entry.fs_type)
            {
                continue;
            }
            if ctx.last_desired.contains_key(&key) {
                unmounts.push(ReconciliationAction {
                    kind: ActionKind::Unmount,
                    reason: ActionReason::Orphaned,
                    mountpoint: entry.mountpoint.clone(),
                    plan: None,
                });
            } else if ctx.cleanup_foreign {
                unmounts.push(ReconciliationAction {
                    kind: ActionKind::Unmount,
                    reason: ActionReason::Foreign,
                    mountpoint: entry.mountpoint.clone(),
                    plan: None,
                });
            }
        }

        for plan in desired {
            let action = match snapshot.entry_at(&plan.mountpoint) {
                None => ReconciliationAction {
                    kind: ActionKind::Mount,
                    reason: ActionReason::Missing,
                    mountpoint: plan.mountpoint.clone(),
                    plan: Some(plan.clone()),
                },
                Some(entry) => {
                    let reason = if ctx.force {
                        Some(ActionReason::Desired)
                    } else if entry.healthy == Some(false) {
                        Some(ActionReason::HealthCheckFailed)
                    } else if entry.source == plan.fingerprint {
                        None
                    } else if is_fingerprint_shaped(&entry.source) {
                        Some(ActionReason::FingerprintChanged)
                    } else {
                        // Mounted at our path without our fsname encoding:
                        // the branch order it serves is unknown.
                        Some(ActionReason::BranchOrderChanged)
                    };
                    match reason {
                        Some(reason) => ReconciliationAction {
                            kind: ActionKind::Remount,
                            reason,
                            mountpoint: plan.mountpoint.clone(),
                            plan: Some(plan.clone()),
                        },
                        None => ReconciliationAction {
                            kind: ActionKind::NoOp,
                            reason: ActionReason::Unchanged,
                            mountpoint: plan.mountpoint.clone(),
                            plan: Some(plan.clone()),
                        },
                    }
                }
            };
            match action.kind {
                ActionKind::Remount => remounts.push(action),
                ActionKind::Mount => mounts.push(action),
                _ => noops.push(action),
            }
        }

        unmounts.sort_by(|a, b| {
            path_depth(&b.mountpoint)
                .cmp(&path_depth(&a.mountpoint))
                .then_with(|| a.mountpoint.cmp(&b.mountpoint))
        });
        remounts.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));
        mounts.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));
        noops.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));

        let mut actions = unmounts;
        actions.extend(remounts);
        actions.extend(mounts);
        actions.extend(noops);
        debug!(actions = actions.len(), "Reconciliation planned");
        actions
    }
}

fn is_union_fs(fs_type: &str) -> bool {
    fs_type.to_lowercase().contains(UNION_FS_MARKER)
}

/// Our fingerprints are exactly 16 lowercase hex chars.
fn is_fingerprint_shaped(source: &str) -> bool {
    source.len() == 16
        && source
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{BranchEntry, fingerprint_branches};
    use crate::snapshot::MountSnapshotEntry;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn plan_at(mountpoint: &str, branches: &[&str]) -> MountPlan {
        let entries: Vec<BranchEntry> = branches
            .iter()
            .enumerate()
            .map(|(i, p)| BranchEntry {
                path: PathBuf::from(p),
                source_name: format!("disk{i}"),
                priority: i,
                from_override: false,
            })
            .collect();
        let paths: Vec<PathBuf> = entries.iter().map(|b| b.path.clone()).collect();
        MountPlan {
            canonical_name: Path::new(mountpoint)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mountpoint: PathBuf::from(mountpoint),
            fingerprint: fingerprint_branches(&paths),
            branches: entries,
        }
    }

    fn snapshot_entry(mountpoint: &str, source: &str) -> MountSnapshotEntry {
        MountSnapshotEntry {
            mountpoint: PathBuf::from(mountpoint),
            fs_type: "fuse.mergerfs".to_string(),
            source: source.to_string(),
            options: "ro".to_string(),
            healthy: None,
        }
    }

    fn planner() -> ReconciliationPlanner {
        ReconciliationPlanner::new(PathBuf::from("/merged"))
    }

    fn ctx<'a>(last_desired: &'a HashMap<String, PathBuf>) -> ReconcileContext<'a> {
        ReconcileContext {
            force: false,
            cleanup_foreign: false,
            last_desired,
        }
    }

    #[test]
    fn missing_desired_mount_becomes_mount_action() {
        let last = HashMap::new();
        let plans = vec![plan_at("/merged/Alpha", &["/s/diskA/Alpha"])];
        let actions = planner().plan(&plans, &MountSnapshot::default(), &ctx(&last));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Mount);
        assert_eq!(actions[0].reason, ActionReason::Missing);
    }

    #[test]
    fn matching_fingerprint_is_a_noop() {
        let last = HashMap::new();
        let plans = vec![plan_at("/merged/Alpha", &["/s/diskA/Alpha"])];
        let snapshot = MountSnapshot {
            entries: vec![snapshot_entry("/merged/Alpha", &plans[0].fingerprint)],
            warnings: vec![],
        };
        let actions = planner().plan(&plans, &snapshot, &ctx(&last));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::NoOp);
        assert_eq!(actions[0].reason, ActionReason::Unchanged);
    }

    #[test]
    fn changed_fingerprint_becomes_remount() {
        let last = HashMap::new();
        let plans = vec![plan_at("/merged/Alpha", &["/s/diskA/Alpha"])];
        let snapshot = MountSnapshot {
            entries: vec![snapshot_entry("/merged/Alpha", "0123456789abcdef")],
            warnings: vec![],
        };
        let actions = planner().plan(&plans, &snapshot, &ctx(&last));
        assert_eq!(actions[0].kind, ActionKind::Remount);
        assert_eq!(actions[0].reason, ActionReason::FingerprintChanged);
    }

    #[test]
    fn non_fingerprint_source_at_desired_path_is_branch_order_changed() {
        let last = HashMap::new();
        let plans = vec![plan_at("/merged/Alpha", &["/s/diskA/Alpha"])];
        let snapshot = MountSnapshot {
            entries: vec![snapshot_entry("/merged/Alpha", "/s/a:/s/b")],
            warnings: vec![],
        };
        let actions = planner().plan(&plans, &snapshot, &ctx(&last));
        assert_eq!(actions[0].kind, ActionKind::Remount);
        assert_eq!(actions[0].reason, ActionReason::BranchOrderChanged);
    }

    #[test]
    fn force_converts_existing_mounts_to_desired_remounts() {
        let last = HashMap::new();
        let plans = vec![plan_at("/merged/Alpha", &["/s/diskA/Alpha"])];
        let snapshot = MountSnapshot {
            entries: vec![snapshot_entry("/merged/Alpha", &plans[0].fingerprint)],
            warnings: vec![],
        };
        let context = ReconcileContext {
            force: true,
            cleanup_foreign: false,
            last_desired: &last,
        };
        let actions = planner().plan(&plans, &snapshot, &context);
        assert_eq!(actions[0].kind, ActionKind::Remount);
        assert_eq!(actions[0].reason, ActionReason::Desired);
    }

    #[test]
    fn force_still_mounts_missing_mounts() {
        let last = HashMap::new();
        let plans = vec![plan_at("/merged/Alpha", &["/s/diskA/Alpha"])];
        let context = ReconcileContext {
            force: true,
            cleanup_foreign: false,
            last_desired: &last,
        };
        let actions = planner().plan(&plans, &MountSnapshot::default(), &context);
        assert_eq!(actions[0].kind, ActionKind::Mount);
        assert_eq!(actions[0].reason, ActionReason::Missing);
    }

    #[test]
    fn unhealthy_mount_is_remounted() {
        let last = HashMap::new();
        let plans = vec![plan_at("/merged/Alpha", &["/s/diskA/Alpha"])];
        let mut entry = snapshot_entry("/merged/Alpha", &plans[0].fingerprint);
        entry.healthy = Some(false);
        let snapshot = MountSnapshot {
            entries: vec![entry],
            warnings: vec![],
        };
        let actions = planner().plan(&plans, &snapshot, &ctx(&last));
        assert_eq!(actions[0].kind, ActionKind::Remount);
        assert_eq!(actions[0].reason, ActionReason::HealthCheckFailed);
    }

    #[test]
    fn previously_owned_mount_is_orphan_unmounted() {
        let mut last = HashMap::new();
        last.insert(
            mountpoint_key(Path::new("/merged/Gone")),
            PathBuf::from("/state/.mergerfs-branches/feedfacefeedface"),
        );
        let snapshot = MountSnapshot {
            entries: vec![snapshot_entry("/merged/Gone", "feedfacefeedface")],
            warnings: vec![],
        };
        let actions = planner().plan(&[], &snapshot, &ctx(&last));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Unmount);
        assert_eq!(actions[0].reason, ActionReason::Orphaned);
    }

    #[test]
    fn foreign_mount_is_unmounted_only_during_cleanup() {
        let last = HashMap::new();
        let snapshot = MountSnapshot {
            entries: vec![snapshot_entry("/merged/Ghost", "someone-else")],
            warnings: vec![],
        };

        let passive = planner().plan(&[], &snapshot, &ctx(&last));
        assert!(passive.is_empty());

        let context = ReconcileContext {
            force: false,
            cleanup_foreign: true,
            last_desired: &last,
        };
        let cleaning = planner().plan(&[], &snapshot, &context);
        assert_eq!(cleaning.len(), 1);
        assert_eq!(cleaning[0].kind, ActionKind::Unmount);
        assert_eq!(cleaning[0].reason, ActionReason::Foreign);
    }

    #[test]
    fn mounts_outside_merged_root_are_ignored() {
        let last = HashMap::new();
        let snapshot = MountSnapshot {
            entries: vec![snapshot_entry("/elsewhere/Ghost", "x")],
            warnings: vec![],
        };
        let context = ReconcileContext {
            force: false,
            cleanup_foreign: true,
            last_desired: &last,
        };
        assert!(planner().plan(&[], &snapshot, &context).is_empty());
    }

    #[test]
    fn non_union_mounts_under_root_are_ignored() {
        let last = HashMap::new();
        let mut entry = snapshot_entry("/merged/bindmount", "/dev/sda1");
        entry.fs_type = "ext4".to_string();
        let snapshot = MountSnapshot {
            entries: vec![entry],
            warnings: vec![],
        };
        let context = ReconcileContext {
            force: false,
            cleanup_foreign: true,
            last_desired: &last,
        };
        assert!(planner().plan(&[], &snapshot, &context).is_empty());
    }

    #[test]
    fn unmounts_run_first_deepest_first_then_remounts_then_mounts() {
        let mut last = HashMap::new();
        for path in ["/merged/Old", "/merged/Old Deep/Nested"] {
            last.insert(mountpoint_key(Path::new(path)), PathBuf::from("/state/x"));
        }
        let plans = vec![
            plan_at("/merged/Beta", &["/s/diskA/Beta"]),
            plan_at("/merged/Alpha", &["/s/diskA/Alpha"]),
        ];
        let snapshot = MountSnapshot {
            entries: vec![
                snapshot_entry("/merged/Old", "feedfacefeedface"),
                snapshot_entry("/merged/Old Deep/Nested", "feedfacefeedface"),
                snapshot_entry("/merged/Beta", "0123456789abcdef"),
            ],
            warnings: vec![],
        };
        let actions = planner().plan(&plans, &snapshot, &ctx(&last));

        let described: Vec<(&str, String)> = actions
            .iter()
            .map(|a| (a.kind.as_str(), a.mountpoint.display().to_string()))
            .collect();
        assert_eq!(
            described,
            vec![
                ("Unmount", "/merged/Old Deep/Nested".to_string()),
                ("Unmount", "/merged/Old".to_string()),
                ("Remount", "/merged/Beta".to_string()),
                ("Mount", "/merged/Alpha".to_string()),
            ]
        );
    }

    #[test]
    fn replanning_an_unchanged_world_is_all_noops() {
        let last = HashMap::new();
        let plans = vec![
            plan_at("/merged/Alpha", &["/s/diskA/Alpha"]),
            plan_at("/merged/Beta", &["/s/diskA/Beta"]),
        ];
        let snapshot = MountSnapshot {
            entries: plans
                .iter()
                .map(|p| snapshot_entry(&p.mountpoint.display().to_string(), &p.fingerprint))
                .collect(),
            warnings: vec![],
        };
        let actions = planner().plan(&plans, &snapshot, &ctx(&last));
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| a.kind == ActionKind::NoOp));
    }
}
