use crate::plan::MountPlan;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Mount,
    Remount,
    Unmount,
    NoOp,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mount => "Mount",
            Self::Remount => "Remount",
            Self::Unmount => "Unmount",
            Self::NoOp => "NoOp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionReason {
    /// Desired mount absent from the snapshot
    Missing,
    /// Snapshot fingerprint differs from the planned one
    FingerprintChanged,
    /// Mounted at a desired mountpoint but not carrying our fingerprint
    /// encoding, so the branch order cannot be trusted
    BranchOrderChanged,
    /// Union mount under the merged root that we never created
    Foreign,
    /// Previously ours, no longer desired
    Orphaned,
    /// Health probe failed for an otherwise matching mount
    HealthCheckFailed,
    /// Forced refresh of an existing desired mount
    Desired,
    /// Snapshot already matches the plan
    Unchanged,
}

impl ActionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "Missing",
            Self::FingerprintChanged => "FingerprintChanged",
            Self::BranchOrderChanged => "BranchOrderChanged",
            Self::Foreign => "Foreign",
            Self::Orphaned => "Orphaned",
            Self::HealthCheckFailed => "HealthCheckFailed",
            Self::Desired => "Desired",
            Self::Unchanged => "Unchanged",
        }
    }
}

/// One step of a reconciliation: what to do at a mountpoint and why.
///
/// A mountpoint appears in at most one action per plan; "unmount then
/// mount" is expressed as a single Remount.
#[derive(Debug, Clone)]
pub struct ReconciliationAction {
    pub kind: ActionKind,
    pub reason: ActionReason,
    pub mountpoint: PathBuf,
    /// Present for Mount and Remount
    pub plan: Option<MountPlan>,
}

impl ReconciliationAction {
    pub fn is_mount_like(&self) -> bool {
        matches!(self.kind, ActionKind::Mount | ActionKind::Remount)
    }
}
