use crate::config::{Documents, Settings};
use crate::discovery::discover_volumes;
use crate::error::Result;
use crate::exec::CommandExecutor;
use crate::mount::{ApplyOutcome, MountCommandService, MountToolPolicy};
use crate::naming::{EquivalenceService, SceneTagMatcher, SourcePriorityService, TitleNormalizer};
use crate::plan::{BranchPlanner, MountPlan};
use crate::platform::find_fusermount;
use crate::platform::linux::UNION_FS_MARKER;
use crate::reconcile::{ActionKind, ReconcileContext, ReconciliationAction, ReconciliationPlanner};
use crate::snapshot::{MountSnapshot, MountSnapshotReader};
use crate::stage::BranchLinkStager;
use crate::utils::paths::mountpoint_key;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Aggregate result of one merge pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePassOutcome {
    Success,
    Busy,
    Failure,
    Mixed,
    NoWork,
    Skipped,
}

impl MergePassOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Busy => "Busy",
            Self::Failure => "Failure",
            Self::Mixed => "Mixed",
            Self::NoWork => "NoWork",
            Self::Skipped => "Skipped",
        }
    }
}

/// What triggered a pass; logged with every pass event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeReason {
    Startup,
    Interval,
    WatchEvent,
    Manual,
    Shutdown,
}

impl MergeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "Startup",
            Self::Interval => "Interval",
            Self::WatchEvent => "WatchEvent",
            Self::Manual => "Manual",
            Self::Shutdown => "Shutdown",
        }
    }
}

/// Drives one complete pass: discover, plan, stage, snapshot, reconcile,
/// apply, post-validate, classify.
///
/// Passes are strictly serialized by the caller; the only state surviving a
/// pass is the retained last-desired map, guarded by a mutex.
pub struct MergePassOrchestrator {
    sources_root: PathBuf,
    override_root: Option<PathBuf>,
    max_consecutive_mount_failures: u32,
    cleanup_on_startup: bool,
    planner: BranchPlanner,
    stager: BranchLinkStager,
    snapshot_reader: Arc<MountSnapshotReader>,
    mount_service: MountCommandService,
    reconciler: ReconciliationPlanner,
    /// Mountpoint key -> branch link dir of the last desired plan
    last_desired: Mutex<HashMap<String, PathBuf>>,
    startup_cleanup_pending: Mutex<bool>,
}

impl MergePassOrchestrator {
    pub fn new(settings: &Settings, documents: &Documents) -> Result<Self> {
        let normalizer = Arc::new(TitleNormalizer::new());
        let matcher = if documents.scene_tags.tags.is_empty() {
            None
        } else {
            Some(SceneTagMatcher::new(&documents.scene_tags.tags, &normalizer)?)
        };
        let equivalence = Arc::new(EquivalenceService::new(
            &documents.equivalents,
            Arc::clone(&normalizer),
            matcher,
        )?);
        let priority = Arc::new(SourcePriorityService::new(
            &documents.source_priority.sources,
        )?);

        let executor = Arc::new(CommandExecutor::new());
        let snapshot_reader = Arc::new(MountSnapshotReader::new(
            Arc::clone(&executor),
            settings.merged_root.clone(),
            settings.command_timeout(),
            settings.command_poll_interval(),
            settings.max_output_chars,
            settings.health_check_enabled,
        ));
        let mount_service = MountCommandService::new(
            Arc::clone(&executor),
            Arc::clone(&snapshot_reader),
            MountToolPolicy {
                extra_options: settings.mergerfs_options.clone(),
                read_only: settings.mount_read_only,
                apply_high_priority: settings.cleanup_apply_high_priority,
                ionice_class: settings.ionice_class,
                nice_value: settings.nice_value,
                busy_retry_limit: settings.busy_retry_limit,
            },
            find_fusermount(),
            settings.command_timeout(),
            settings.command_poll_interval(),
            settings.max_output_chars,
        );

        Ok(Self {
            sources_root: settings.sources_root.clone(),
            override_root: settings.override_root.clone(),
            max_consecutive_mount_failures: settings.max_consecutive_mount_failures,
            cleanup_on_startup: settings.cleanup_on_startup,
            planner: BranchPlanner::new(
                equivalence,
                priority,
                normalizer,
                settings.merged_root.clone(),
                &settings.excluded_sources,
            ),
            stager: BranchLinkStager::new(settings.branch_links_root()),
            snapshot_reader,
            mount_service,
            reconciler: ReconciliationPlanner::new(settings.merged_root.clone()),
            last_desired: Mutex::new(HashMap::new()),
            startup_cleanup_pending: Mutex::new(true),
        })
    }

    /// A copy of the retained map, for diagnostics. Never hands out the
    /// internal map.
    pub fn last_desired_snapshot(&self) -> HashMap<String, PathBuf> {
        self.last_desired
            .lock()
            .map(|map| map.clone())
            .unwrap_or_default()
    }

    pub async fn run_merge_pass(
        &self,
        reason: MergeReason,
        force: bool,
        cancel: &CancellationToken,
    ) -> MergePassOutcome {
        if cancel.is_cancelled() {
            info!(event = "merge.workflow.pass_skipped", reason = reason.as_str(), "Pass skipped: cancelled");
            return MergePassOutcome::Skipped;
        }
        info!(
            event = "merge.workflow.pass_started",
            reason = reason.as_str(),
            force,
            "Merge pass started"
        );

        // Discover and plan the desired world.
        let discovered = discover_volumes(&self.sources_root, self.override_root.as_deref());
        let plan_output = self.planner.plan(&discovered.volumes);
        for warning in discovered.warnings.iter().chain(&plan_output.warnings) {
            warn!(event = "merge.workflow.plan_warning", "{warning}");
        }

        // Stage branch link trees. Failures degrade: the affected mount will
        // fail and be classified below.
        let mut staged_links: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for plan in &plan_output.plans {
            let staged = self.stager.stage(plan);
            for warning in &staged.warnings {
                warn!(event = "merge.workflow.stage_warning", "{warning}");
            }
            staged_links.insert(plan.fingerprint.clone(), staged.link_paths);
        }

        let snapshot = self.snapshot_reader.capture(cancel).await;

        let cleanup_foreign = self.take_startup_cleanup();
        let last_desired = self.last_desired_snapshot();
        let actions = self.reconciler.plan(
            &plan_output.plans,
            &snapshot,
            &ReconcileContext {
                force,
                cleanup_foreign,
                last_desired: &last_desired,
            },
        );

        let outcome = self
            .apply_actions(&actions, &staged_links, cancel)
            .await;

        self.retain_last_desired(&plan_output.plans);
        self.sweep_staging(&plan_output.plans, &snapshot);

        info!(
            event = "merge.workflow.pass_completed",
            reason = reason.as_str(),
            outcome = outcome.as_str(),
            "Merge pass completed"
        );
        outcome
    }

    /// Final drain: unmount everything we own (and foreign union mounts, as
    /// cleanup is active) under the merged root.
    pub async fn run_shutdown_cleanup(&self, cancel: &CancellationToken) -> MergePassOutcome {
        info!(
            event = "merge.workflow.shutdown_cleanup",
            reason = MergeReason::Shutdown.as_str(),
            "Shutdown cleanup started"
        );
        let snapshot = self.snapshot_reader.capture(cancel).await;
        let last_desired = self.last_desired_snapshot();
        let actions = self.reconciler.plan(
            &[],
            &snapshot,
            &ReconcileContext {
                force: false,
                cleanup_foreign: true,
                last_desired: &last_desired,
            },
        );
        let outcome = self.apply_actions(&actions, &HashMap::new(), cancel).await;
        if let Ok(mut map) = self.last_desired.lock() {
            map.clear();
        }
        self.sweep_staging(&[], &snapshot);
        outcome
    }

    async fn apply_actions(
        &self,
        actions: &[ReconciliationAction],
        staged_links: &HashMap<String, Vec<PathBuf>>,
        cancel: &CancellationToken,
    ) -> MergePassOutcome {
        let mut had_busy = false;
        let mut had_failure = false;
        let mut consecutive_mount_failures: u32 = 0;
        let mut applied_work = false;
        let mut successful_mounts: Vec<&ReconciliationAction> = Vec::new();

        for (index, action) in actions.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    event = "merge.workflow.pass_skipped",
                    applied = index,
                    "Cancelled between actions"
                );
                return MergePassOutcome::Skipped;
            }
            if action.kind == ActionKind::NoOp {
                consecutive_mount_failures = 0;
                continue;
            }
            applied_work = true;

            let link_paths = action
                .plan
                .as_ref()
                .and_then(|plan| staged_links.get(&plan.fingerprint))
                .map(Vec::as_slice);
            let result = self.mount_service.apply(action, link_paths, cancel).await;
            info!(
                event = "merge.workflow.action_applied",
                kind = action.kind.as_str(),
                reason = action.reason.as_str(),
                mountpoint = %action.mountpoint.display(),
                outcome = result.outcome.as_str(),
                diagnostic = %result.diagnostic,
                "Applied reconciliation action"
            );

            match result.outcome {
                ApplyOutcome::Success => {
                    consecutive_mount_failures = 0;
                    if action.is_mount_like() {
                        successful_mounts.push(action);
                    }
                }
                ApplyOutcome::Busy => had_busy = true,
                ApplyOutcome::Failure => {
                    had_failure = true;
                    if action.is_mount_like() {
                        consecutive_mount_failures += 1;
                        if consecutive_mount_failures >= self.max_consecutive_mount_failures {
                            let skipped = actions.len() - index - 1;
                            warn!(
                                event = "merge.workflow.fail_fast",
                                code = "MergeActionFailFast",
                                consecutive_failures = consecutive_mount_failures,
                                skipped_actions = skipped,
                                "Aborting remaining actions after repeated mount failures"
                            );
                            break;
                        }
                    } else {
                        consecutive_mount_failures = 0;
                    }
                }
            }
        }

        // One re-snapshot validates every mount that claimed success.
        if !successful_mounts.is_empty() {
            let validation = self.snapshot_reader.capture(cancel).await;
            for action in successful_mounts {
                if !mount_visible(&validation, action) {
                    warn!(
                        event = "merge.workflow.postcheck_failed",
                        mountpoint = %action.mountpoint.display(),
                        "Mount reported success but is not visible in the snapshot"
                    );
                    had_failure = true;
                }
            }
        }

        match (had_busy, had_failure) {
            (true, true) => MergePassOutcome::Mixed,
            (true, false) => MergePassOutcome::Busy,
            (false, true) => MergePassOutcome::Failure,
            (false, false) => {
                if applied_work {
                    MergePassOutcome::Success
                } else {
                    MergePassOutcome::NoWork
                }
            }
        }
    }

    fn take_startup_cleanup(&self) -> bool {
        if !self.cleanup_on_startup {
            return false;
        }
        self.startup_cleanup_pending
            .lock()
            .map(|mut pending| std::mem::replace(&mut *pending, false))
            .unwrap_or(false)
    }

    fn retain_last_desired(&self, plans: &[MountPlan]) {
        if let Ok(mut map) = self.last_desired.lock() {
            map.clear();
            for plan in plans {
                map.insert(
                    mountpoint_key(&plan.mountpoint),
                    self.stager.link_dir(&plan.fingerprint),
                );
            }
        }
    }

    /// Drop staging trees no longer referenced by the plan or by any live
    /// union mount (a lazily-detached mount may still read through its
    /// links).
    fn sweep_staging(&self, plans: &[MountPlan], snapshot: &MountSnapshot) {
        let mut keep: HashSet<String> = plans.iter().map(|p| p.fingerprint.clone()).collect();
        for entry in &snapshot.entries {
            if entry.fs_type.to_lowercase().contains(UNION_FS_MARKER) {
                keep.insert(entry.source.clone());
            }
        }
        for warning in self.stager.sweep_stale(&keep) {
            warn!(event = "merge.workflow.stage_warning", "{warning}");
        }
    }
}

fn mount_visible(snapshot: &MountSnapshot, action: &ReconciliationAction) -> bool {
    snapshot
        .entry_at(&action.mountpoint)
        .is_some_and(|entry| entry.fs_type.to_lowercase().contains(UNION_FS_MARKER))
}
