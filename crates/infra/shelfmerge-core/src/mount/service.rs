use crate::exec::{CommandExecutor, CommandOutcome, CommandRequest, CommandResult, SpawnFailureKind};
use crate::plan::MountPlan;
use crate::platform::common::{BUSY_RETRY_DELAY, READINESS_POLL_INTERVAL, READINESS_TIMEOUT};
use crate::platform::linux::{
    DEFAULT_MOUNT_OPTIONS, IONICE_BIN, MERGERFS_BIN, NICE_BIN, UMOUNT_BIN, UNION_FS_MARKER,
};
use crate::reconcile::{ActionKind, ReconciliationAction};
use crate::snapshot::MountSnapshotReader;
use crate::utils::paths::ensure_dir;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stderr markers (lowercase) that classify a mount-tool failure as Busy.
/// Collected in one place so the policy is auditable.
const BUSY_STDERR_MARKERS: &[&str] = &[
    "device or resource busy",
    "target is busy",
    "resource busy",
    "mount is busy",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Success,
    Busy,
    Failure,
}

impl ApplyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Busy => "Busy",
            Self::Failure => "Failure",
        }
    }
}

#[derive(Debug)]
pub struct ApplyResult {
    pub outcome: ApplyOutcome,
    pub diagnostic: String,
}

impl ApplyResult {
    fn success(diagnostic: impl Into<String>) -> Self {
        Self {
            outcome: ApplyOutcome::Success,
            diagnostic: diagnostic.into(),
        }
    }

    fn busy(diagnostic: impl Into<String>) -> Self {
        Self {
            outcome: ApplyOutcome::Busy,
            diagnostic: diagnostic.into(),
        }
    }

    fn failure(diagnostic: impl Into<String>) -> Self {
        Self {
            outcome: ApplyOutcome::Failure,
            diagnostic: diagnostic.into(),
        }
    }
}

/// How mount tools are invoked: base options, read-only policy, and the
/// optional cleanup-priority wrapper.
#[derive(Debug, Clone)]
pub struct MountToolPolicy {
    pub extra_options: Vec<String>,
    pub read_only: bool,
    pub apply_high_priority: bool,
    pub ionice_class: u8,
    pub nice_value: i8,
    pub busy_retry_limit: u32,
}

/// Applies one reconciliation action by driving the external mount tools.
///
/// Every apply returns an `ApplyResult`; nothing here throws for tool
/// failures. Tool-not-found is a Failure with a fix-it diagnostic.
pub struct MountCommandService {
    executor: Arc<CommandExecutor>,
    snapshot_reader: Arc<MountSnapshotReader>,
    policy: MountToolPolicy,
    fusermount: Option<PathBuf>,
    timeout: Duration,
    poll_interval: Duration,
    max_output_chars: usize,
}

impl MountCommandService {
    pub fn new(
        executor: Arc<CommandExecutor>,
        snapshot_reader: Arc<MountSnapshotReader>,
        policy: MountToolPolicy,
        fusermount: Option<PathBuf>,
        timeout: Duration,
        poll_interval: Duration,
        max_output_chars: usize,
    ) -> Self {
        Self {
            executor,
            snapshot_reader,
            policy,
            fusermount,
            timeout,
            poll_interval,
            max_output_chars,
        }
    }

    /// Apply one action. `link_paths` carries the staged branch links for
    /// Mount/Remount; its order is the union's search order.
    pub async fn apply(
        &self,
        action: &ReconciliationAction,
        link_paths: Option<&[PathBuf]>,
        cancel: &CancellationToken,
    ) -> ApplyResult {
        match action.kind {
            ActionKind::NoOp => ApplyResult::success("no change"),
            ActionKind::Unmount => self.unmount(&action.mountpoint, cancel).await,
            ActionKind::Mount => match (&action.plan, link_paths) {
                (Some(plan), Some(links)) => self.mount(plan, links, cancel).await,
                _ => ApplyResult::failure("mount action without staged branches"),
            },
            ActionKind::Remount => match (&action.plan, link_paths) {
                (Some(plan), Some(links)) => {
                    let unmounted = self.unmount(&action.mountpoint, cancel).await;
                    match unmounted.outcome {
                        ApplyOutcome::Success => self.mount(plan, links, cancel).await,
                        // A busy unmount leaves the old mount serving; do not
                        // stack a new one on top of it.
                        ApplyOutcome::Busy => unmounted,
                        ApplyOutcome::Failure => unmounted,
                    }
                }
                _ => ApplyResult::failure("remount action without staged branches"),
            },
        }
    }

    async fn mount(
        &self,
        plan: &MountPlan,
        link_paths: &[PathBuf],
        cancel: &CancellationToken,
    ) -> ApplyResult {
        if link_paths.is_empty() {
            return ApplyResult::failure("no staged branch links to mount");
        }
        if let Err(e) = ensure_dir(&plan.mountpoint) {
            return ApplyResult::failure(format!(
                "cannot create mountpoint {}: {e}",
                plan.mountpoint.display()
            ));
        }

        let branches = link_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        let args = vec![
            "-o".to_string(),
            self.mount_options(&plan.fingerprint),
            branches,
            plan.mountpoint.display().to_string(),
        ];

        info!(
            event = "mount.command.mount",
            mountpoint = %plan.mountpoint.display(),
            fingerprint = %plan.fingerprint,
            branches = link_paths.len(),
            "Mounting union view"
        );
        let result = self.run_tool(MERGERFS_BIN, args, cancel).await;
        let applied = classify(MERGERFS_BIN, &result);
        if applied.outcome != ApplyOutcome::Success {
            return applied;
        }

        // A successful exit only means the FUSE daemon detached; confirm the
        // mount actually appears before reporting success.
        match self.probe_ready(&plan.mountpoint, cancel).await {
            Ok(()) => ApplyResult::success(format!(
                "mounted {} branches at {}",
                link_paths.len(),
                plan.mountpoint.display()
            )),
            Err(diagnostic) => {
                warn!(
                    event = "mount.command.readiness_failed",
                    mountpoint = %plan.mountpoint.display(),
                    "{diagnostic}"
                );
                ApplyResult::failure(diagnostic)
            }
        }
    }

    async fn unmount(&self, mountpoint: &Path, cancel: &CancellationToken) -> ApplyResult {
        info!(
            event = "mount.command.unmount",
            mountpoint = %mountpoint.display(),
            "Unmounting"
        );

        let mut last_busy_diag = String::new();
        for attempt in 0..=self.policy.busy_retry_limit {
            if attempt > 0 {
                tokio::time::sleep(BUSY_RETRY_DELAY).await;
            }
            let result = match &self.fusermount {
                Some(fusermount) => {
                    let program = fusermount.display().to_string();
                    let args = vec!["-u".to_string(), mountpoint.display().to_string()];
                    let result = self.run_tool(&program, args, cancel).await;
                    classify(&program, &result)
                }
                None => {
                    let args = vec![mountpoint.display().to_string()];
                    let result = self.run_tool(UMOUNT_BIN, args, cancel).await;
                    classify(UMOUNT_BIN, &result)
                }
            };
            match result.outcome {
                ApplyOutcome::Busy => {
                    debug!(
                        mountpoint = %mountpoint.display(),
                        attempt,
                        "Unmount busy, will retry"
                    );
                    last_busy_diag = result.diagnostic;
                }
                _ => return result,
            }
        }

        // Busy through every retry: lazy unmount detaches the mountpoint now
        // and lets the kernel finish once the last opener goes away.
        warn!(
            event = "mount.command.lazy_fallback",
            mountpoint = %mountpoint.display(),
            "Unmount still busy after retries, falling back to lazy unmount"
        );
        let args = vec!["-l".to_string(), mountpoint.display().to_string()];
        let result = self.run_tool(UMOUNT_BIN, args, cancel).await;
        let classified = classify(UMOUNT_BIN, &result);
        if classified.outcome == ApplyOutcome::Busy {
            ApplyResult::busy(format!(
                "still busy after lazy unmount fallback: {last_busy_diag}"
            ))
        } else {
            classified
        }
    }

    fn mount_options(&self, fingerprint: &str) -> String {
        let mut options: Vec<String> = DEFAULT_MOUNT_OPTIONS
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        if self.policy.read_only {
            options.push("ro".to_string());
        }
        options.extend(self.policy.extra_options.iter().cloned());
        options.push(format!("fsname={fingerprint}"));
        options.join(",")
    }

    /// Wrap the tool in `ionice -c <class> nice -n <value>` when the policy
    /// asks for cleanup-priority application.
    fn wrapped(&self, program: &str, args: Vec<String>) -> (String, Vec<String>) {
        if !self.policy.apply_high_priority {
            return (program.to_string(), args);
        }
        let mut wrapped_args = vec![
            "-c".to_string(),
            self.policy.ionice_class.to_string(),
            NICE_BIN.to_string(),
            "-n".to_string(),
            self.policy.nice_value.to_string(),
            program.to_string(),
        ];
        wrapped_args.extend(args);
        (IONICE_BIN.to_string(), wrapped_args)
    }

    async fn run_tool(
        &self,
        program: &str,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> CommandResult {
        let (program, args) = self.wrapped(program, args);
        let request = CommandRequest {
            program,
            args,
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            max_output_chars: self.max_output_chars,
        };
        match self.executor.execute(&request, cancel).await {
            Ok(result) => result,
            // Requests built here are always valid; treat a rejected one as
            // a start failure so the action classifies as Failure.
            Err(e) => CommandResult {
                outcome: CommandOutcome::StartFailed,
                failure: SpawnFailureKind::Other,
                exit_code: None,
                stdout: String::new(),
                stderr: e.to_string(),
                stdout_truncated: false,
                stderr_truncated: false,
                elapsed: Duration::ZERO,
            },
        }
    }

    /// Verify a fresh mount is visible: the mountpoint stats and a new
    /// snapshot shows a union filesystem at it.
    async fn probe_ready(
        &self,
        mountpoint: &Path,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), String> {
        let deadline = Instant::now() + READINESS_TIMEOUT;
        loop {
            if cancel.is_cancelled() {
                return Err("readiness probe cancelled".to_string());
            }
            if tokio::fs::metadata(mountpoint).await.is_ok() {
                let snapshot = self.snapshot_reader.capture(cancel).await;
                if let Some(entry) = snapshot.entry_at(mountpoint)
                    && entry.fs_type.to_lowercase().contains(UNION_FS_MARKER)
                {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(format!(
                    "mount at {} not visible as a union filesystem within {}s",
                    mountpoint.display(),
                    READINESS_TIMEOUT.as_secs()
                ));
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }
}

/// Map one tool invocation to an apply outcome.
fn classify(program: &str, result: &CommandResult) -> ApplyResult {
    match result.outcome {
        CommandOutcome::Success => ApplyResult::success(format!("{program} succeeded")),
        CommandOutcome::NonZeroExit => {
            let stderr_lower = result.stderr.to_lowercase();
            if BUSY_STDERR_MARKERS.iter().any(|m| stderr_lower.contains(m)) {
                ApplyResult::busy(format!("{program}: {}", result.stderr.trim()))
            } else {
                ApplyResult::failure(format!(
                    "{program} exited with {:?}: {}",
                    result.exit_code,
                    result.stderr.trim()
                ))
            }
        }
        CommandOutcome::TimedOut => {
            ApplyResult::failure(format!("{program} timed out after {:?}", result.elapsed))
        }
        CommandOutcome::Cancelled => ApplyResult::failure(format!("{program} cancelled")),
        CommandOutcome::StartFailed => match result.failure {
            SpawnFailureKind::ToolNotFound => ApplyResult::failure(format!(
                "{program} not found on PATH; install it or adjust PATH"
            )),
            SpawnFailureKind::PermissionDenied => ApplyResult::failure(format!(
                "{program} is not executable by this user"
            )),
            _ => ApplyResult::failure(format!("{program} failed to start: {}", result.stderr)),
        },
    }
}
