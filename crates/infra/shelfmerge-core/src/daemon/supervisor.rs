use crate::config::{Documents, Settings};
use crate::daemon::lock::open_lock_file;
use crate::error::{MergeError, Result};
use crate::watch::{PersistentInotifyWatcher, WatchPollOutcome, WatchPollResult, system_clock};
use crate::workflow::{MergePassOrchestrator, MergePassOutcome, MergeReason};
use futures::FutureExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How often the watcher is polled while idle.
const WATCH_POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// Settle delay after a change burst before the pass runs.
const WATCH_SETTLE_DELAY: Duration = Duration::from_millis(500);
/// Minimum spacing between worker restarts.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Process exit codes. The exit code reflects the terminal state only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Failure,
    InvalidArgument,
    EnvPrecondition,
    AlreadyRunning,
}

impl ExitCode {
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::InvalidArgument => 64,
            Self::EnvPrecondition => 70,
            Self::AlreadyRunning => 75,
        }
    }

    pub fn from_error(e: &MergeError) -> Self {
        match e {
            MergeError::InvalidInput { .. }
            | MergeError::ConfigInvalid { .. }
            | MergeError::ConfigConflict { .. }
            | MergeError::ConfigNotFound { .. } => Self::InvalidArgument,
            MergeError::EnvPrecondition { .. } | MergeError::ToolNotFound { .. } => {
                Self::EnvPrecondition
            }
            MergeError::AlreadyRunning { .. } => Self::AlreadyRunning,
            _ => Self::Failure,
        }
    }
}

/// Owns the daemon lifecycle: single-instance lock, signal-driven
/// cooperative shutdown, the worker loop, and restart throttling.
pub struct DaemonSupervisor {
    settings: Settings,
    orchestrator: Arc<MergePassOrchestrator>,
    manual_tx: mpsc::Sender<()>,
    manual_rx: Option<mpsc::Receiver<()>>,
}

impl DaemonSupervisor {
    pub fn new(settings: Settings, documents: &Documents) -> Result<Self> {
        let orchestrator = Arc::new(MergePassOrchestrator::new(&settings, documents)?);
        let (manual_tx, manual_rx) = mpsc::channel(4);
        Ok(Self {
            settings,
            orchestrator,
            manual_tx,
            manual_rx: Some(manual_rx),
        })
    }

    /// Handle for requesting an out-of-schedule pass.
    pub fn manual_trigger(&self) -> mpsc::Sender<()> {
        self.manual_tx.clone()
    }

    pub fn orchestrator(&self) -> Arc<MergePassOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub async fn run(&mut self, cancel: CancellationToken) -> ExitCode {
        let lock_path = self.settings.lock_path();
        let mut lock = match open_lock_file(&lock_path) {
            Ok(lock) => lock,
            Err(e) => {
                error!(event = "supervisor.lock_failed", error = %e, "Cannot open lock file");
                return ExitCode::Failure;
            }
        };
        let mut guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(_) => {
                error!(
                    event = "supervisor.already_running",
                    lock = %lock_path.display(),
                    "Another instance holds the daemon lock"
                );
                return ExitCode::AlreadyRunning;
            }
        };
        let _ = guard.set_len(0);
        let _ = writeln!(*guard, "{}", std::process::id());

        let signal_task = spawn_signal_handler(cancel.clone());
        info!(
            event = "supervisor.started",
            pid = std::process::id(),
            "Daemon started"
        );

        let mut manual_rx = self.manual_rx.take().unwrap_or_else(|| {
            let (_tx, rx) = mpsc::channel(1);
            rx
        });

        let mut restarts: u32 = 0;
        let exit = loop {
            let worker = self.worker_loop(&cancel, &mut manual_rx);
            match std::panic::AssertUnwindSafe(worker).catch_unwind().await {
                Ok(Ok(())) => break ExitCode::Success,
                Ok(Err(e)) => {
                    error!(
                        event = "supervisor.worker_fault",
                        error = %e,
                        detail = ?e,
                        "Worker faulted"
                    );
                }
                Err(panic) => {
                    let text = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!(
                        event = "supervisor.worker_fault",
                        error = %text,
                        "Worker panicked"
                    );
                }
            }
            restarts += 1;
            if cancel.is_cancelled() || restarts > self.settings.worker_restart_limit {
                break ExitCode::Failure;
            }
            warn!(
                event = "supervisor.worker_restarted",
                restarts,
                limit = self.settings.worker_restart_limit,
                "Restarting worker after fault"
            );
            tokio::time::sleep(RESTART_DELAY).await;
        };

        signal_task.abort();
        drop(guard);
        info!(event = "supervisor.stopped", exit = exit.code(), "Daemon stopped");
        exit
    }

    /// One pass at a time: wait for the next trigger, run the pass, repeat.
    /// Cancellation stops the loop and drains via shutdown cleanup.
    async fn worker_loop(
        &self,
        cancel: &CancellationToken,
        manual_rx: &mut mpsc::Receiver<()>,
    ) -> Result<()> {
        let startup = self
            .orchestrator
            .run_merge_pass(MergeReason::Startup, false, cancel)
            .await;
        if startup == MergePassOutcome::Skipped {
            self.drain().await;
            return Ok(());
        }

        let mut watcher = if self.settings.watcher_enabled {
            let mut roots: Vec<PathBuf> = vec![self.settings.sources_root.clone()];
            if let Some(override_root) = &self.settings.override_root {
                roots.push(override_root.clone());
            }
            let mut watcher =
                PersistentInotifyWatcher::new(roots, self.settings.watcher_retry(), system_clock());
            for warning in watcher.start() {
                warn!(event = "watch.inotify.start_warning", "{warning}");
            }
            Some(watcher)
        } else {
            None
        };

        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.settings.merge_interval(),
            self.settings.merge_interval(),
        );
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let reason = tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => MergeReason::Interval,
                Some(()) = manual_rx.recv() => MergeReason::Manual,
                result = poll_watcher(watcher.as_mut()) => {
                    match watch_trigger(&result) {
                        Some(reason) => {
                            tokio::time::sleep(WATCH_SETTLE_DELAY).await;
                            reason
                        }
                        None => continue,
                    }
                }
            };

            let outcome = self.orchestrator.run_merge_pass(reason, false, cancel).await;
            if outcome == MergePassOutcome::Skipped {
                break;
            }
            // A just-finished pass covers whatever the next tick would see.
            interval.reset();
        }

        if let Some(watcher) = watcher.as_mut() {
            watcher.shutdown().await;
        }
        self.drain().await;
        Ok(())
    }

    /// Graceful stop: unmount managed views within the stop budget. Runs on
    /// a fresh token because the daemon token is already cancelled.
    async fn drain(&self) {
        if !self.settings.cleanup_on_shutdown {
            return;
        }
        let drain_token = CancellationToken::new();
        let cleanup = self.orchestrator.run_shutdown_cleanup(&drain_token);
        match tokio::time::timeout(self.settings.stop_timeout(), cleanup).await {
            Ok(outcome) => info!(
                event = "supervisor.drain_completed",
                outcome = outcome.as_str(),
                "Shutdown cleanup finished"
            ),
            Err(_) => {
                drain_token.cancel();
                warn!(
                    event = "supervisor.drain_timeout",
                    budget_secs = self.settings.stop_timeout_secs,
                    "Shutdown cleanup exceeded its budget"
                );
            }
        }
    }
}

async fn poll_watcher(watcher: Option<&mut PersistentInotifyWatcher>) -> WatchPollResult {
    match watcher {
        Some(watcher) => watcher.poll(WATCH_POLL_TIMEOUT).await,
        None => std::future::pending().await,
    }
}

fn watch_trigger(result: &WatchPollResult) -> Option<MergeReason> {
    match result.outcome {
        WatchPollOutcome::Success if !result.events.is_empty() => Some(MergeReason::WatchEvent),
        _ => None,
    }
}

fn spawn_signal_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    error!(event = "supervisor.signal_failed", error = %e, "Cannot install SIGTERM handler");
                    return;
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(signal) => signal,
                Err(e) => {
                    error!(event = "supervisor.signal_failed", error = %e, "Cannot install SIGINT handler");
                    return;
                }
            };
            tokio::select! {
                _ = sigterm.recv() => info!(event = "supervisor.signal", signal = "SIGTERM", "Termination requested"),
                _ = sigint.recv() => info!(event = "supervisor.signal", signal = "SIGINT", "Termination requested"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        cancel.cancel();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_documents;
    use serial_test::serial;
    use tempfile::TempDir;

    fn settings_for(dir: &TempDir) -> Settings {
        let yaml = format!(
            concat!(
                "sources_root: {0}/sources\n",
                "merged_root: {0}/merged\n",
                "state_root: {0}/state\n",
                "watcher_enabled: false\n",
                "cleanup_on_shutdown: false\n",
            ),
            dir.path().display()
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn exit_codes_match_the_cli_contract() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Failure.code(), 1);
        assert_eq!(ExitCode::InvalidArgument.code(), 64);
        assert_eq!(ExitCode::EnvPrecondition.code(), 70);
        assert_eq!(ExitCode::AlreadyRunning.code(), 75);
    }

    #[test]
    fn error_mapping_targets_the_right_codes() {
        let invalid = MergeError::ConfigInvalid {
            message: "x".to_string(),
        };
        assert_eq!(ExitCode::from_error(&invalid), ExitCode::InvalidArgument);

        let env = MergeError::EnvPrecondition {
            message: "x".to_string(),
        };
        assert_eq!(ExitCode::from_error(&env), ExitCode::EnvPrecondition);

        let running = MergeError::AlreadyRunning {
            path: PathBuf::from("/x"),
        };
        assert_eq!(ExitCode::from_error(&running), ExitCode::AlreadyRunning);

        let io = MergeError::Io(std::io::Error::other("boom"));
        assert_eq!(ExitCode::from_error(&io), ExitCode::Failure);
    }

    // Signal handler installation is process-global state.
    #[tokio::test]
    #[serial]
    async fn pre_cancelled_run_exits_cleanly_and_releases_the_lock() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sources")).unwrap();
        let settings = settings_for(&dir);
        let documents = load_documents(dir.path()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut supervisor = DaemonSupervisor::new(settings.clone(), &documents).unwrap();
        let exit = supervisor.run(cancel).await;
        assert_eq!(exit, ExitCode::Success);

        // Lock must be free again for the next instance.
        let mut lock = open_lock_file(&settings.lock_path()).unwrap();
        assert!(lock.try_write().is_ok());
    }

    #[tokio::test]
    #[serial]
    async fn second_instance_is_rejected_while_lock_is_held() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sources")).unwrap();
        let settings = settings_for(&dir);
        let documents = load_documents(dir.path()).unwrap();

        let mut lock = open_lock_file(&settings.lock_path()).unwrap();
        let _guard = lock.try_write().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut supervisor = DaemonSupervisor::new(settings, &documents).unwrap();
        let exit = supervisor.run(cancel).await;
        assert_eq!(exit, ExitCode::AlreadyRunning);
    }
}
