use crate::platform::linux::INOTIFYWAIT_BIN;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Injected monotonic clock so retry gates are testable.
pub type MonotonicClock = Arc<dyn Fn() -> Instant + Send + Sync>;

pub fn system_clock() -> MonotonicClock {
    Arc::new(Instant::now)
}

/// One line of change output from a monitor session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub root: PathBuf,
    pub line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPollOutcome {
    Success,
    TimedOut,
    ToolNotFound,
    CommandFailed,
}

#[derive(Debug)]
pub struct WatchPollResult {
    pub outcome: WatchPollOutcome,
    pub events: Vec<WatchEvent>,
    pub warnings: Vec<String>,
}

struct WatchSession {
    root: PathBuf,
    recursive: bool,
    child: Child,
}

struct PendingDeep {
    root: PathBuf,
    not_before: Instant,
}

/// Maintains long-lived `inotifywait -m` monitor sessions.
///
/// Progressive startup: a shallow session per root starts immediately so
/// top-level changes are seen at once, while recursive deep sessions (which
/// can be slow or fail on watch limits) start behind a retry gate. Deep
/// sessions that fail to start or stop running are requeued with a fixed
/// back-off measured against the injected monotonic clock.
pub struct PersistentInotifyWatcher {
    program: String,
    roots: Vec<PathBuf>,
    retry_backoff: Duration,
    clock: MonotonicClock,
    sessions: Vec<WatchSession>,
    pending_deep: VecDeque<PendingDeep>,
    event_tx: mpsc::UnboundedSender<WatchEvent>,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    tool_missing: bool,
    last_spawn_error: Option<String>,
}

impl PersistentInotifyWatcher {
    pub fn new(roots: Vec<PathBuf>, retry_backoff: Duration, clock: MonotonicClock) -> Self {
        Self::with_program(INOTIFYWAIT_BIN, roots, retry_backoff, clock)
    }

    /// Program override keeps tests independent of the real monitor tool.
    pub fn with_program(
        program: &str,
        roots: Vec<PathBuf>,
        retry_backoff: Duration,
        clock: MonotonicClock,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            program: program.to_string(),
            roots,
            retry_backoff,
            clock,
            sessions: Vec::new(),
            pending_deep: VecDeque::new(),
            event_tx,
            event_rx,
            tool_missing: false,
            last_spawn_error: None,
        }
    }

    /// Start shallow sessions for every root and queue the deep ones.
    pub fn start(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        let now = (self.clock)();
        for root in self.roots.clone() {
            if let Err(message) = self.spawn_session(&root, false) {
                warnings.push(message);
            }
            self.pending_deep.push_back(PendingDeep {
                root,
                not_before: now,
            });
        }
        info!(
            event = "watch.inotify.started",
            roots = self.roots.len(),
            "Watcher started in progressive mode"
        );
        warnings
    }

    /// Drain change events, reviving sessions as needed. Waits up to
    /// `timeout` for the first event.
    pub async fn poll(&mut self, timeout: Duration) -> WatchPollResult {
        let mut warnings = Vec::new();
        self.reap_stopped_sessions(&mut warnings);
        self.service_deep_queue(&mut warnings);

        let mut events = Vec::new();
        match tokio::time::timeout(timeout, self.event_rx.recv()).await {
            Ok(Some(event)) => {
                events.push(event);
                while let Ok(event) = self.event_rx.try_recv() {
                    events.push(event);
                }
            }
            Ok(None) | Err(_) => {}
        }

        let outcome = if !events.is_empty() {
            WatchPollOutcome::Success
        } else if self.tool_missing {
            WatchPollOutcome::ToolNotFound
        } else if self.sessions.is_empty() && self.last_spawn_error.is_some() {
            WatchPollOutcome::CommandFailed
        } else {
            WatchPollOutcome::TimedOut
        };
        WatchPollResult {
            outcome,
            events,
            warnings,
        }
    }

    pub async fn shutdown(&mut self) {
        for mut session in self.sessions.drain(..) {
            let _ = session.child.start_kill();
            let _ = session.child.wait().await;
        }
        debug!(event = "watch.inotify.stopped", "Watcher stopped");
    }

    fn reap_stopped_sessions(&mut self, warnings: &mut Vec<String>) {
        let now = (self.clock)();
        let drained: Vec<WatchSession> = self.sessions.drain(..).collect();
        let mut still_running = Vec::new();
        for mut session in drained {
            match session.child.try_wait() {
                Ok(None) => still_running.push(session),
                Ok(Some(status)) => {
                    let message = format!(
                        "watch session for {} stopped ({status}), requeueing",
                        session.root.display()
                    );
                    warn!(event = "watch.inotify.session_stopped", "{message}");
                    warnings.push(message);
                    if session.recursive {
                        self.pending_deep.push_back(PendingDeep {
                            root: session.root,
                            not_before: now + self.retry_backoff,
                        });
                    } else if let Err(message) = self.spawn_session(&session.root, false) {
                        warnings.push(message);
                    }
                }
                Err(e) => {
                    warnings.push(format!(
                        "cannot check watch session for {}: {e}",
                        session.root.display()
                    ));
                    still_running.push(session);
                }
            }
        }
        self.sessions = still_running;
    }

    fn service_deep_queue(&mut self, warnings: &mut Vec<String>) {
        let now = (self.clock)();
        let due: Vec<PathBuf> = {
            let mut due = Vec::new();
            let mut waiting = VecDeque::new();
            while let Some(pending) = self.pending_deep.pop_front() {
                if pending.not_before <= now {
                    due.push(pending.root);
                } else {
                    waiting.push_back(pending);
                }
            }
            self.pending_deep = waiting;
            due
        };

        for root in due {
            if let Err(message) = self.spawn_session(&root, true) {
                warnings.push(message);
                self.pending_deep.push_back(PendingDeep {
                    root,
                    not_before: (self.clock)() + self.retry_backoff,
                });
            }
        }
    }

    fn spawn_session(&mut self, root: &Path, recursive: bool) -> Result<(), String> {
        let mut command = Command::new(&self.program);
        command.arg("-m").arg("-q");
        if recursive {
            command.arg("-r");
        }
        command
            .arg("-e")
            .arg("create,delete,move,close_write")
            .arg(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match command.spawn() {
            Ok(mut child) => {
                self.tool_missing = false;
                self.last_spawn_error = None;
                if let Some(stdout) = child.stdout.take() {
                    let tx = self.event_tx.clone();
                    let event_root = root.to_path_buf();
                    tokio::spawn(async move {
                        let mut lines = BufReader::new(stdout).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            if tx.send(WatchEvent {
                                root: event_root.clone(),
                                line,
                            })
                            .is_err()
                            {
                                break;
                            }
                        }
                    });
                }
                debug!(
                    event = "watch.inotify.session_started",
                    root = %root.display(),
                    recursive,
                    "Watch session started"
                );
                self.sessions.push(WatchSession {
                    root: root.to_path_buf(),
                    recursive,
                    child,
                });
                Ok(())
            }
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    self.tool_missing = true;
                }
                self.last_spawn_error = Some(e.to_string());
                Err(format!(
                    "cannot start {} session for {}: {e}",
                    if recursive { "deep" } else { "shallow" },
                    root.display()
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn fake_clock(start: Instant) -> (MonotonicClock, Arc<Mutex<Instant>>) {
        let now = Arc::new(Mutex::new(start));
        let handle = Arc::clone(&now);
        let clock: MonotonicClock = Arc::new(move || *now.lock().unwrap());
        (clock, handle)
    }

    #[cfg(unix)]
    fn fake_monitor_script(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        // Emits one event line per invocation then idles like a monitor.
        let script = dir.join("fake-inotifywait.sh");
        std::fs::write(&script, "#!/bin/sh\necho \"watch CREATE title\"\nsleep 60\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test]
    async fn missing_tool_reports_tool_not_found() {
        let dir = TempDir::new().unwrap();
        let (clock, _) = fake_clock(Instant::now());
        let mut watcher = PersistentInotifyWatcher::with_program(
            "shelfmerge-test-no-such-monitor",
            vec![dir.path().to_path_buf()],
            Duration::from_secs(30),
            clock,
        );
        let warnings = watcher.start();
        assert!(!warnings.is_empty());

        let result = watcher.poll(Duration::from_millis(20)).await;
        assert_eq!(result.outcome, WatchPollOutcome::ToolNotFound);
        assert!(result.events.is_empty());
    }

    #[tokio::test]
    async fn retry_gate_holds_deep_sessions_until_backoff_elapses() {
        let dir = TempDir::new().unwrap();
        let start = Instant::now();
        let (clock, handle) = fake_clock(start);
        let backoff = Duration::from_secs(30);
        let mut watcher = PersistentInotifyWatcher::with_program(
            "shelfmerge-test-no-such-monitor",
            vec![dir.path().to_path_buf()],
            backoff,
            clock,
        );
        watcher.start();

        // First poll: the deep start is due immediately, fails, requeues.
        let first = watcher.poll(Duration::from_millis(10)).await;
        assert!(first.warnings.iter().any(|w| w.contains("deep")));

        // Second poll without advancing the clock: gate still closed.
        let second = watcher.poll(Duration::from_millis(10)).await;
        assert!(second.warnings.iter().all(|w| !w.contains("deep")));

        // Advance past the backoff: the deep start is retried.
        *handle.lock().unwrap() = start + backoff + Duration::from_secs(1);
        let third = watcher.poll(Duration::from_millis(10)).await;
        assert!(third.warnings.iter().any(|w| w.contains("deep")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn events_flow_from_sessions_to_poll() {
        let dir = TempDir::new().unwrap();
        let script = fake_monitor_script(dir.path());
        let (clock, _) = fake_clock(Instant::now());
        let mut watcher = PersistentInotifyWatcher::with_program(
            &script.display().to_string(),
            vec![dir.path().to_path_buf()],
            Duration::from_secs(30),
            clock,
        );
        let warnings = watcher.start();
        assert!(warnings.is_empty());

        let result = watcher.poll(Duration::from_secs(5)).await;
        assert_eq!(result.outcome, WatchPollOutcome::Success);
        assert!(!result.events.is_empty());
        assert!(result.events[0].line.contains("CREATE"));
        watcher.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stopped_sessions_are_requeued() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        // Exits immediately: every poll should notice and requeue.
        let script = dir.path().join("flaky-monitor.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let (clock, _) = fake_clock(Instant::now());
        let mut watcher = PersistentInotifyWatcher::with_program(
            &script.display().to_string(),
            vec![dir.path().to_path_buf()],
            Duration::from_secs(30),
            clock,
        );
        watcher.start();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let result = watcher.poll(Duration::from_millis(20)).await;
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.contains("stopped"))
        );
    }
}
