use crate::error::{MergeError, Result};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One subprocess invocation: what to run and how long to supervise it.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Per-stream cap on captured output; the rest is drained and dropped.
    pub max_output_chars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    NonZeroExit,
    TimedOut,
    Cancelled,
    StartFailed,
}

impl CommandOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::NonZeroExit => "NonZeroExit",
            Self::TimedOut => "TimedOut",
            Self::Cancelled => "Cancelled",
            Self::StartFailed => "StartFailed",
        }
    }
}

/// Why a spawn failed, when it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnFailureKind {
    None,
    ToolNotFound,
    PermissionDenied,
    Other,
}

#[derive(Debug)]
pub struct CommandResult {
    pub outcome: CommandOutcome,
    pub failure: SpawnFailureKind,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub elapsed: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.outcome == CommandOutcome::Success
    }
}

/// Runs external tools with bounded output capture, timeout and
/// cancellation.
///
/// Subprocess failure is never an `Err`: every spawned (or unspawnable)
/// command yields a `CommandResult`. `Err` is reserved for invalid
/// requests.
#[derive(Debug, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        validate(request)?;
        let started = Instant::now();

        // Never spawn after cancellation has been requested.
        if cancel.is_cancelled() {
            return Ok(interrupted(CommandOutcome::Cancelled, started));
        }

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        debug!(
            program = %request.program,
            args = ?request.args,
            "Spawning command"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let failure = classify_spawn_error(&e);
                warn!(
                    event = "exec.start_failed",
                    program = %request.program,
                    error = %e,
                    "Command failed to start"
                );
                return Ok(CommandResult {
                    outcome: CommandOutcome::StartFailed,
                    failure,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    stdout_truncated: false,
                    stderr_truncated: false,
                    elapsed: started.elapsed(),
                });
            }
        };

        let pid = child.id();
        let cap = request.max_output_chars;
        let stdout_task = tokio::spawn(read_bounded(child.stdout.take(), cap));
        let stderr_task = tokio::spawn(read_bounded(child.stderr.take(), cap));

        let deadline = started + request.timeout;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                () = cancel.cancelled() => {
                    kill_child_tree(pid);
                    let _ = child.wait().await;
                    let (stdout, stdout_truncated) = join_capture(stdout_task).await;
                    let (stderr, stderr_truncated) = join_capture(stderr_task).await;
                    return Ok(CommandResult {
                        outcome: CommandOutcome::Cancelled,
                        failure: SpawnFailureKind::None,
                        exit_code: None,
                        stdout,
                        stderr,
                        stdout_truncated,
                        stderr_truncated,
                        elapsed: started.elapsed(),
                    });
                }
                () = tokio::time::sleep(request.poll_interval) => {
                    if Instant::now() >= deadline {
                        kill_child_tree(pid);
                        let _ = child.wait().await;
                        let (stdout, stdout_truncated) = join_capture(stdout_task).await;
                        let (stderr, stderr_truncated) = join_capture(stderr_task).await;
                        return Ok(CommandResult {
                            outcome: CommandOutcome::TimedOut,
                            failure: SpawnFailureKind::None,
                            exit_code: None,
                            stdout,
                            stderr,
                            stdout_truncated,
                            stderr_truncated,
                            elapsed: started.elapsed(),
                        });
                    }
                }
            }
        };

        let (stdout, stdout_truncated) = join_capture(stdout_task).await;
        let (stderr, stderr_truncated) = join_capture(stderr_task).await;

        match status {
            Ok(status) => Ok(CommandResult {
                outcome: if status.success() {
                    CommandOutcome::Success
                } else {
                    CommandOutcome::NonZeroExit
                },
                failure: SpawnFailureKind::None,
                exit_code: status.code(),
                stdout,
                stderr,
                stdout_truncated,
                stderr_truncated,
                elapsed: started.elapsed(),
            }),
            // wait() failing after a successful spawn is an OS-level oddity;
            // surface it as a start failure rather than a panic or an Err.
            Err(e) => Ok(CommandResult {
                outcome: CommandOutcome::StartFailed,
                failure: SpawnFailureKind::Other,
                exit_code: None,
                stdout,
                stderr: e.to_string(),
                stdout_truncated,
                stderr_truncated,
                elapsed: started.elapsed(),
            }),
        }
    }
}

fn validate(request: &CommandRequest) -> Result<()> {
    if request.program.trim().is_empty() {
        return Err(MergeError::InvalidInput {
            message: "command program must not be empty".to_string(),
        });
    }
    if request.timeout.is_zero() {
        return Err(MergeError::InvalidInput {
            message: "command timeout must be positive".to_string(),
        });
    }
    if request.poll_interval.is_zero() {
        return Err(MergeError::InvalidInput {
            message: "command poll interval must be positive".to_string(),
        });
    }
    if request.max_output_chars == 0 {
        return Err(MergeError::InvalidInput {
            message: "max_output_chars must be positive".to_string(),
        });
    }
    Ok(())
}

fn interrupted(outcome: CommandOutcome, started: Instant) -> CommandResult {
    CommandResult {
        outcome,
        failure: SpawnFailureKind::None,
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        stdout_truncated: false,
        stderr_truncated: false,
        elapsed: started.elapsed(),
    }
}

fn classify_spawn_error(e: &std::io::Error) -> SpawnFailureKind {
    match e.kind() {
        std::io::ErrorKind::NotFound => SpawnFailureKind::ToolNotFound,
        std::io::ErrorKind::PermissionDenied => SpawnFailureKind::PermissionDenied,
        _ => SpawnFailureKind::Other,
    }
}

/// Kill the child and its descendants. The child was spawned as its own
/// process group leader, so the group id equals its pid.
fn kill_child_tree(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Read a stream to EOF, keeping at most `cap` bytes. Draining past the cap
/// keeps the child from blocking on a full pipe.
async fn read_bounded<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> (String, bool) {
    let Some(mut reader) = reader else {
        return (String::new(), false);
    };
    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = (cap - buf.len()).min(n);
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (String::from_utf8_lossy(&buf).into_owned(), truncated)
}

async fn join_capture(task: tokio::task::JoinHandle<(String, bool)>) -> (String, bool) {
    task.await.unwrap_or_else(|_| (String::new(), false))
}
