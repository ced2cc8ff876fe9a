use crate::load_all;
use shelfmerge_core::daemon::{ExitCode, open_lock_file};
use shelfmerge_core::platform::check_environment;
use shelfmerge_core::workflow::{MergePassOrchestrator, MergePassOutcome, MergeReason};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// One-shot pass. Takes the same single-instance lock as the daemon: the
/// mountpoint namespace and staging root cannot be shared.
pub async fn execute(config_path: &Path, force: bool) -> ExitCode {
    let (settings, documents) = match load_all(config_path) {
        Ok(loaded) => loaded,
        Err(exit) => return exit,
    };

    if let Err(e) = check_environment() {
        eprintln!("Error: {e}");
        return ExitCode::from_error(&e);
    }

    let mut lock = match open_lock_file(&settings.lock_path()) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from_error(&e);
        }
    };
    let guard = match lock.try_write() {
        Ok(guard) => guard,
        Err(_) => {
            eprintln!(
                "Error: daemon already running (lock held at {})",
                settings.lock_path().display()
            );
            return ExitCode::AlreadyRunning;
        }
    };

    let orchestrator = match MergePassOrchestrator::new(&settings, &documents) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from_error(&e);
        }
    };

    let outcome = orchestrator
        .run_merge_pass(MergeReason::Manual, force, &CancellationToken::new())
        .await;
    drop(guard);

    println!("Merge pass finished: {}", outcome.as_str());
    match outcome {
        MergePassOutcome::Success | MergePassOutcome::NoWork => ExitCode::Success,
        _ => ExitCode::Failure,
    }
}
