use crate::load_all;
use shelfmerge_core::daemon::{DaemonSupervisor, ExitCode};
use shelfmerge_core::platform::check_environment;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn execute(config_path: &Path) -> ExitCode {
    let (settings, documents) = match load_all(config_path) {
        Ok(loaded) => loaded,
        Err(exit) => return exit,
    };

    if let Err(e) = check_environment() {
        eprintln!("Error: {e}");
        return ExitCode::from_error(&e);
    }

    let mut supervisor = match DaemonSupervisor::new(settings, &documents) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from_error(&e);
        }
    };
    supervisor.run(CancellationToken::new()).await
}
