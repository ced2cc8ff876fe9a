use crate::load_all;
use colored::Colorize;
use shelfmerge_core::daemon::ExitCode;
use shelfmerge_core::exec::CommandExecutor;
use shelfmerge_core::snapshot::MountSnapshotReader;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const UNION_FS_MARKER: &str = "mergerfs";

pub async fn execute(config_path: &std::path::Path, detailed: bool) -> ExitCode {
    let (settings, _documents) = match load_all(config_path) {
        Ok(loaded) => loaded,
        Err(exit) => return exit,
    };

    let reader = MountSnapshotReader::new(
        Arc::new(CommandExecutor::new()),
        settings.merged_root.clone(),
        settings.command_timeout(),
        settings.command_poll_interval(),
        settings.max_output_chars,
        settings.health_check_enabled,
    );
    let snapshot = reader.capture(&CancellationToken::new()).await;

    for warning in &snapshot.warnings {
        eprintln!("{} [{}] {}", "Warning:".yellow(), warning.code, warning.message);
    }

    let managed: Vec<_> = snapshot
        .entries
        .iter()
        .filter(|entry| {
            entry.mountpoint.starts_with(&settings.merged_root)
                && entry.fs_type.to_lowercase().contains(UNION_FS_MARKER)
        })
        .collect();

    if managed.is_empty() {
        println!(
            "No union mounts under {}",
            settings.merged_root.display().to_string().cyan()
        );
        return ExitCode::Success;
    }

    println!(
        "{} union mount(s) under {}",
        managed.len().to_string().green(),
        settings.merged_root.display().to_string().cyan()
    );
    for entry in managed {
        let health = match entry.healthy {
            Some(true) => "healthy".green(),
            Some(false) => "unhealthy".red(),
            None => "unchecked".normal(),
        };
        println!(
            "  {} {} ({})",
            entry.mountpoint.display().to_string().bold(),
            entry.source.dimmed(),
            health
        );
        if detailed {
            println!("    fstype:  {}", entry.fs_type);
            println!("    options: {}", entry.options);
            println!(
                "    links:   {}",
                settings.branch_links_root().join(&entry.source).display()
            );
        }
    }
    ExitCode::Success
}
