use crate::load_all;
use colored::Colorize;
use shelfmerge_core::daemon::ExitCode;
use shelfmerge_core::workflow::MergePassOrchestrator;

pub fn show(config_path: &std::path::Path, json: bool) -> ExitCode {
    let (settings, _documents) = match load_all(config_path) {
        Ok(loaded) => loaded,
        Err(exit) => return exit,
    };

    let rendered = if json {
        serde_json::to_string_pretty(&settings).map_err(|e| e.to_string())
    } else {
        serde_yaml::to_string(&settings).map_err(|e| e.to_string())
    };
    match rendered {
        Ok(text) => {
            println!("{text}");
            ExitCode::Success
        }
        Err(message) => {
            eprintln!("Error: {message}");
            ExitCode::Failure
        }
    }
}

/// Run the same construction-time validation the daemon runs: settings
/// invariants plus equivalence/priority conflict detection.
pub fn validate(config_path: &std::path::Path) -> ExitCode {
    let (settings, documents) = match load_all(config_path) {
        Ok(loaded) => loaded,
        Err(exit) => return exit,
    };

    match MergePassOrchestrator::new(&settings, &documents) {
        Ok(_) => {
            println!(
                "{} configuration at {} is valid",
                "✓".green(),
                config_path.display()
            );
            println!(
                "  equivalence groups: {}",
                documents.equivalents.groups.len()
            );
            println!("  scene tags:         {}", documents.scene_tags.tags.len());
            println!(
                "  prioritized sources: {}",
                documents.source_priority.sources.len()
            );
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{} {e}", "✗".red());
            ExitCode::from_error(&e)
        }
    }
}
