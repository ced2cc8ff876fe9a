use std::path::{Path, PathBuf};
use tracing::warn;

/// One source (or override) volume: a direct child directory of a configured
/// root. Its children are the title directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDir {
    pub source_name: String,
    pub path: PathBuf,
    pub from_override: bool,
}

#[derive(Debug, Default)]
pub struct DiscoveredVolumes {
    pub volumes: Vec<VolumeDir>,
    pub warnings: Vec<String>,
}

/// Enumerate source and override volumes.
///
/// Missing roots degrade to warnings: an unavailable disk must not abort the
/// pass, the titles it contributed simply drop out of the plan.
pub fn discover_volumes(sources_root: &Path, override_root: Option<&Path>) -> DiscoveredVolumes {
    let mut discovered = DiscoveredVolumes::default();
    scan_root(sources_root, false, &mut discovered);
    if let Some(root) = override_root {
        scan_root(root, true, &mut discovered);
    }
    discovered
}

fn scan_root(root: &Path, from_override: bool, out: &mut DiscoveredVolumes) {
    let kind = if from_override { "override" } else { "sources" };
    if !root.is_dir() {
        let message = format!("{kind} root not found: {}", root.display());
        warn!(event = "merge.workflow.root_missing", "{message}");
        out.warnings.push(message);
        return;
    }

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            let message = format!("{kind} root unreadable: {}: {e}", root.display());
            warn!(event = "merge.workflow.root_unreadable", "{message}");
            out.warnings.push(message);
            return;
        }
    };

    let mut volumes: Vec<VolumeDir> = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        volumes.push(VolumeDir {
            source_name: name.to_string(),
            path,
            from_override,
        });
    }
    // Directory iteration order is filesystem-dependent; sort for stable plans.
    volumes.sort_by(|a, b| a.source_name.cmp(&b.source_name));
    out.volumes.extend(volumes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_roots_warn_without_failing() {
        let discovered = discover_volumes(
            Path::new("/definitely/not/here"),
            Some(Path::new("/also/not/here")),
        );
        assert!(discovered.volumes.is_empty());
        assert_eq!(discovered.warnings.len(), 2);
    }

    #[test]
    fn discovers_sorted_volume_dirs() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("diskB")).unwrap();
        std::fs::create_dir(root.path().join("diskA")).unwrap();
        std::fs::create_dir(root.path().join(".trash")).unwrap();
        std::fs::write(root.path().join("stray-file"), "x").unwrap();

        let discovered = discover_volumes(root.path(), None);
        let names: Vec<&str> = discovered
            .volumes
            .iter()
            .map(|v| v.source_name.as_str())
            .collect();
        assert_eq!(names, vec!["diskA", "diskB"]);
        assert!(discovered.warnings.is_empty());
    }

    #[test]
    fn override_volumes_are_flagged() {
        let sources = TempDir::new().unwrap();
        let overrides = TempDir::new().unwrap();
        std::fs::create_dir(sources.path().join("diskA")).unwrap();
        std::fs::create_dir(overrides.path().join("local")).unwrap();

        let discovered = discover_volumes(sources.path(), Some(overrides.path()));
        assert_eq!(discovered.volumes.len(), 2);
        assert!(!discovered.volumes[0].from_override);
        assert!(discovered.volumes[1].from_override);
        assert_eq!(discovered.volumes[1].source_name, "local");
    }
}
