use crate::plan::MountPlan;
use crate::utils::paths::ensure_dir;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Materializes per-mount symlink staging directories.
///
/// For a plan with fingerprint `fp`, `<root>/<fp>/` holds one numbered
/// symlink per branch (`000_<source>`, `001_<source>`, ...), each pointing
/// at the branch's absolute source directory. The numbered order encodes the
/// union's search order; the link paths become the mergerfs branch list.
///
/// Every operation is idempotent and failures surface as warnings so one bad
/// link cannot abort a pass.
pub struct BranchLinkStager {
    root: PathBuf,
}

/// Result of staging one plan: the ordered link paths that will be handed to
/// the union tool, plus anything that went wrong on the way.
#[derive(Debug, Default)]
pub struct StagedLinks {
    pub link_dir: PathBuf,
    pub link_paths: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl BranchLinkStager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn link_dir(&self, fingerprint: &str) -> PathBuf {
        self.root.join(fingerprint)
    }

    pub fn stage(&self, plan: &MountPlan) -> StagedLinks {
        let link_dir = self.link_dir(&plan.fingerprint);
        let mut staged = StagedLinks {
            link_dir: link_dir.clone(),
            ..Default::default()
        };

        if let Err(e) = ensure_dir(&link_dir) {
            staged.warnings.push(format!(
                "cannot create staging directory {}: {e}",
                link_dir.display()
            ));
            return staged;
        }

        // Desired link name -> target
        let mut desired: HashMap<String, &Path> = HashMap::new();
        let mut ordered_names: Vec<String> = Vec::new();
        for (index, branch) in plan.branches.iter().enumerate() {
            let name = format!("{index:03}_{}", branch.source_name);
            desired.insert(name.clone(), &branch.path);
            ordered_names.push(name);
        }

        remove_undesired(&link_dir, &desired, &mut staged.warnings);

        for name in &ordered_names {
            let link_path = link_dir.join(name);
            let target = desired[name];
            if let Err(message) = ensure_link(&link_path, target) {
                staged.warnings.push(message);
            } else {
                staged.link_paths.push(link_path);
            }
        }

        debug!(
            fingerprint = %plan.fingerprint,
            links = staged.link_paths.len(),
            "Staged branch links"
        );
        staged
    }

    /// Remove staging directories whose fingerprint is no longer referenced.
    pub fn sweep_stale(&self, keep: &HashSet<String>) -> Vec<String> {
        let mut warnings = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            // A missing staging root just means nothing was ever staged.
            Err(_) => return warnings,
        };
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if keep.contains(name) || !path.is_dir() {
                continue;
            }
            if let Err(e) = std::fs::remove_dir_all(&path) {
                let message = format!("cannot remove stale staging {}: {e}", path.display());
                warn!(event = "merge.workflow.stage_sweep_failed", "{message}");
                warnings.push(message);
            } else {
                debug!(fingerprint = name, "Removed stale staging directory");
            }
        }
        warnings
    }
}

/// Create or fix one symlink. Existing links with the right target are left
/// untouched; wrong targets and stray files are replaced.
fn ensure_link(link_path: &Path, target: &Path) -> std::result::Result<(), String> {
    match std::fs::symlink_metadata(link_path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            match std::fs::read_link(link_path) {
                Ok(existing) if existing == target => return Ok(()),
                _ => {
                    std::fs::remove_file(link_path).map_err(|e| {
                        format!("cannot replace link {}: {e}", link_path.display())
                    })?;
                }
            }
        }
        Ok(meta) => {
            let removal = if meta.is_dir() {
                std::fs::remove_dir_all(link_path)
            } else {
                std::fs::remove_file(link_path)
            };
            removal.map_err(|e| {
                format!(
                    "cannot replace stray entry {}: {e}",
                    link_path.display()
                )
            })?;
        }
        Err(_) => {}
    }

    #[cfg(unix)]
    let made = std::os::unix::fs::symlink(target, link_path);
    #[cfg(not(unix))]
    let made = Err(std::io::Error::other("symlinks unsupported"));
    made.map_err(|e| {
        format!(
            "cannot link {} -> {}: {e}",
            link_path.display(),
            target.display()
        )
    })
}

fn remove_undesired(
    link_dir: &Path,
    desired: &HashMap<String, &Path>,
    warnings: &mut Vec<String>,
) {
    let Ok(entries) = std::fs::read_dir(link_dir) else {
        return;
    };
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if desired.contains_key(name) {
            continue;
        }
        let removal = if path.is_dir() && !path.is_symlink() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = removal {
            warnings.push(format!("cannot remove stale link {}: {e}", path.display()));
        }
    }
}
