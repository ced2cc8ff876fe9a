use crate::discovery::VolumeDir;
use crate::naming::{EquivalenceService, SourcePriorityService, TitleNormalizer};
use crate::plan::types::{BranchEntry, MountPlan, fingerprint_branches, short_title_hash};
use crate::utils::paths::mountpoint_key;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Builds the desired set of union mounts from discovered volumes.
///
/// The output is a pure function of the input set: volumes and titles are
/// grouped through deterministic maps and every ordering is total, so
/// shuffling the discovered lists never changes the plan.
pub struct BranchPlanner {
    equivalence: Arc<EquivalenceService>,
    priority: Arc<SourcePriorityService>,
    normalizer: Arc<TitleNormalizer>,
    merged_root: PathBuf,
    excluded_sources: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct PlanOutput {
    pub plans: Vec<MountPlan>,
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct GroupAccum {
    canonical: Option<String>,
    /// Branch plus the raw title it came from (display fallback)
    branches: Vec<(BranchEntry, String)>,
}

impl BranchPlanner {
    pub fn new(
        equivalence: Arc<EquivalenceService>,
        priority: Arc<SourcePriorityService>,
        normalizer: Arc<TitleNormalizer>,
        merged_root: PathBuf,
        excluded_sources: &[String],
    ) -> Self {
        Self {
            equivalence,
            priority,
            normalizer,
            merged_root,
            excluded_sources: excluded_sources
                .iter()
                .map(|s| s.trim().to_lowercase())
                .collect(),
        }
    }

    pub fn plan(&self, volumes: &[VolumeDir]) -> PlanOutput {
        let mut output = PlanOutput::default();
        let mut groups: BTreeMap<String, GroupAccum> = BTreeMap::new();

        for volume in volumes {
            if self
                .excluded_sources
                .contains(&volume.source_name.trim().to_lowercase())
            {
                continue;
            }
            self.collect_volume(volume, &mut groups, &mut output.warnings);
        }

        let mut used_mountpoints: HashMap<String, String> = HashMap::new();
        for (group_key, mut group) in groups {
            group.branches.sort_by(|(a, _), (b, _)| {
                branch_sort_key(a).cmp(&branch_sort_key(b))
            });

            let display_title = group
                .canonical
                .clone()
                .unwrap_or_else(|| group.branches[0].1.trim().to_string());

            let mut name = sanitize_title(&display_title)
                .unwrap_or_else(|| format!("title-{}", short_title_hash(&group_key)));
            let mut mountpoint = self.merged_root.join(&name);
            if used_mountpoints.contains_key(&mountpoint_key(&mountpoint)) {
                name = format!("{name}-{}", short_title_hash(&group_key));
                mountpoint = self.merged_root.join(&name);
                warn!(
                    event = "merge.workflow.mountpoint_collision",
                    title = %display_title,
                    fallback = %name,
                    "Sanitized mountpoint collided, using hashed fallback"
                );
            }
            used_mountpoints.insert(mountpoint_key(&mountpoint), group_key);

            let branches: Vec<BranchEntry> =
                group.branches.into_iter().map(|(entry, _)| entry).collect();
            let paths: Vec<PathBuf> = branches.iter().map(|b| b.path.clone()).collect();
            output.plans.push(MountPlan {
                canonical_name: display_title,
                mountpoint,
                fingerprint: fingerprint_branches(&paths),
                branches,
            });
        }

        output.plans.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));
        output
    }

    fn collect_volume(
        &self,
        volume: &VolumeDir,
        groups: &mut BTreeMap<String, GroupAccum>,
        warnings: &mut Vec<String>,
    ) {
        let entries = match std::fs::read_dir(&volume.path) {
            Ok(entries) => entries,
            Err(e) => {
                let message = format!("volume unreadable: {}: {e}", volume.path.display());
                warn!(event = "merge.workflow.volume_unreadable", "{message}");
                warnings.push(message);
                return;
            }
        };

        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(raw_title) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            if raw_title.starts_with('.') {
                continue;
            }

            let canonical = self.equivalence.try_resolve_canonical(&raw_title);
            let key = match &canonical {
                Some(canonical) => self.normalizer.title_key(canonical),
                None => self.normalizer.title_key(&raw_title),
            };
            if key.is_empty() {
                warnings.push(format!(
                    "title '{raw_title}' in {} normalizes to nothing, skipping",
                    volume.source_name
                ));
                continue;
            }

            let group = groups.entry(key).or_default();
            if group.canonical.is_none() {
                group.canonical = canonical;
            }
            group.branches.push((
                BranchEntry {
                    path,
                    source_name: volume.source_name.clone(),
                    priority: self
                        .priority
                        .priority_or_default(&volume.source_name, usize::MAX),
                    from_override: volume.from_override,
                },
                raw_title,
            ));
        }
    }
}

/// Composite branch order: override before source, then priority rank, then
/// source name, then path. The single place priority is applied.
fn branch_sort_key(entry: &BranchEntry) -> (bool, usize, String, PathBuf) {
    (
        !entry.from_override,
        entry.priority,
        entry.source_name.clone(),
        entry.path.clone(),
    )
}

/// Deterministic mountpoint-name sanitization: trim, path separators and NUL
/// become underscores, whitespace runs collapse to single spaces. Reserved
/// names are rejected.
fn sanitize_title(name: &str) -> Option<String> {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect();

    let mut collapsed = String::with_capacity(replaced.len());
    let mut pending = false;
    for c in replaced.chars() {
        if c.is_whitespace() {
            pending = true;
        } else {
            if pending && !collapsed.is_empty() {
                collapsed.push(' ');
            }
            pending = false;
            collapsed.push(c);
        }
    }

    if collapsed.is_empty() || collapsed == "." || collapsed == ".." {
        None
    } else {
        Some(collapsed)
    }
}
