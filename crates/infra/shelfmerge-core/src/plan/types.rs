use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// One contributing directory of a union mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchEntry {
    /// Absolute source directory path
    pub path: PathBuf,
    pub source_name: String,
    /// Lower rank = higher priority; unknown sources carry `usize::MAX`
    pub priority: usize,
    pub from_override: bool,
}

/// Desired state of one union mount: where it goes and what feeds it.
///
/// The fingerprint is the mount's identity: it is embedded as the mergerfs
/// `fsname` so a snapshot row can be attributed back to its branch plan, and
/// it changes whenever the ordered branch set changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPlan {
    pub canonical_name: String,
    pub mountpoint: PathBuf,
    pub branches: Vec<BranchEntry>,
    pub fingerprint: String,
}

impl MountPlan {
    pub fn branch_paths(&self) -> Vec<PathBuf> {
        self.branches.iter().map(|b| b.path.clone()).collect()
    }
}

/// First 16 hex chars of a SHA-256 over the ordered branch paths joined by
/// newlines. A function of the ordered tuple only.
pub fn fingerprint_branches(paths: &[PathBuf]) -> String {
    let mut hasher = Sha256::new();
    let joined = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

/// Short stable hash used for mountpoint-name fallbacks.
pub fn short_title_hash(title_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title_key.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 8)
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in digest {
        for nibble in [byte >> 4, byte & 0xf] {
            if out.len() == chars {
                return out;
            }
            out.push(char::from_digit(u32::from(nibble), 16).unwrap_or('0'));
        }
    }
    out
}
