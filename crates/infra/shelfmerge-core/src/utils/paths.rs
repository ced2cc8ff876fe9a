use anyhow::Result;
use std::path::{Path, PathBuf};

/// Expand tilde (~) in paths to home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(home.join(stripped))
    } else if path_str == "~" {
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Canonical comparison key for a mountpoint path.
///
/// Trailing separators are stripped; on case-insensitive filesystems
/// (Windows) the key is lowercased. Derived from the platform once, so all
/// snapshot/plan comparisons agree on identity.
pub fn mountpoint_key(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let trimmed = if raw.len() > 1 {
        raw.trim_end_matches('/')
    } else {
        raw.as_ref()
    };
    if cfg!(windows) {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// Depth of a path, counted as the number of non-root components.
pub fn path_depth(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mountpoint_key_strips_trailing_slash() {
        assert_eq!(mountpoint_key(Path::new("/merged/Alpha/")), "/merged/Alpha");
        assert_eq!(mountpoint_key(Path::new("/merged/Alpha")), "/merged/Alpha");
        assert_eq!(mountpoint_key(Path::new("/")), "/");
    }

    #[cfg(unix)]
    #[test]
    fn mountpoint_key_is_case_sensitive_on_unix() {
        assert_ne!(
            mountpoint_key(Path::new("/merged/alpha")),
            mountpoint_key(Path::new("/merged/Alpha"))
        );
    }

    #[test]
    fn path_depth_counts_normal_components() {
        assert_eq!(path_depth(Path::new("/")), 0);
        assert_eq!(path_depth(Path::new("/merged")), 1);
        assert_eq!(path_depth(Path::new("/merged/Alpha/extra")), 3);
    }

    #[test]
    fn expand_path_passthrough_for_absolute() {
        let p = Path::new("/var/lib/shelfmerge");
        assert_eq!(expand_path(p).unwrap(), PathBuf::from("/var/lib/shelfmerge"));
    }
}
