use crate::error::Result;
use crate::utils::paths::ensure_dir;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Open (creating if needed) the single-instance lock file.
///
/// The caller acquires the advisory write lock with `try_write`; holding it
/// for the process lifetime is what makes the daemon single-instance. The
/// staging root is exclusively owned under the same lock.
pub fn open_lock_file(path: &Path) -> Result<fd_lock::RwLock<File>> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    Ok(fd_lock::RwLock::new(file))
}
