use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::paths::path_depth;

/// What destination-directory cleanup is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestDirState {
    /// Directory is empty (or absent): nothing to protect, cleanup is a
    /// no-op and the instance layout is created fresh.
    Empty,
    /// Directory has contents and is at least three segments deep, so stale
    /// files may be removed.
    CleanupAllowed,
    /// Directory has contents but is too shallow. Cleaning it risks
    /// deleting an unrelated tree (`/data`, `/`), so the restore must
    /// refuse outright.
    Refused,
}

/// Safety check gating destination cleanup. Only third-level or deeper
/// directories (e.g. `/bb/data/mydb`) may be cleaned; an empty directory
/// bypasses the check entirely.
pub fn check_dest_dir(dir: &Path) -> DestDirState {
    if is_empty_dir(dir) {
        return DestDirState::Empty;
    }
    if path_depth(dir) >= 3 {
        DestDirState::CleanupAllowed
    } else {
        DestDirState::Refused
    }
}

/// True when `dir` exists and has no entries, or does not exist at all.
pub fn is_empty_dir(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(_) => false,
    }
}

/// File names inside `dir`. A missing directory lists as empty.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names
}

pub fn make_dirs(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

/// Remove regular files in `dir`, leaving alone anything this run already
/// extracted. Individual unlink failures are logged, not fatal; a file that
/// cannot be removed will surface as a real error later if it matters.
pub fn remove_stale_files(dir: &Path, protected: &HashSet<PathBuf>) {
    for name in list_dir(dir) {
        let path = dir.join(&name);
        if protected.contains(&path) {
            continue;
        }
        if path.is_dir() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => info!("unlinked stale {}", path.display()),
            Err(e) => warn!("could not unlink {}: {}", path.display(), e),
        }
    }
}

/// Remove transaction log files (`log.NNNNNNNNNN`) from a log directory.
/// Used by incremental restores, which must never leave old log records to
/// be replayed against freshly patched pages.
pub fn remove_log_files(dir: &Path) {
    for name in list_dir(dir) {
        if name.len() == 14 && name.starts_with("log.") {
            let path = dir.join(&name);
            match std::fs::remove_file(&path) {
                Ok(()) => info!("unlinked log {}", path.display()),
                Err(e) => warn!("could not unlink {}: {}", path.display(), e),
            }
        }
    }
}

/// Apply permission bits from a block header to a restored file.
pub fn apply_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        let _ = mode;
        Ok(())
    }
}

/// Apply ownership from a block header. Requires privilege; failures are
/// expected for unprivileged restores and are the caller's to downgrade.
pub fn apply_owner(path: &Path, uid: u32, gid: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::unistd::{chown, Gid, Uid};
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        let _ = uid;
        let _ = gid;
        Ok(())
    }
}
