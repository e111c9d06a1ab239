use std::path::Path;

use crate::error::Result;

/// How many bytes may be written between filesystem re-checks. A slowly
/// filling disk must be caught mid-file, not only at file boundaries.
pub const SPACE_RECHECK_BYTES: u64 = 10 * 1024 * 1024;

/// Fail if writing `pending_bytes` into `dest_dir` would bring the
/// filesystem to or past `percent_full` used.
#[cfg(unix)]
pub fn check_space(
    dest_dir: &Path,
    percent_full: u32,
    filename: &str,
    pending_bytes: u64,
) -> Result<()> {
    use crate::error::ThawError;

    let stat = nix::sys::statvfs::statvfs(dest_dir).map_err(|e| ThawError::Statvfs {
        dir: dest_dir.display().to_string(),
        source: std::io::Error::from_raw_os_error(e as i32),
    })?;

    let block_size = stat.block_size().max(1);
    let pending_blocks = pending_bytes / block_size as u64;
    let percent_free = 100.0 * (stat.blocks_available() as f64 - pending_blocks as f64)
        / (stat.blocks() as f64).max(1.0);

    if 100.0 - percent_free >= percent_full as f64 {
        return Err(ThawError::DiskFull {
            filename: filename.to_string(),
            bytes: pending_bytes,
            percent_free,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_space(
    _dest_dir: &Path,
    _percent_full: u32,
    _filename: &str,
    _pending_bytes: u64,
) -> Result<()> {
    Ok(())
}
