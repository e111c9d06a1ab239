use std::path::Path;

/// Base filename of a serialized path (everything after the last `/`).
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// Join a serialized filename onto a destination directory. Configuration
/// paths are plain strings on the wire, so this stays string-based rather
/// than round-tripping through `PathBuf`.
pub fn make_abs(dir: &Path, name: &str) -> String {
    format!("{}/{}", dir.display(), name)
}

/// Number of non-empty path segments. `/bb/data/mydb` has three,
/// `/data` has one.
pub fn path_depth(path: &Path) -> usize {
    path.to_string_lossy()
        .split('/')
        .filter(|seg| !seg.is_empty())
        .count()
}
