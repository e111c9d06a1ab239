use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::config::RestoreOptions;
use crate::manifest::FileInfo;

/// Mutable accumulator for one restore run.
///
/// Owned by the orchestrator and passed by reference to collaborators; there
/// is no process-global restore state.
#[derive(Debug, Default)]
pub struct RestoreContext {
    /// Destination for the rewritten configuration file. Resolved when the
    /// data directory is known.
    pub lrl_dir: Option<PathBuf>,
    /// Destination for data files. Pinned by the caller or taken from the
    /// first `dir` directive seen.
    pub data_dir: Option<PathBuf>,
    /// Database name from the first `name` directive seen.
    pub db_name: Option<String>,
    /// Tables discovered from configuration directives and data file names.
    pub tables: BTreeSet<String>,
    /// Absolute paths already written by this run. Stale-file cleanup must
    /// never delete anything in this set.
    pub extracted: HashSet<PathBuf>,
    /// Option tokens forwarded verbatim to the external recovery command.
    pub options: Vec<String>,
    /// Original name of the primary configuration file, when the serializer
    /// renamed it.
    pub orig_lrl_name: Option<String>,
    /// The rewritten primary configuration file, once written.
    pub main_lrl: Option<PathBuf>,
    /// Content fingerprint from a `.sha` block, kept for comparison against
    /// increment manifests.
    pub sha_fingerprint: Option<String>,
    /// Cleared by a `SupportFilesOnly` manifest directive.
    pub run_full_recovery: bool,
    /// Per-file metadata from the manifest block. Built once, read-only
    /// afterwards.
    pub manifest: HashMap<String, FileInfo>,
}

impl RestoreContext {
    pub fn new(opts: &RestoreOptions) -> Self {
        // A caller that pins only the configuration directory implicitly
        // pins the data directory too.
        let data_dir = opts
            .data_dest_dir
            .as_deref()
            .or(opts.lrl_dest_dir.as_deref())
            .map(normalize_dir);

        Self {
            lrl_dir: opts.lrl_dest_dir.as_deref().map(normalize_dir),
            data_dir,
            run_full_recovery: true,
            ..Self::default()
        }
    }

    /// Record a freshly written absolute path so later cleanup passes leave
    /// it alone.
    pub fn record_extracted(&mut self, path: &Path) {
        self.extracted.insert(path.to_path_buf());
    }
}

fn normalize_dir(dir: &Path) -> PathBuf {
    let s = dir.to_string_lossy();
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}
