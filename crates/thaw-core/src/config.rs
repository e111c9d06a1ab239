use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options for one restore run.
///
/// Destination directories are optional: when absent they are taken from the
/// first `dir` directive of the configuration file found in the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Destination for the rewritten configuration file. Defaults to the
    /// data directory once that is resolved.
    pub lrl_dest_dir: Option<PathBuf>,
    /// Destination for data files. Defaults to the directory recorded in
    /// the serialized configuration file.
    pub data_dest_dir: Option<PathBuf>,
    /// Comment out `cluster nodes` lines in the rewritten configuration.
    #[serde(default)]
    pub strip_cluster_info: bool,
    /// Comment out queue/procedure/consumer/ssl lines in the rewritten
    /// configuration.
    #[serde(default)]
    pub strip_consumer_info: bool,
    /// Run the external full-recovery command once files are materialized.
    /// The manifest can still disable this for support-file-only archives.
    #[serde(default = "default_true")]
    pub run_full_recovery: bool,
    /// The external recovery executable. `None` skips recovery even when
    /// requested.
    pub recovery_task: Option<String>,
    /// Abort when the destination filesystem would reach this used
    /// percentage.
    #[serde(default = "default_percent_full")]
    pub percent_full: u32,
    /// Writer threads per materialized file.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Continue past advisory consistency complaints (checksum flags,
    /// fingerprint mismatches) without upgrading them to errors.
    #[serde(default)]
    pub force: bool,
    /// The stream carries increment segments after the base image.
    #[serde(default)]
    pub incremental: bool,
    /// Write a completion sentinel file into the data directory when the
    /// restore finishes. A stale sentinel from a previous run is removed
    /// when the run starts.
    #[serde(default)]
    pub done_file: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            lrl_dest_dir: None,
            data_dest_dir: None,
            strip_cluster_info: false,
            strip_consumer_info: false,
            run_full_recovery: true,
            recovery_task: None,
            percent_full: default_percent_full(),
            threads: default_threads(),
            force: false,
            incremental: false,
            done_file: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_percent_full() -> u32 {
    95
}

fn default_threads() -> usize {
    4
}
