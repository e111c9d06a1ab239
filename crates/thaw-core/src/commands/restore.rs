use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::block::{self, BlockHeader, BLOCK_SIZE};
use crate::config::RestoreOptions;
use crate::context::RestoreContext;
use crate::error::{Result, ThawError};
use crate::increment;
use crate::lrl::rewrite_lrl;
use crate::manifest::{parse_manifest, recognize_data_file, FileInfo, FileKind};
use crate::materialize::{materialize, MaterializeParams};
use crate::platform::fs::{self, DestDirState};
use crate::recovery;
use crate::stream::ArchiveSource;

/// Completion sentinel written into the data directory when the caller
/// requests one. A stale sentinel from a previous run is removed before any
/// file is restored.
pub const DONE_FILE: &str = "DONE";

/// What a finished restore produced.
#[derive(Debug)]
pub struct RestoreReport {
    pub db_name: String,
    pub data_dir: PathBuf,
    pub lrl_path: PathBuf,
    pub tables: Vec<String>,
    pub files_restored: u64,
    pub bytes_written: u64,
    pub increments_applied: u64,
}

/// Run a full restore from the serialized stream.
///
/// Reads blocks sequentially, classifies each against the manifest, and
/// dispatches: textual configuration files are rewritten for the new
/// layout, binary files go through the concurrent materializer, and (in
/// incremental mode) increment segments are applied after the base image.
///
/// On error the in-progress marker and any partial files are left in place
/// deliberately so an operator can diagnose the failure; there is no
/// automatic rollback.
pub fn run<R: Read + Send>(input: R, opts: &RestoreOptions) -> Result<RestoreReport> {
    let mut ctx = RestoreContext::new(opts);
    let mut source = ArchiveSource::new(input);

    let mut marker: Option<PathBuf> = None;
    let mut initialized = false;
    let mut manifest_seen = false;
    let mut files_restored: u64 = 0;
    let mut bytes_written: u64 = 0;

    let mut raw = [0u8; BLOCK_SIZE];
    loop {
        if !source.read_block(&mut raw)? {
            return Err(ThawError::BadBlock(format!(
                "archive ended without a terminator at offset {}",
                source.offset()
            )));
        }
        let Some(header) = block::decode(&raw)? else {
            break; // base image complete
        };

        let filename = header.filename.clone();
        let padding = header.padding();

        if filename.ends_with(".sha") {
            let text = source.read_text(header.size)?;
            source.skip(padding)?;
            ctx.sha_fingerprint = Some(text.trim().to_string());
            info!("recorded content fingerprint from {}", filename);
            continue;
        }

        if filename == "MANIFEST" {
            let text = source.read_text(header.size)?;
            source.skip(padding)?;
            if manifest_seen {
                warn!("ignoring repeated MANIFEST block");
                continue;
            }
            manifest_seen = true;
            let summary = parse_manifest(&text);
            ctx.manifest = summary.files;
            if summary.support_files_only {
                // Sources-only archive; nothing for recovery to do.
                ctx.run_full_recovery = false;
            }
            if summary.orig_lrl_name.is_some() {
                ctx.orig_lrl_name = summary.orig_lrl_name;
            }
            ctx.options.extend(summary.options);
            continue;
        }

        if filename.ends_with(".lrl") {
            let text = source.read_text(header.size)?;
            source.skip(padding)?;
            let rewritten = rewrite_lrl(&filename, &text, opts, &mut ctx)?;

            if ctx.db_name.is_none() {
                return Err(ThawError::Other(format!(
                    "{} did not provide a database name",
                    filename
                )));
            }
            if ctx.data_dir.is_none() {
                return Err(ThawError::Other(format!(
                    "{} did not provide a data directory and none was pinned",
                    filename
                )));
            }
            if !initialized {
                marker = Some(init_destination(&mut ctx, opts)?);
                initialized = true;
            }

            // The serializer may have renamed the primary configuration
            // file; the first one restored gets its original name back.
            let out_name = match (&ctx.orig_lrl_name, &ctx.main_lrl) {
                (Some(orig), None) => orig.clone(),
                _ => filename.clone(),
            };
            let lrl_dir = ctx.lrl_dir.clone().expect("resolved at init");
            let out_path = lrl_dir.join(&out_name);
            std::fs::write(&out_path, rewritten.as_bytes())?;
            apply_header_perms(&out_path, &header);
            ctx.record_extracted(&out_path);
            if ctx.main_lrl.is_none() {
                ctx.main_lrl = Some(out_path);
            }
            files_restored += 1;
            info!("x {} size={}", filename, header.size);
            continue;
        }

        // Binary file. Table names can be discovered from bare data file
        // names even when no directive lists them.
        if !filename.contains('/') {
            if let Some(table) = recognize_data_file(&filename) {
                if ctx.tables.insert(table.to_string()) {
                    info!("discovered table {} from data file {}", table, filename);
                }
            }
        }

        if !initialized {
            return Err(ThawError::Other(format!(
                "archive contains data file {} before the destination directory is known",
                filename
            )));
        }

        let data_dir = ctx.data_dir.clone().expect("resolved at init");
        let file_info = ctx
            .manifest
            .get(&filename)
            .cloned()
            .unwrap_or_else(|| FileInfo::plain(&filename));
        if file_info.checksums {
            debug!(
                "{}: producer recorded page checksums (not verified on restore)",
                filename
            );
        }
        if file_info.kind == FileKind::BerkeleyStore {
            debug!("{}: berkeley store file", filename);
        }

        let dest_path = data_dir.join(&filename);
        let params = MaterializeParams {
            filename: &filename,
            dest_dir: &data_dir,
            dest_path: &dest_path,
            size: header.size,
            page_size: file_info.page_size as usize,
            sparse: file_info.sparse,
            workers: opts.threads,
            percent_full: opts.percent_full,
        };
        let written = materialize(&mut source, padding, &params)?;
        apply_header_perms(&dest_path, &header);
        ctx.record_extracted(&dest_path);
        files_restored += 1;
        bytes_written += written;
        info!(
            "x {} size={} pagesize={}{}",
            filename,
            header.size,
            file_info.page_size_or_default(),
            if file_info.sparse { " sparse" } else { "" }
        );
    }

    if !initialized {
        return Err(ThawError::Other(
            "no valid configuration file seen in archive".into(),
        ));
    }

    let mut increments_applied: u64 = 0;
    if opts.incremental {
        info!("base image complete, applying increments");
        while increment::apply_segment(&mut source, &mut ctx, opts)? {
            increments_applied += 1;
        }
    }

    finalize(&ctx, opts, marker.as_deref())?;

    let db_name = ctx.db_name.clone().expect("resolved at init");
    let data_dir = ctx.data_dir.clone().expect("resolved at init");
    let lrl_path = ctx
        .main_lrl
        .clone()
        .expect("a configuration file was restored");

    Ok(RestoreReport {
        db_name,
        data_dir,
        lrl_path,
        tables: ctx.tables.iter().cloned().collect(),
        files_restored,
        bytes_written,
        increments_applied,
    })
}

/// Entry actions for the point where both the database name and the data
/// directory are known: destination layout creation, stale cleanup behind
/// the safety guard, and the in-progress marker.
fn init_destination(ctx: &mut RestoreContext, opts: &RestoreOptions) -> Result<PathBuf> {
    let data_dir = ctx.data_dir.clone().expect("directory known");
    let db_name = ctx.db_name.clone().expect("directory known");

    if !data_dir.is_absolute() {
        return Err(ThawError::DestDir(format!(
            "cannot restore into {} - destination directory must be an absolute path",
            data_dir.display()
        )));
    }

    let lrl_dir = match &ctx.lrl_dir {
        Some(dir) => dir.clone(),
        None => {
            ctx.lrl_dir = Some(data_dir.clone());
            data_dir.clone()
        }
    };

    fs::make_dirs(&lrl_dir)?;
    fs::make_dirs(&data_dir)?;

    // Decide what cleanup is allowed BEFORE this run drops any file of its
    // own into the destination.
    let state = fs::check_dest_dir(&data_dir);

    if opts.done_file {
        let _ = std::fs::remove_file(data_dir.join(DONE_FILE));
    }

    // The marker says "a restore started here and has not finished". It is
    // removed in the Done state and left behind on failure.
    let marker = lrl_dir.join(format!("{}.copylock", db_name));
    let _ = std::fs::remove_file(&marker);
    std::fs::File::create(&marker).map_err(|e| {
        ThawError::Other(format!(
            "error creating restore marker {}: {}",
            marker.display(),
            e
        ))
    })?;

    let txn_dir = data_dir.join(format!("{}.txn", db_name));
    let logs_dir = data_dir.join("logs");
    match state {
        DestDirState::Empty => {
            fs::make_dirs(&txn_dir)?;
            fs::make_dirs(&logs_dir)?;
        }
        DestDirState::CleanupAllowed => {
            fs::make_dirs(&txn_dir)?;
            fs::make_dirs(&logs_dir)?;
            if !opts.incremental {
                // Transaction logs from whatever lived here before must
                // not be replayed against the files this run writes.
                fs::remove_stale_files(&txn_dir, &ctx.extracted);
                fs::remove_stale_files(&logs_dir, &ctx.extracted);
            }
        }
        DestDirState::Refused => {
            return Err(ThawError::DestDir(format!(
                "refusing to clean destination {} - fewer than three path segments",
                data_dir.display()
            )));
        }
    }

    Ok(marker)
}

/// Done-state actions: external recovery, marker removal, empty transaction
/// directory removal, completion sentinel.
fn finalize(ctx: &RestoreContext, opts: &RestoreOptions, marker: Option<&Path>) -> Result<()> {
    let db_name = ctx.db_name.as_deref().expect("resolved at init");
    let data_dir = ctx.data_dir.as_deref().expect("resolved at init");

    if ctx.run_full_recovery && opts.run_full_recovery {
        let lrl_path = ctx
            .main_lrl
            .as_deref()
            .ok_or_else(|| ThawError::Other("no configuration file was restored".into()))?;
        match &opts.recovery_task {
            Some(task) => recovery::run_full_recovery(task, db_name, lrl_path, &ctx.options)?,
            None => info!("full recovery requested but no recovery task configured; skipping"),
        }
    }

    if let Some(marker) = marker {
        let _ = std::fs::remove_file(marker);
    }

    // An instance without tables keeps no transaction directory.
    let txn_dir = data_dir.join(format!("{}.txn", db_name));
    if fs::is_empty_dir(&txn_dir) {
        let _ = std::fs::remove_dir(&txn_dir);
    }

    if opts.done_file {
        let sentinel = data_dir.join(DONE_FILE);
        std::fs::write(&sentinel, b"")?;
        info!("wrote completion sentinel {}", sentinel.display());
    }

    Ok(())
}

fn apply_header_perms(path: &Path, header: &BlockHeader) {
    if header.mode != 0 {
        if let Err(e) = fs::apply_mode(path, header.mode) {
            warn!("could not set mode on {}: {}", path.display(), e);
        }
    }
    // Needs privilege; failing is normal for unprivileged restores.
    if let Err(e) = fs::apply_owner(path, header.uid, header.gid) {
        debug!("could not set owner on {}: {}", path.display(), e);
    }
}
