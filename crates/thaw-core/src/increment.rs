use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Read;
use std::path::Path;

use tracing::{info, warn};

use crate::block::{self, BLOCK_SIZE};
use crate::config::RestoreOptions;
use crate::context::RestoreContext;
use crate::error::{Result, ThawError};
use crate::manifest::{parse_file_attrs, strip_comment, FileInfo};
use crate::materialize::{materialize, write_at, MaterializeParams};
use crate::platform::fs;
use crate::stream::ArchiveSource;

/// A byte range to overwrite in an existing file. The bytes themselves
/// arrive later, in `.data` payload blocks, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    pub offset: u64,
    pub len: u64,
}

/// One increment segment's manifest: which files are new, gone, or patched,
/// and in what order the patch payload is laid out.
#[derive(Debug, Default)]
pub struct IncrementManifest {
    pub updated: HashMap<String, (FileInfo, Vec<Patch>)>,
    pub new_files: HashMap<String, FileInfo>,
    pub deleted: HashSet<String>,
    /// Payload processing order. Patch bytes in `.data` blocks follow this
    /// order, not stream arrival order.
    pub file_order: Vec<String>,
    pub options: Vec<String>,
    pub fingerprint: Option<String>,
}

/// Decode an `INCR_MANIFEST` block.
///
/// Unlike the base manifest, unknown directives here are fatal: an
/// increment describes destructive edits to an existing instance, and
/// skipping a directive we do not understand could corrupt it.
pub fn parse_increment_manifest(text: &str) -> Result<IncrementManifest> {
    let mut m = IncrementManifest::default();

    for (idx, raw_line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let err =
            |msg: String| ThawError::Increment(format!("INCR_MANIFEST line {}: {}", lineno, msg));

        let line = strip_comment(raw_line);
        let mut tokens = line.split_whitespace();
        let Some(directive) = tokens.next() else {
            continue;
        };

        match directive {
            "Updated" => {
                let info = parse_file_attrs(&mut tokens)
                    .ok_or_else(|| err("bad Updated directive".into()))?;
                m.file_order.push(info.filename.clone());
                m.updated.insert(info.filename.clone(), (info, Vec::new()));
            }
            "New" => {
                let info =
                    parse_file_attrs(&mut tokens).ok_or_else(|| err("bad New directive".into()))?;
                m.file_order.push(info.filename.clone());
                m.new_files.insert(info.filename.clone(), info);
            }
            "Patch" => {
                let name = tokens
                    .next()
                    .ok_or_else(|| err("Patch directive without a filename".into()))?;
                let offset: u64 = tokens
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| err(format!("bad Patch offset for {}", name)))?;
                let len: u64 = tokens
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| err(format!("bad Patch length for {}", name)))?;
                let entry = m
                    .updated
                    .get_mut(name)
                    .ok_or_else(|| err(format!("Patch for undeclared file {}", name)))?;
                entry.1.push(Patch { offset, len });
            }
            "Deleted" => {
                let name = tokens
                    .next()
                    .ok_or_else(|| err("Deleted directive without a filename".into()))?;
                m.deleted.insert(name.to_string());
            }
            "Option" => {
                m.options.extend(tokens.map(str::to_string));
            }
            "Fingerprint" => {
                let fp = tokens
                    .next()
                    .ok_or_else(|| err("Fingerprint directive without a value".into()))?;
                m.fingerprint = Some(fp.to_string());
            }
            other => {
                return Err(err(format!("unknown directive '{}'", other)));
            }
        }
    }

    Ok(m)
}

/// Tracks patch-application progress across `.data` blocks. Patches for one
/// file may be split over several payload blocks; this cursor carries the
/// partial state between them.
#[derive(Debug, Default)]
struct PatchCursor {
    file_idx: usize,
    patch_idx: usize,
    /// Bytes of the current patch already applied.
    done: u64,
}

/// Apply one increment segment from the stream against the restored base.
///
/// Returns `Ok(false)` when the stream ended cleanly before a segment
/// (there are no more increments), `Ok(true)` after a full segment was
/// applied. A stream that ends inside a segment is corrupt.
pub fn apply_segment<R: Read + Send>(
    source: &mut ArchiveSource<R>,
    ctx: &mut RestoreContext,
    opts: &RestoreOptions,
) -> Result<bool> {
    let mut raw = [0u8; BLOCK_SIZE];
    if !source.read_block(&mut raw)? {
        return Ok(false);
    }
    let Some(header) = block::decode(&raw)? else {
        // A trailing terminator after the last segment also means done.
        return Ok(false);
    };
    if header.filename != "INCR_MANIFEST" {
        return Err(ThawError::Increment(format!(
            "expected INCR_MANIFEST at start of segment, found '{}'",
            header.filename
        )));
    }

    let text = source.read_text(header.size)?;
    source.skip(header.padding())?;
    let manifest = parse_increment_manifest(&text)?;

    if let (Some(base), Some(inc)) = (&ctx.sha_fingerprint, &manifest.fingerprint) {
        if base != inc {
            warn!(
                "increment fingerprint {} does not match base fingerprint {}",
                inc, base
            );
        }
    }

    let data_dir = ctx
        .data_dir
        .clone()
        .ok_or_else(|| ThawError::Increment("data directory unknown".into()))?;
    let db_name = ctx
        .db_name
        .clone()
        .ok_or_else(|| ThawError::Increment("database name unknown".into()))?;

    // Old log records must never be replayed against freshly patched
    // pages.
    fs::remove_log_files(&data_dir.join("logs"));
    fs::remove_log_files(&data_dir.join(format!("{}.txn", db_name)));

    for name in &manifest.deleted {
        let path = data_dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => info!("deleted {}", path.display()),
            Err(e) => warn!("could not delete {}: {}", path.display(), e),
        }
    }

    let mut cursor = PatchCursor::default();

    loop {
        if !source.read_block(&mut raw)? {
            return Err(ThawError::Increment(
                "stream ended inside an increment segment".into(),
            ));
        }
        let Some(h) = block::decode(&raw)? else {
            break;
        };
        let padding = h.padding();

        if is_patch_payload(&h.filename) {
            apply_patch_payload(source, h.size, &manifest, &mut cursor, &data_dir)?;
            source.skip(padding)?;
        } else if manifest.deleted.contains(&h.filename) {
            warn!("segment carries content for deleted file {}", h.filename);
            source.skip(h.size + padding)?;
        } else {
            // New files and support files arrive in full. A file declared
            // as updated can also arrive in full; its content is
            // authoritative and any later patches still apply on top.
            if manifest.updated.contains_key(&h.filename) {
                warn!("updated file {} arrived with full content", h.filename);
            }
            let file_info = manifest
                .new_files
                .get(&h.filename)
                .cloned()
                .or_else(|| manifest.updated.get(&h.filename).map(|(i, _)| i.clone()))
                .unwrap_or_else(|| FileInfo::plain(&h.filename));

            let dest_path = data_dir.join(&h.filename);
            let params = MaterializeParams {
                filename: &h.filename,
                dest_dir: &data_dir,
                dest_path: &dest_path,
                size: h.size,
                page_size: file_info.page_size as usize,
                sparse: file_info.sparse,
                workers: opts.threads,
                percent_full: opts.percent_full,
            };
            let written = materialize(source, padding, &params)?;
            ctx.record_extracted(&dest_path);
            info!("x {} size={} ({} bytes written)", h.filename, h.size, written);
        }
    }

    ensure_patches_complete(&manifest, &cursor)?;
    ctx.options.extend(manifest.options.iter().cloned());
    Ok(true)
}

fn is_patch_payload(filename: &str) -> bool {
    filename.len() > ".data".len() && filename.ends_with(".data")
}

/// Copy one `.data` block's payload into the target files, following the
/// manifest's declared file order.
fn apply_patch_payload<R: Read + Send>(
    source: &mut ArchiveSource<R>,
    payload_len: u64,
    manifest: &IncrementManifest,
    cursor: &mut PatchCursor,
    data_dir: &Path,
) -> Result<()> {
    let mut remaining = payload_len;
    let mut buf = vec![0u8; 64 * 1024];

    while remaining > 0 {
        // Find the patch the payload cursor currently points at, skipping
        // files without (more) patches and patches already finished.
        let (name, patch) = loop {
            let Some(name) = manifest.file_order.get(cursor.file_idx) else {
                return Err(ThawError::Increment(format!(
                    "{} bytes of patch payload remain after the last declared patch",
                    remaining
                )));
            };
            let Some((_, patches)) = manifest.updated.get(name) else {
                cursor.file_idx += 1;
                cursor.patch_idx = 0;
                cursor.done = 0;
                continue;
            };
            if cursor.patch_idx >= patches.len() {
                cursor.file_idx += 1;
                cursor.patch_idx = 0;
                cursor.done = 0;
                continue;
            }
            let patch = patches[cursor.patch_idx];
            if cursor.done == patch.len {
                cursor.patch_idx += 1;
                cursor.done = 0;
                continue;
            }
            break (name.as_str(), patch);
        };

        let todo = (patch.len - cursor.done)
            .min(remaining)
            .min(buf.len() as u64) as usize;
        source.read_exact(&mut buf[..todo])?;
        write_patch_range(&data_dir.join(name), patch.offset + cursor.done, &buf[..todo])
            .map_err(|e| ThawError::Increment(format!("patching {}: {}", name, e)))?;
        cursor.done += todo as u64;
        remaining -= todo as u64;
    }

    Ok(())
}

fn write_patch_range(path: &Path, offset: u64, data: &[u8]) -> std::io::Result<()> {
    // No create: patching a file that does not exist means the base image
    // and the increment disagree.
    let file = OpenOptions::new().write(true).open(path)?;
    write_at(&file, data, offset)
}

fn ensure_patches_complete(manifest: &IncrementManifest, cursor: &PatchCursor) -> Result<()> {
    for (idx, name) in manifest
        .file_order
        .iter()
        .enumerate()
        .skip(cursor.file_idx)
    {
        if let Some((_, patches)) = manifest.updated.get(name) {
            let mut next = if idx == cursor.file_idx {
                cursor.patch_idx
            } else {
                0
            };
            if idx == cursor.file_idx
                && next < patches.len()
                && patches[next].len == cursor.done
            {
                next += 1;
            }
            if next < patches.len() {
                return Err(ThawError::Increment(format!(
                    "segment ended with unapplied patches for {}",
                    name
                )));
            }
        }
    }
    Ok(())
}
