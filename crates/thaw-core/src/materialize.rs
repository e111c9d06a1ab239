use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use tracing::debug;

use crate::error::{Result, ThawError};
use crate::manifest::DEFAULT_PAGE_SIZE;
use crate::space::{check_space, SPACE_RECHECK_BYTES};
use crate::stream::ArchiveSource;

/// Ceiling for the read/write chunk size. Non-sparse files grow their
/// page-sized chunk by doubling up to this.
pub const MAX_BUF_SIZE: usize = 1024 * 1024;

/// Everything the materializer needs to know about one file.
pub struct MaterializeParams<'a> {
    pub filename: &'a str,
    /// Directory the space guard checks (the file's filesystem).
    pub dest_dir: &'a Path,
    /// Full output path.
    pub dest_path: &'a Path,
    /// Logical content size declared by the block header.
    pub size: u64,
    /// 0 means unknown (default applies).
    pub page_size: usize,
    /// Skip all-zero chunks, leaving filesystem holes.
    pub sparse: bool,
    pub workers: usize,
    pub percent_full: u32,
}

/// The shared read cursor. Claiming a chunk (deciding its offset and
/// length AND consuming its bytes from the serial source) happens in a
/// single critical section, so no two workers ever hold overlapping or
/// out-of-order ranges.
struct ReadCursor<'a, R> {
    source: &'a mut ArchiveSource<R>,
    offset: u64,
}

/// Write one file from the serial stream using a pool of positioned
/// writers.
///
/// The input can only be read in order, so reads are serialized behind a
/// mutex; each chunk's write is independent (it knows its own offset) and
/// proceeds outside the lock, overlapping write latency across workers.
/// Returns the number of bytes physically written (logical size minus
/// skipped sparse chunks).
///
/// `padding` is drained from the source after the content, keeping the
/// stream aligned for the next header.
pub fn materialize<R: Read + Send>(
    source: &mut ArchiveSource<R>,
    padding: u64,
    params: &MaterializeParams<'_>,
) -> Result<u64> {
    check_space(
        params.dest_dir,
        params.percent_full,
        params.filename,
        params.size,
    )?;

    let bufsize = chunk_size(params.page_size, params.sparse);

    if let Some(parent) = params.dest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let out = File::create(params.dest_path)?;
    // Pre-extend so trailing sparse holes still produce the full logical
    // size.
    if params.size > 0 {
        out.set_len(params.size)?;
    }
    drop(out);

    let workers = params.workers.max(1);
    let cursor = Mutex::new(ReadCursor { source, offset: 0 });
    let cancelled = AtomicBool::new(false);
    let first_error: Mutex<Option<ThawError>> = Mutex::new(None);
    let bytes_written = AtomicU64::new(0);
    let bytes_read = AtomicU64::new(0);
    let skipped = AtomicU64::new(0);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| ThawError::Other(format!("failed to build write pool: {e}")))?;

    pool.in_place_scope(|s| {
        for worker in 0..workers {
            let cursor = &cursor;
            let cancelled = &cancelled;
            let first_error = &first_error;
            let bytes_written = &bytes_written;
            let bytes_read = &bytes_read;
            let skipped = &skipped;

            s.spawn(move |_| {
                if let Err(e) = write_worker(
                    worker,
                    cursor,
                    params,
                    bufsize,
                    bytes_written,
                    bytes_read,
                    skipped,
                    cancelled,
                ) {
                    cancelled.store(true, Ordering::Release);
                    if let Ok(mut slot) = first_error.lock() {
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                }
            });
        }
    });

    if let Ok(mut slot) = first_error.lock() {
        if let Some(e) = slot.take() {
            return Err(e);
        }
    }

    let cursor = match cursor.into_inner() {
        Ok(c) => c,
        Err(poisoned) => poisoned.into_inner(),
    };
    if padding > 0 {
        cursor.source.skip(padding).map_err(|e| {
            ThawError::Other(format!(
                "error reading padding after {}: {}",
                params.filename, e
            ))
        })?;
    }

    if params.sparse {
        debug!(
            "{}: skipped {} all-zero bytes",
            params.filename,
            skipped.load(Ordering::Relaxed)
        );
    }

    Ok(bytes_written.load(Ordering::Relaxed))
}

#[allow(clippy::too_many_arguments)]
fn write_worker<R: Read + Send>(
    worker: usize,
    cursor: &Mutex<ReadCursor<'_, R>>,
    params: &MaterializeParams<'_>,
    bufsize: usize,
    bytes_written: &AtomicU64,
    bytes_read: &AtomicU64,
    skipped: &AtomicU64,
    cancelled: &AtomicBool,
) -> Result<()> {
    let mut buf = vec![0u8; bufsize];
    let out = OpenOptions::new().write(true).open(params.dest_path)?;
    let mut next_check = SPACE_RECHECK_BYTES;

    loop {
        if cancelled.load(Ordering::Acquire) {
            return Ok(());
        }

        let (my_offset, n, left_after) = {
            let mut cur = lock(cursor);
            let remaining = params.size - cur.offset;
            if remaining == 0 {
                return Ok(());
            }
            let n = remaining.min(bufsize as u64) as usize;
            let off = cur.offset;
            cur.source.read_exact(&mut buf[..n]).map_err(|e| {
                ThawError::Other(format!(
                    "error reading {} bytes for {} after {} of {} bytes: {}",
                    n, params.filename, off, params.size, e
                ))
            })?;
            cur.offset += n as u64;
            (off, n, params.size - cur.offset)
        };
        bytes_read.fetch_add(n as u64, Ordering::Relaxed);

        // Only a FULL all-zero chunk may be skipped: chunk boundaries are
        // page-aligned, a short tail is not.
        if params.sparse && n == bufsize && buf[..n].iter().all(|&b| b == 0) {
            skipped.fetch_add(n as u64, Ordering::Relaxed);
            continue;
        }

        write_at(&out, &buf[..n], my_offset).map_err(|e| {
            ThawError::Other(format!(
                "error writing {} at offset {}: {}",
                params.filename, my_offset, e
            ))
        })?;
        bytes_written.fetch_add(n as u64, Ordering::Relaxed);

        // One worker re-checks capacity on a cumulative-bytes cadence; all
        // of them doing it would just hammer statvfs.
        if worker == 0 && bytes_read.load(Ordering::Relaxed) >= next_check {
            check_space(
                params.dest_dir,
                params.percent_full,
                params.filename,
                left_after,
            )?;
            next_check += SPACE_RECHECK_BYTES;
        }
    }
}

fn chunk_size(page_size: usize, sparse: bool) -> usize {
    let page = if page_size == 0 {
        DEFAULT_PAGE_SIZE as usize
    } else {
        page_size
    };
    if sparse {
        // Holes must align to the file's native page size.
        return page;
    }
    let mut buf = page;
    while buf << 1 <= MAX_BUF_SIZE {
        buf <<= 1;
    }
    buf
}

#[cfg(unix)]
pub(crate) fn write_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    file.write_all_at(buf, offset)
}

#[cfg(not(unix))]
pub(crate) fn write_at(mut file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)
}

fn lock<'m, T>(mutex: &'m Mutex<T>) -> MutexGuard<'m, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
