use tracing::warn;

use crate::error::{Result, ThawError};

/// Archive block size. Headers and content are both aligned to this and
/// zero-padded.
pub const BLOCK_SIZE: usize = 512;

// Header field offsets (ustar prefix, as written by the serializer).
const NAME: std::ops::Range<usize> = 0..100;
const MODE: std::ops::Range<usize> = 100..108;
const UID: std::ops::Range<usize> = 108..116;
const GID: std::ops::Range<usize> = 116..124;
const SIZE: std::ops::Range<usize> = 124..136;

/// A decoded archive block header.
#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub filename: String,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl BlockHeader {
    /// Number of 512-byte content blocks following this header.
    pub fn content_blocks(&self) -> u64 {
        self.size.div_ceil(BLOCK_SIZE as u64)
    }

    /// Zero padding after the logical content, up to the block boundary.
    /// Must be drained from the stream even though it is never written out.
    pub fn padding(&self) -> u64 {
        self.content_blocks() * BLOCK_SIZE as u64 - self.size
    }
}

/// Decode a raw header block. Returns `None` for the all-zero terminator
/// block that ends an archive (or, in incremental mode, one segment).
///
/// Any malformed header is fatal: the stream is assumed internally
/// consistent by construction, so a violation means corruption or a
/// producer/consumer mismatch.
pub fn decode(raw: &[u8; BLOCK_SIZE]) -> Result<Option<BlockHeader>> {
    if raw.iter().all(|&b| b == 0) {
        return Ok(None);
    }

    let name_field = &raw[NAME];
    if name_field[name_field.len() - 1] != 0 {
        return Err(ThawError::BadBlock(
            "filename is not NUL terminated".into(),
        ));
    }
    let name_len = name_field.iter().position(|&b| b == 0).unwrap_or(0);
    if name_len == 0 {
        return Err(ThawError::BadBlock("empty filename".into()));
    }
    let filename = String::from_utf8_lossy(&name_field[..name_len]).into_owned();

    let size = decode_size_field(&raw[SIZE])?;

    Ok(Some(BlockHeader {
        filename,
        size,
        mode: decode_octal_or_zero(&raw[MODE], "mode"),
        uid: decode_octal_or_zero(&raw[UID], "uid"),
        gid: decode_octal_or_zero(&raw[GID], "gid"),
    }))
}

/// Decode the size field. If the first byte has its high bit set the
/// remaining bytes are a big-endian binary integer (the base-256 extension
/// used for files too large for an octal text field, >= 8 GiB). Otherwise
/// the field is a NUL-terminated octal digit string.
pub fn decode_size_field(field: &[u8]) -> Result<u64> {
    if field[0] & 0x80 != 0 {
        let mut value: u64 = 0;
        for &b in &field[1..] {
            if value >> 56 != 0 {
                return Err(ThawError::BadBlock("base-256 size overflows u64".into()));
            }
            value = (value << 8) | b as u64;
        }
        return Ok(value);
    }

    if field[field.len() - 1] != 0 {
        return Err(ThawError::BadBlock(
            "size field is not NUL terminated".into(),
        ));
    }
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let digits = &field[..end];
    if digits.is_empty() {
        return Err(ThawError::BadBlock("empty size field".into()));
    }
    let mut value: u64 = 0;
    for &b in digits {
        if !(b'0'..=b'7').contains(&b) {
            return Err(ThawError::BadBlock(format!(
                "invalid octal digit {:#04x} in size field",
                b
            )));
        }
        value = value
            .checked_mul(8)
            .and_then(|v| v.checked_add((b - b'0') as u64))
            .ok_or_else(|| ThawError::BadBlock("octal size overflows u64".into()))?;
    }
    Ok(value)
}

/// Permission fields are advisory: a garbled mode should not abort a
/// restore the way a garbled size must.
fn decode_octal_or_zero(field: &[u8], what: &str) -> u32 {
    let end = field
        .iter()
        .position(|&b| b == 0 || b == b' ')
        .unwrap_or(field.len());
    let mut value: u32 = 0;
    for &b in &field[..end] {
        if !(b'0'..=b'7').contains(&b) {
            warn!("ignoring unparseable {} field in block header", what);
            return 0;
        }
        value = match value.checked_mul(8).and_then(|v| v.checked_add((b - b'0') as u32)) {
            Some(v) => v,
            None => {
                warn!("ignoring overflowing {} field in block header", what);
                return 0;
            }
        };
    }
    value
}
