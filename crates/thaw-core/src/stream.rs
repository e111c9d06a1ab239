use std::io::Read;

use crate::block::BLOCK_SIZE;
use crate::error::{Result, ThawError};

/// The single serial input stream of a restore run.
///
/// The source is unseekable: every byte is consumed exactly once, in order.
/// The absolute stream offset is tracked so that errors can point at the
/// byte where the stream went bad.
pub struct ArchiveSource<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> ArchiveSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Absolute number of bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read exactly `buf.len()` bytes. A short read is fatal: the header
    /// declared more content than the stream delivered.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(ThawError::ShortRead {
                        offset: self.offset,
                        wanted: buf.len(),
                        got: filled,
                    });
                }
                Ok(n) => {
                    filled += n;
                    self.offset += n as u64;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read one 512-byte block, distinguishing a clean end of stream (zero
    /// bytes at a block boundary, returns `false`) from a torn block
    /// (fatal).
    pub fn read_block(&mut self, buf: &mut [u8; BLOCK_SIZE]) -> Result<bool> {
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    if filled == 0 {
                        return Ok(false);
                    }
                    return Err(ThawError::ShortRead {
                        offset: self.offset,
                        wanted: BLOCK_SIZE,
                        got: filled,
                    });
                }
                Ok(n) => {
                    filled += n;
                    self.offset += n as u64;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Read `len` bytes as text. The manifest and configuration payloads are
    /// UTF-8 by contract; stray bytes are replaced rather than rejected so a
    /// mangled comment cannot abort a restore.
    pub fn read_text(&mut self, len: u64) -> Result<String> {
        let mut data = vec![0u8; len as usize];
        self.read_exact(&mut data)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Drain and discard `n` bytes (block padding).
    pub fn skip(&mut self, n: u64) -> Result<()> {
        let mut remaining = n;
        let mut buf = [0u8; BLOCK_SIZE];
        while remaining > 0 {
            let take = remaining.min(BLOCK_SIZE as u64) as usize;
            self.read_exact(&mut buf[..take])?;
            remaining -= take as u64;
        }
        Ok(())
    }
}
