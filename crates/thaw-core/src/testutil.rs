use crate::block::BLOCK_SIZE;

/// Builds serialized archive streams in memory, the way the paired
/// serializer lays them out: header block, content blocks zero-padded to
/// 512, terminated by an all-zero block.
pub struct ArchiveBuilder {
    bytes: Vec<u8>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn file(self, name: &str, content: &[u8]) -> Self {
        self.file_with_mode(name, content, 0o644)
    }

    pub fn file_with_mode(mut self, name: &str, content: &[u8], mode: u32) -> Self {
        self.bytes
            .extend_from_slice(&header_block(name, content.len() as u64, mode));
        self.bytes.extend_from_slice(content);
        let pad = (BLOCK_SIZE - content.len() % BLOCK_SIZE) % BLOCK_SIZE;
        self.bytes.extend(std::iter::repeat(0u8).take(pad));
        self
    }

    pub fn terminator(mut self) -> Self {
        self.bytes.extend_from_slice(&[0u8; BLOCK_SIZE]);
        self
    }

    /// Append raw bytes, for building deliberately torn streams.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn header_block(name: &str, size: u64, mode: u32) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[..name.len()].copy_from_slice(name.as_bytes());
    write_octal(&mut block[100..108], mode as u64);
    write_octal(&mut block[108..116], 0); // uid
    write_octal(&mut block[116..124], 0); // gid
    write_octal(&mut block[124..136], size);
    block
}

fn write_octal(field: &mut [u8], value: u64) {
    let digits = format!("{:0width$o}", value, width = field.len() - 1);
    field[..digits.len()].copy_from_slice(digits.as_bytes());
    // the final byte stays NUL
}
