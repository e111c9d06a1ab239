use thiserror::Error;

pub type Result<T> = std::result::Result<T, ThawError>;

#[derive(Debug, Error)]
pub enum ThawError {
    #[error("bad archive block: {0}")]
    BadBlock(String),

    #[error("short read from archive stream at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("{file}:{line}: {msg}")]
    Lrl {
        file: String,
        line: usize,
        msg: String,
    },

    #[error(
        "not enough space to restore {filename} ({bytes} bytes) - would leave only \
         {percent_free:.2}% free space"
    )]
    DiskFull {
        filename: String,
        bytes: u64,
        percent_free: f64,
    },

    #[error("error reading filesystem statistics for {dir}: {source}")]
    Statvfs {
        dir: String,
        source: std::io::Error,
    },

    #[error("bad destination directory: {0}")]
    DestDir(String),

    #[error("increment error: {0}")]
    Increment(String),

    #[error("full recovery command '{command}' failed with status {code}")]
    Recovery { command: String, code: i32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
