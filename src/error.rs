use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChinError>;

/// Every failure the archive codec can surface, tested by kind.
#[derive(Error, Debug)]
pub enum ChinError {
    #[error("invalid chin format: {0}")]
    InvalidFormat(String),

    #[error("unsupported version {0} (requires v6)")]
    UnsupportedVersion(u16),

    #[error("invalid password or corrupted data")]
    InvalidPassword,

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("security error: illegal file path '{0}'")]
    SecurityError(String),

    #[error("truncated archive: {0}")]
    TruncatedArchive(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("file name too long ({0} bytes, limit is 4096)")]
    NameTooLong(usize),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
