//! Error types for the file abstraction layer

use thiserror::Error;

/// Result type for `bmx-io` operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is not seekable")]
    NotSeekable,

    #[error("file is read-only")]
    ReadOnly,

    #[error(
        "checksum desync: file modified at position {position} before digest caught up to {digested}"
    )]
    ChecksumDesync { position: u64, digested: u64 },

    #[error("HTTP server at {0} does not advertise Accept-Ranges: bytes")]
    RangeRequestsUnsupported(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("numeric overflow computing {0}")]
    Overflow(&'static str),
}
