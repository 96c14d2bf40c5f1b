//! Error types for partition, index table, content-package and reader/writer
//! operations.

use thiserror::Error;

use bmx_klv::Key;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] bmx_io::Error),

    #[error("KLV error: {0}")]
    Klv(#[from] bmx_klv::Error),

    #[error("header metadata error: {0}")]
    Metadata(#[from] bmx_metadata::Error),

    #[error("essence parser error: {0}")]
    Essence(#[from] bmx_essence::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("unsupported essence container or picture coding: {0}")]
    UnsupportedFormat(Key),

    #[error("two-pass header rewrite did not fit in the {reserved}-byte reserved region (needed {needed})")]
    HeaderOverflow { reserved: u64, needed: u64 },

    #[error("index segment would exceed the 2 GiB limit for a single segment")]
    IndexOverflow,

    #[error("numeric overflow computing {0}")]
    Overflow(&'static str),

    #[error("essence kind requires temporal reordering, which is not supported on a non-seekable output")]
    TemporalReorderingNeedsSeek,
}
