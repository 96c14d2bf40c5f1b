//! Error types for RIFF/RF64/BW64 reading and writing.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] bmx_io::Error),

    #[error("not a RIFF/RF64/BW64 file: {0}")]
    NotRiff(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("fmt chunk must be written before the first sample")]
    FmtNotSet,

    #[error("a chunk body exceeds 4 GiB, which only RF64/BW64 can address")]
    ChunkTooLarge,
}
