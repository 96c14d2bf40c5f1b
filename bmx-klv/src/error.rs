//! Error types for the KLV codec layer.

use thiserror::Error;

/// Result type for `bmx-klv` operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] bmx_io::Error),

    #[error("invalid BER length: first length byte {0:#04x} is not a valid short- or long-form length")]
    InvalidBerLength(u8),

    #[error("BER long-form length uses {0} octets, exceeding the 8-octet limit")]
    BerLengthTooLong(usize),

    #[error("requested a {requested}-octet fixed-length BER encoding but the value needs {needed}")]
    FixedLengthTooSmall { requested: usize, needed: usize },

    #[error("KLV value length {0} exceeds the 2^56 byte maximum this codec supports")]
    ValueTooLarge(u64),

    #[error("truncated KLV triple: expected {expected} bytes of value, got {actual}")]
    TruncatedValue { expected: u64, actual: u64 },

    #[error("key {0} is not a fill-item key")]
    NotFillKey(String),

    #[error("KAG alignment {0} is not a power of two")]
    InvalidKagSize(u32),
}
