//! Error types for essence bitstream parsing.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("bitstream syntax violation: {0}")]
    SyntaxViolation(String),

    #[error("reference to SPS id {0} with no prior SPS NAL")]
    UnknownSps(u32),

    #[error("reference to PPS id {0} with no prior PPS NAL")]
    UnknownPps(u32),

    #[error("ran out of bits reading a {0}-bit field")]
    BitstreamUnderrun(&'static str),

    #[error("unrecognized {kind} compression id {id:#x}")]
    UnknownCompressionId { kind: &'static str, id: u32 },

    #[error("marker segment length {0} is inconsistent with the remaining buffer")]
    MarkerSegmentLength(u32),

    #[error("expected marker {expected:#06x}, found {found:#06x}")]
    UnexpectedMarker { expected: u16, found: u16 },

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}
