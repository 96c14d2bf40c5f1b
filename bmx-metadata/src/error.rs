//! Error types for the header metadata graph.

use thiserror::Error;

use bmx_klv::Key;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] bmx_io::Error),

    #[error("KLV error: {0}")]
    Klv(#[from] bmx_klv::Error),

    #[error("data model error: {0}")]
    Model(#[from] bmx_model::Error),

    #[error("primer pack has no entry for local tag {0:#06x}")]
    UnknownLocalTag(u16),

    #[error("expected a primer pack key, found {0}")]
    NotAPrimerPack(Key),

    #[error("item key {0} has no local tag assigned in the primer")]
    ItemKeyNotInPrimer(Key),

    #[error("set at arena index {0} does not exist")]
    InvalidSetIndex(usize),

    #[error("reference to instanceUID with no matching set in this graph")]
    DanglingReference,

    #[error("set {0} is fixed-space-allocated at {1} bytes but its content needs {2}")]
    FixedSpaceOverflow(Key, u64, u64),

    #[error("cycle detected in strong-reference graph at set {0}")]
    StrongReferenceCycle(Key),
}
