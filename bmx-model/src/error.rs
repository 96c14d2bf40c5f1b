//! Error types for the data model registry.

use thiserror::Error;
use bmx_klv::Key;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("set key {0} is already registered")]
    DuplicateSetDefinition(Key),

    #[error("item key {0} is already registered")]
    DuplicateItemDefinition(Key),

    #[error("no set definition registered for key {0}")]
    UnknownSet(Key),

    #[error("no item definition registered for key {0}")]
    UnknownItem(Key),

    #[error("set {child} declares parent {parent}, which is not registered")]
    UnknownParent { child: Key, parent: Key },
}
