//! Data model: a registry of set and item definitions keyed by Universal
//! Label, plus the primitive value types those definitions reference.
//!
//! `bmx-metadata` builds the header-metadata graph on top of a [`Registry`];
//! this crate only knows about definitions, not about any particular file's
//! instances.

pub mod baseline;
pub mod error;
pub mod registry;
pub mod types;

pub use baseline::smpte_baseline;
pub use error::{Error, Result};
pub use registry::{ItemDefinition, Registry, SetDefinition};
pub use types::{
    PrimitiveType, ProductVersion, Rational, RgbaComponent, Timestamp, Umid, Value,
};
