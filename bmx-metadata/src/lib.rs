//! Header metadata graph: the arena-based set/item graph, primer pack codec,
//! and the read/write pipelines that move between a KLV stream and the
//! graph.

pub mod codec;
pub mod error;
pub mod graph;
pub mod primer;
pub mod read;
pub mod write;

pub use error::{Error, Result};
pub use graph::{Graph, Item, MetadataSet, RawSetBody, StrongRef, WeakRef};
pub use primer::Primer;
pub use read::{read_header_metadata, FilterDecision};
pub use write::{build_primer, write_header_metadata};
