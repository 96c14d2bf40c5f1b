//! SMPTE ST 377-1 MXF partition, index-table, content-package and
//! reader/writer engine.
//!
//! Layers bottom to top: `partition` (partition pack + random index pack
//! read/write), `index` (index table segment engine), `content_package`
//! (one-edit-unit assembler), `descriptor` (codec-to-descriptor-set
//! mapping), `reader` (single-file and group readers), `writer` (the
//! top-level partition/index/header-metadata write driver, plus
//! `timed_text`'s clip-wrapped dedicated-partition track). `config` carries
//! writer/reader tunables; `error` is the crate-wide error taxonomy.

pub mod config;
pub mod content_package;
pub mod descriptor;
pub mod error;
pub mod index;
pub mod partition;
pub mod reader;
pub mod timed_text;
pub mod writer;

pub use config::{
    FlavourFlags, FooterIndexPolicy, OperationalPattern, PrechargeBehaviour, ProfileFlags,
    ReaderConfig, WriterConfig,
};
pub use content_package::{ContentPackageAssembler, Track, TrackKind};
pub use descriptor::DescriptorHelper;
pub use error::{Error, Result};
pub use index::{IndexEngine, IndexKey};
pub use partition::{PartitionKind, PartitionPack, PartitionStatus, RandomIndexEntry};
pub use reader::{Frame, FrameMetadataReader, GroupReader, SingleFileReader, TrackReader};
pub use timed_text::{preroll_filler_duration, AncillaryResourceId, TimedTextResourceProvider, TimedTextWriter};
pub use writer::MxfWriter;
