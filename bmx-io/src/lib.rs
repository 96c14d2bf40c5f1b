//! Uniform random-access byte stream abstraction.
//!
//! `bmx-io` provides the [`MxfFile`] trait and a handful of backends
//! implementing it: plain disk I/O, a growable in-memory buffer, a page
//! cache layered over another backend, a memory-mapped file, an HTTP
//! range-request client, and a checksumming wrapper. Higher layers (KLV
//! codec, partition reader/writer) are generic over `&mut dyn MxfFile` or a
//! concrete backend type parameter and never need to know which of these is
//! in play.
//!
//! This crate intentionally stops at byte-stream I/O: Key/Length/Value
//! primitives live in `bmx-klv`, which depends on this crate rather than
//! the reverse.

pub mod cached;
pub mod checksum;
pub mod disk;
pub mod error;
pub mod file;
pub mod http;
pub mod memory;
pub mod mmap;

pub use cached::CachedFile;
pub use checksum::{ChecksumFile, Digest};
pub use disk::DiskFile;
pub use error::{Error, Result};
pub use file::{MxfFile, OpenMode};
pub use http::HttpFile;
pub use memory::{BorrowedMemoryFile, MemoryFile};
pub use mmap::MmapFile;
