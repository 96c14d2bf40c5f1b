//! RIFF/RF64/BW64 WAVE writer.
//!
//! Shares its backend abstraction with `bmx-mxf` through [`bmx_io::MxfFile`]:
//! `RIFF`/`RF64` for plain PCM (promoted past 4 GiB), `BW64` once ADM
//! metadata (`chna`, plus any caller-supplied `axml`/`bxml`/`sxml` user
//! chunks) is in play. Chunk order: RIFF header, `JUNK`-placeholder for
//! `ds64`, optional `bext` (non-BW64 only), `fmt `, `fact` (non-BW64 only),
//! optional `chna`, user chunks, `data`.

pub mod chunk;
pub mod error;
pub mod writer;

pub use chunk::{ChunkHeader, FourCc};
pub use error::{Error, Result};
pub use writer::{BroadcastExtension, ChnaEntry, UserChunk, WaveFormat, WaveWriter};
