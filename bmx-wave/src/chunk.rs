//! RIFF chunk identifiers and the 8-byte chunk header codec.
//!
//! A RIFF/RF64/BW64 chunk is a 4-byte ASCII ID, a little-endian length (the
//! length field itself excluded), and that many bytes of payload, padded to
//! an even byte count. `ds64`'s three 64-bit sizes override the RIFF and
//! `data` 32-bit fields once either is declared `0xFFFFFFFF`.

use bmx_io::MxfFile;

use crate::error::Result;

pub type FourCc = [u8; 4];

pub const RIFF: FourCc = *b"RIFF";
pub const RF64: FourCc = *b"RF64";
pub const BW64: FourCc = *b"BW64";
pub const WAVE: FourCc = *b"WAVE";
pub const JUNK: FourCc = *b"JUNK";
pub const DS64: FourCc = *b"ds64";
pub const BEXT: FourCc = *b"bext";
pub const FMT: FourCc = *b"fmt ";
pub const FACT: FourCc = *b"fact";
pub const CHNA: FourCc = *b"chna";
pub const DATA: FourCc = *b"data";

/// Size in bytes of a minimal `ds64` body: riff size, data size, sample
/// count (each 8 bytes), plus a zero-length table-of-sizes count (4 bytes).
pub const DS64_BODY_SIZE: u32 = 8 + 8 + 8 + 4;

/// `0xFFFFFFFF` in the RIFF or `data` 32-bit size field means "see `ds64`".
pub const RF64_SIZE_ESCAPE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader {
    pub id: FourCc,
    pub size: u32,
}

impl ChunkHeader {
    pub fn read(f: &mut dyn MxfFile) -> Result<Self> {
        let mut id = [0u8; 4];
        f.read_exact(&mut id)?;
        let mut size_bytes = [0u8; 4];
        f.read_exact(&mut size_bytes)?;
        Ok(Self {
            id,
            size: u32::from_le_bytes(size_bytes),
        })
    }

    pub fn write(&self, f: &mut dyn MxfFile) -> Result<()> {
        f.write_all(&self.id)?;
        f.write_all(&self.size.to_le_bytes())?;
        Ok(())
    }
}

/// Padding byte count needed after a chunk body of `size` bytes so the next
/// chunk starts on an even offset, per the RIFF spec.
pub fn pad_len(size: u32) -> usize {
    (size % 2) as usize
}
