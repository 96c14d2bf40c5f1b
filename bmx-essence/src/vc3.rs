//! VC-3 / DNxHD header parser. Frame size is constant per `compression_id`,
//! so `parse_frame_size` only needs the header once the compression ID has
//! been seen.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::{EssenceParser, NULL_FRAME_SIZE, NULL_OFFSET};

const HEADER_PREFIX: [u8; 4] = [0x00, 0x00, 0x02, 0x80];
const HEADER_LEN: usize = 0x2a0;

#[derive(Debug, Clone, Default)]
pub struct FrameInfo {
    pub compression_id: u32,
    pub progressive: bool,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u32,
}

/// compression_id -> constant frame size in bytes, as declared by each
/// header seen so far.
#[derive(Default)]
pub struct Vc3Parser {
    frame_sizes: HashMap<u32, usize>,
}

impl Vc3Parser {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_header(bytes: &[u8]) -> Result<FrameInfo> {
        if bytes.len() < HEADER_LEN || bytes[0..4] != HEADER_PREFIX {
            return Err(Error::SyntaxViolation("not a VC-3 frame header".into()));
        }
        let height = ((bytes[0x18] as u32) << 8) | bytes[0x19] as u32;
        let width = ((bytes[0x1a] as u32) << 8) | bytes[0x1b] as u32;
        let progressive = (bytes[0x21] & 0x40) != 0;
        let compression_id = ((bytes[0x2c] as u32) << 24)
            | ((bytes[0x2d] as u32) << 16)
            | ((bytes[0x2e] as u32) << 8)
            | (bytes[0x2f] as u32);
        let bit_depth = match bytes[0x21] >> 6 {
            _ if (bytes[0x21] & 0x07) == 0x02 => 10,
            _ => 8,
        };
        Ok(FrameInfo {
            compression_id,
            progressive,
            width,
            height,
            bit_depth,
        })
    }
}

impl EssenceParser for Vc3Parser {
    type FrameInfo = FrameInfo;

    fn parse_frame_start(&mut self, bytes: &[u8]) -> i64 {
        if bytes.len() < 4 {
            return NULL_OFFSET;
        }
        if bytes[0..4] == HEADER_PREFIX {
            0
        } else {
            NULL_FRAME_SIZE
        }
    }

    fn parse_frame_size(&mut self, bytes: &[u8]) -> i64 {
        if bytes.len() < HEADER_LEN {
            return NULL_OFFSET;
        }
        let info = match Self::parse_header(bytes) {
            Ok(info) => info,
            Err(_) => return NULL_FRAME_SIZE,
        };
        match self.frame_sizes.get(&info.compression_id) {
            Some(&size) => size as i64,
            // Size for a never-before-seen compression ID can't be derived
            // from the header alone; the caller must supply the declared
            // frame size out-of-band (e.g. from the essence descriptor) on
            // first use, via `record_frame_size`.
            None => NULL_FRAME_SIZE,
        }
    }

    fn parse_frame_info(&mut self, bytes: &[u8], size: usize) -> Result<FrameInfo> {
        let info = Self::parse_header(&bytes[..size.min(bytes.len())])?;
        self.frame_sizes.entry(info.compression_id).or_insert(size);
        Ok(info)
    }
}

impl Vc3Parser {
    /// Record a known constant frame size for `compression_id`, e.g. taken
    /// from an essence descriptor read before any frame has been parsed.
    pub fn record_frame_size(&mut self, compression_id: u32, size: usize) {
        self.frame_sizes.insert(compression_id, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_compression_id_yields_null_frame_size() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&HEADER_PREFIX);
        let mut parser = Vc3Parser::new();
        assert_eq!(parser.parse_frame_size(&bytes), NULL_FRAME_SIZE);
    }

    #[test]
    fn recorded_frame_size_is_reused() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&HEADER_PREFIX);
        let mut parser = Vc3Parser::new();
        parser.record_frame_size(0, 917_504);
        assert_eq!(parser.parse_frame_size(&bytes), 917_504);
    }
}
