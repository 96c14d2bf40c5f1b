//! DV (IEC 61834 / SMPTE 314M) parser.
//!
//! DV frames are fixed-size per variant, so `parse_frame_size` only needs the
//! variant identified from the first DIF block's APT/STA bytes; there is no
//! frame-to-frame scanning.

use crate::error::{Error, Result};
use crate::{EssenceParser, NULL_FRAME_SIZE, NULL_OFFSET};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvVariant {
    Dv25_25mbit,
    Dv50,
    Dv100_1080i,
    Dv100_720p,
}

impl DvVariant {
    pub fn frame_size(self, is_50hz: bool) -> usize {
        match (self, is_50hz) {
            (DvVariant::Dv25_25mbit, true) => 144_000,
            (DvVariant::Dv25_25mbit, false) => 120_000,
            (DvVariant::Dv50, true) => 288_000,
            (DvVariant::Dv50, false) => 240_000,
            (DvVariant::Dv100_1080i, true) => 576_000,
            (DvVariant::Dv100_1080i, false) => 480_000,
            (DvVariant::Dv100_720p, _) => 240_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub variant: DvVariant,
    pub aspect_ratio_16_9: bool,
    pub is_50hz: bool,
}

/// DIF block header: section type in bits 5-7 of byte 0; the header DIF
/// block (section type 0, sequence 0, block 0) holds APT at byte 3 bits 0-2
/// and STA-like flags further into the header DIF's first video-related
/// pack, which DV repeats across every block of the header section.
const DIF_BLOCK_SIZE: usize = 80;

#[derive(Default)]
pub struct DvParser;

impl DvParser {
    pub fn new() -> Self {
        Self
    }

    fn identify(bytes: &[u8]) -> Result<(DvVariant, bool, bool)> {
        if bytes.len() < DIF_BLOCK_SIZE * 2 {
            return Err(Error::SyntaxViolation("buffer shorter than one DV header block".into()));
        }
        let section_type = bytes[0] >> 5;
        if section_type != 0 {
            return Err(Error::SyntaxViolation("first DIF block is not a header block".into()));
        }
        let apt = bytes[3] & 0x07;
        // Byte 80 onward is the subcode DIF block; STA sits in its pack 1.
        let sta = bytes[80 + 3];
        let is_50hz = (sta & 0x20) == 0;
        let aspect_ratio_16_9 = (sta & 0x02) != 0;

        let variant = match apt {
            0 => DvVariant::Dv25_25mbit,
            4 => DvVariant::Dv50,
            // APT values for DV100 distinguish 1080i from 720p via the
            // transmission standard; treat both uniformly since frame size
            // is supplied by the caller's known track configuration when
            // ambiguous.
            5 => DvVariant::Dv100_1080i,
            6 => DvVariant::Dv100_720p,
            other => {
                return Err(Error::UnknownCompressionId {
                    kind: "DV APT",
                    id: other as u32,
                })
            }
        };
        Ok((variant, aspect_ratio_16_9, is_50hz))
    }
}

impl EssenceParser for DvParser {
    type FrameInfo = FrameInfo;

    fn parse_frame_start(&mut self, bytes: &[u8]) -> i64 {
        if bytes.len() < DIF_BLOCK_SIZE * 2 {
            NULL_OFFSET
        } else {
            0
        }
    }

    fn parse_frame_size(&mut self, bytes: &[u8]) -> i64 {
        match Self::identify(bytes) {
            Ok((variant, _, is_50hz)) => variant.frame_size(is_50hz) as i64,
            Err(_) if bytes.len() < DIF_BLOCK_SIZE * 2 => NULL_OFFSET,
            Err(_) => NULL_FRAME_SIZE,
        }
    }

    fn parse_frame_info(&mut self, bytes: &[u8], _size: usize) -> Result<FrameInfo> {
        let (variant, aspect_ratio_16_9, is_50hz) = Self::identify(bytes)?;
        Ok(FrameInfo {
            variant,
            aspect_ratio_16_9,
            is_50hz,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dv25_frame_size_by_rate() {
        assert_eq!(DvVariant::Dv25_25mbit.frame_size(true), 144_000);
        assert_eq!(DvVariant::Dv25_25mbit.frame_size(false), 120_000);
    }

    #[test]
    fn unknown_apt_is_not_fatal_to_caller() {
        let mut bytes = vec![0u8; DIF_BLOCK_SIZE * 2];
        bytes[3] = 0x07;
        let mut parser = DvParser::new();
        assert_eq!(parser.parse_frame_size(&bytes), NULL_FRAME_SIZE);
    }
}
