//! RDD-36 (Apple ProRes) frame header parser.

use crate::error::{Error, Result};
use crate::{EssenceParser, NULL_FRAME_SIZE, NULL_OFFSET};

const FRAME_IDENTIFIER: [u8; 4] = *b"icpf";

#[derive(Debug, Clone, Default)]
pub struct FrameInfo {
    pub horizontal_size: u32,
    pub vertical_size: u32,
    pub chroma_format: u8,
    pub interlace_mode: u8,
    pub aspect_ratio_information: u8,
    pub frame_rate_code: u8,
    pub color_primaries: u8,
    pub transfer_characteristic: u8,
    pub matrix_coefficients: u8,
    pub alpha_channel_type: u8,
    pub picture_count: u32,
}

#[derive(Default)]
pub struct Rdd36Parser;

impl Rdd36Parser {
    pub fn new() -> Self {
        Self
    }
}

impl EssenceParser for Rdd36Parser {
    type FrameInfo = FrameInfo;

    fn parse_frame_start(&mut self, bytes: &[u8]) -> i64 {
        if bytes.len() < 8 {
            return NULL_OFFSET;
        }
        if bytes[4..8] == FRAME_IDENTIFIER {
            0
        } else {
            NULL_FRAME_SIZE
        }
    }

    fn parse_frame_size(&mut self, bytes: &[u8]) -> i64 {
        if bytes.len() < 8 {
            return NULL_OFFSET;
        }
        if bytes[4..8] != FRAME_IDENTIFIER {
            return NULL_FRAME_SIZE;
        }
        u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as i64
    }

    fn parse_frame_info(&mut self, bytes: &[u8], size: usize) -> Result<FrameInfo> {
        if size < 0x2c || bytes[4..8] != FRAME_IDENTIFIER {
            return Err(Error::SyntaxViolation("not a ProRes frame header".into()));
        }
        let horizontal_size = u16::from_be_bytes(bytes[0x08..0x0a].try_into().unwrap()) as u32;
        let vertical_size = u16::from_be_bytes(bytes[0x0a..0x0c].try_into().unwrap()) as u32;
        let chroma_format = bytes[0x0c] >> 6;
        let interlace_mode = (bytes[0x0c] >> 2) & 0x03;
        let aspect_ratio_information = bytes[0x0d] >> 4;
        let frame_rate_code = bytes[0x0d] & 0x0f;
        let color_primaries = bytes[0x0e];
        let transfer_characteristic = bytes[0x0f];
        let matrix_coefficients = bytes[0x10];
        let alpha_channel_type = bytes[0x11] >> 4;
        let picture_count = if interlace_mode == 0 { 1 } else { 2 };
        Ok(FrameInfo {
            horizontal_size,
            vertical_size,
            chroma_format,
            interlace_mode,
            aspect_ratio_information,
            frame_rate_code,
            color_primaries,
            transfer_characteristic,
            matrix_coefficients,
            alpha_channel_type,
            picture_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_read_from_header() {
        let mut bytes = vec![0u8; 0x2c];
        bytes[0..4].copy_from_slice(&917_504u32.to_be_bytes());
        bytes[4..8].copy_from_slice(&FRAME_IDENTIFIER);
        let mut parser = Rdd36Parser::new();
        assert_eq!(parser.parse_frame_size(&bytes), 917_504);
    }

    #[test]
    fn interlaced_reports_two_pictures() {
        let mut bytes = vec![0u8; 0x2c];
        bytes[4..8].copy_from_slice(&FRAME_IDENTIFIER);
        bytes[0x0c] = 0b0000_0100; // interlace_mode = 1
        let mut parser = Rdd36Parser::new();
        let info = parser.parse_frame_info(&bytes, bytes.len()).unwrap();
        assert_eq!(info.picture_count, 2);
    }
}
