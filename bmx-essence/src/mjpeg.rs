//! Motion-JPEG parser: scans for SOI/EOI markers, with an optional mode that
//! treats a field pair as a single frame (the default, matching how MXF
//! stores interlaced MJPEG essence).

use crate::error::Result;
use crate::{EssenceParser, NULL_FRAME_SIZE, NULL_OFFSET};

const SOI: [u8; 2] = [0xff, 0xd8];
const EOI: [u8; 2] = [0xff, 0xd9];

#[derive(Debug, Clone, Default)]
pub struct FrameInfo {
    pub field_count: u32,
}

pub struct MjpegParser {
    field_pair_mode: bool,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegParser {
    pub fn new() -> Self {
        Self { field_pair_mode: true }
    }

    pub fn with_field_pair_mode(field_pair_mode: bool) -> Self {
        Self { field_pair_mode }
    }

    fn find_marker(bytes: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
        bytes[from..]
            .windows(2)
            .position(|w| w == marker)
            .map(|i| i + from)
    }

    fn find_field_end(&self, bytes: &[u8], from: usize) -> Option<usize> {
        let soi = Self::find_marker(bytes, from, SOI)?;
        let eoi = Self::find_marker(bytes, soi, EOI)?;
        Some(eoi + 2)
    }
}

impl EssenceParser for MjpegParser {
    type FrameInfo = FrameInfo;

    fn parse_frame_start(&mut self, bytes: &[u8]) -> i64 {
        match Self::find_marker(bytes, 0, SOI) {
            Some(pos) => pos as i64,
            None => {
                if bytes.len() < 2 {
                    NULL_OFFSET
                } else {
                    NULL_FRAME_SIZE
                }
            }
        }
    }

    fn parse_frame_size(&mut self, bytes: &[u8]) -> i64 {
        let Some(first_field_end) = self.find_field_end(bytes, 0) else {
            return NULL_OFFSET;
        };
        if !self.field_pair_mode {
            return first_field_end as i64;
        }
        match self.find_field_end(bytes, first_field_end) {
            Some(second_field_end) => second_field_end as i64,
            None => NULL_OFFSET,
        }
    }

    fn parse_frame_info(&mut self, bytes: &[u8], size: usize) -> Result<FrameInfo> {
        let mut field_count = 0;
        let mut pos = 0;
        while let Some(end) = self.find_field_end(&bytes[..size], pos) {
            field_count += 1;
            pos = end;
        }
        Ok(FrameInfo { field_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_field_frame_without_pair_mode() {
        let mut parser = MjpegParser::with_field_pair_mode(false);
        let bytes = [0xff, 0xd8, 1, 2, 3, 0xff, 0xd9, 0xff];
        assert_eq!(parser.parse_frame_size(&bytes), 7);
    }

    #[test]
    fn field_pair_mode_spans_two_images() {
        let mut parser = MjpegParser::new();
        let mut bytes = vec![0xff, 0xd8, 1, 0xff, 0xd9];
        bytes.extend_from_slice(&[0xff, 0xd8, 2, 0xff, 0xd9]);
        assert_eq!(parser.parse_frame_size(&bytes), 10);
    }
}
