//! MPEG-2 video elementary stream parser (ISO/IEC 13818-2).
//!
//! Scans `0x000001xx` start codes and records the fields from sequence,
//! sequence-extension, GOP, picture and picture-coding-extension headers
//! needed to describe a frame.

use crate::error::{Error, Result};
use crate::{EssenceParser, FrameType, NULL_FRAME_SIZE, NULL_OFFSET};

const SEQUENCE_HEADER: u8 = 0xb3;
const GOP_HEADER: u8 = 0xb8;
const PICTURE_START: u8 = 0x00;
const EXTENSION_START: u8 = 0xb5;
const SEQUENCE_EXTENSION_ID: u8 = 1;
const PICTURE_CODING_EXTENSION_ID: u8 = 8;
const DISPLAY_EXTENSION_ID: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub chroma_format: u32,
    pub frame_rate: (u32, u32),
    pub aspect_ratio: (u32, u32),
    pub bit_rate: u32,
    pub low_delay: bool,
    pub profile_and_level: u8,
    pub progressive: bool,
    pub closed_gop: bool,
    pub frame_type: Option<FrameType>,
    pub temporal_reference: u32,
    pub vbv_delay: u32,
    pub top_field_first: bool,
    pub color_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

fn find_start_code(bytes: &[u8], from: usize) -> Option<(usize, u8)> {
    if bytes.len() < 4 {
        return None;
    }
    let mut i = from;
    while i + 4 <= bytes.len() {
        if bytes[i] == 0 && bytes[i + 1] == 0 && bytes[i + 2] == 1 {
            return Some((i, bytes[i + 3]));
        }
        i += 1;
    }
    None
}

fn frame_rate_from_code(code: u8) -> (u32, u32) {
    match code {
        1 => (24000, 1001),
        2 => (24, 1),
        3 => (25, 1),
        4 => (30000, 1001),
        5 => (30, 1),
        6 => (50, 1),
        7 => (60000, 1001),
        8 => (60, 1),
        _ => (0, 1),
    }
}

fn aspect_ratio_from_code(code: u8) -> (u32, u32) {
    match code {
        1 => (1, 1),
        2 => (4, 3),
        3 => (16, 9),
        4 => (221, 100),
        _ => (0, 1),
    }
}

#[derive(Default)]
pub struct Mpeg2Parser {
    width: u32,
    height: u32,
    aspect_ratio: (u32, u32),
    frame_rate: (u32, u32),
    bit_rate: u32,
    chroma_format: u32,
    profile_and_level: u8,
    progressive_sequence: bool,
    low_delay: bool,
    closed_gop: bool,
}

impl Mpeg2Parser {
    pub fn new() -> Self {
        Self {
            chroma_format: 1,
            ..Default::default()
        }
    }

    fn parse_sequence_header(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() < 8 {
            return Err(Error::SyntaxViolation("sequence header too short".into()));
        }
        self.width = ((payload[0] as u32) << 4) | ((payload[1] as u32) >> 4);
        self.height = (((payload[1] as u32) & 0x0f) << 8) | (payload[2] as u32);
        let aspect_code = payload[3] >> 4;
        let frame_rate_code = payload[3] & 0x0f;
        self.aspect_ratio = aspect_ratio_from_code(aspect_code);
        self.frame_rate = frame_rate_from_code(frame_rate_code);
        let bit_rate_hi = ((payload[4] as u32) << 10) | ((payload[5] as u32) << 2) | ((payload[6] as u32) >> 6);
        self.bit_rate = bit_rate_hi * 400;
        Ok(())
    }

    fn parse_sequence_extension(&mut self, payload: &[u8]) {
        if payload.len() < 6 {
            return;
        }
        self.profile_and_level = ((payload[0] & 0x0f) << 4) | (payload[1] >> 4);
        self.progressive_sequence = (payload[1] & 0x08) != 0;
        self.chroma_format = ((payload[1] >> 1) & 0x03) as u32;
        let horizontal_size_ext = ((payload[1] as u32 & 1) << 1) | (payload[2] as u32 >> 7);
        let vertical_size_ext = (payload[2] as u32 >> 5) & 0x03;
        self.width |= horizontal_size_ext << 12;
        self.height |= vertical_size_ext << 12;
        self.low_delay = (payload[5] & 0x80) != 0;
    }

    fn parse_gop_header(&mut self, payload: &[u8]) {
        if payload.len() < 4 {
            return;
        }
        self.closed_gop = (payload[3] & 0x40) != 0;
    }
}

impl EssenceParser for Mpeg2Parser {
    type FrameInfo = FrameInfo;

    fn parse_frame_start(&mut self, bytes: &[u8]) -> i64 {
        match find_start_code(bytes, 0) {
            Some((pos, _)) => pos as i64,
            None => {
                if bytes.len() < 4 {
                    NULL_OFFSET
                } else {
                    NULL_FRAME_SIZE
                }
            }
        }
    }

    fn parse_frame_size(&mut self, bytes: &[u8]) -> i64 {
        let Some((first_pos, first_code)) = find_start_code(bytes, 0) else {
            return NULL_OFFSET;
        };
        if first_code != PICTURE_START {
            return NULL_FRAME_SIZE;
        }
        let mut pos = first_pos + 4;
        loop {
            let Some((next_pos, code)) = find_start_code(bytes, pos) else {
                return NULL_OFFSET;
            };
            if code == PICTURE_START {
                return next_pos as i64;
            }
            pos = next_pos + 4;
        }
    }

    fn parse_frame_info(&mut self, bytes: &[u8], size: usize) -> Result<FrameInfo> {
        let mut info = FrameInfo::default();
        let mut pos = 0usize;
        while pos + 4 <= size {
            let Some((start, code)) = find_start_code(&bytes[..size], pos) else {
                break;
            };
            let payload_start = start + 4;
            let next = find_start_code(&bytes[..size], payload_start)
                .map(|(p, _)| p)
                .unwrap_or(size);
            let payload = &bytes[payload_start..next];

            match code {
                SEQUENCE_HEADER => self.parse_sequence_header(payload)?,
                GOP_HEADER => self.parse_gop_header(payload),
                EXTENSION_START if !payload.is_empty() => {
                    let extension_id = payload[0] >> 4;
                    match extension_id {
                        SEQUENCE_EXTENSION_ID => self.parse_sequence_extension(&payload[0..]),
                        PICTURE_CODING_EXTENSION_ID if payload.len() >= 3 => {
                            info.top_field_first = (payload[1] & 0x80) != 0;
                        }
                        DISPLAY_EXTENSION_ID if !payload.is_empty() => {
                            let colour_description_flag = (payload[0] & 0x01) != 0;
                            if colour_description_flag && payload.len() >= 4 {
                                info.color_primaries = payload[1];
                                info.transfer_characteristics = payload[2];
                                info.matrix_coefficients = payload[3];
                            }
                        }
                        _ => {}
                    }
                }
                PICTURE_START => {
                    if payload.len() >= 4 {
                        info.temporal_reference = ((payload[0] as u32) << 2) | (payload[1] as u32 >> 6);
                        let picture_coding_type = (payload[1] >> 3) & 0x07;
                        info.frame_type = match picture_coding_type {
                            1 => Some(FrameType::I),
                            2 => Some(FrameType::P),
                            3 => Some(FrameType::B),
                            _ => None,
                        };
                        info.vbv_delay =
                            (((payload[1] as u32) & 0x07) << 13) | ((payload[2] as u32) << 5) | (payload[3] as u32 >> 3);
                    }
                }
                _ => {}
            }
            pos = next;
        }

        info.width = self.width;
        info.height = self.height;
        info.chroma_format = self.chroma_format;
        info.frame_rate = self.frame_rate;
        info.aspect_ratio = self.aspect_ratio;
        info.bit_rate = self.bit_rate;
        info.low_delay = self.low_delay;
        info.profile_and_level = self.profile_and_level;
        info.progressive = self.progressive_sequence;
        info.closed_gop = self.closed_gop;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_codes() {
        assert_eq!(aspect_ratio_from_code(3), (16, 9));
    }

    #[test]
    fn frame_rate_codes() {
        assert_eq!(frame_rate_from_code(4), (30000, 1001));
    }

    #[test]
    fn frame_boundary_at_next_picture_start_code() {
        let mut parser = Mpeg2Parser::new();
        let mut bytes = vec![0x00, 0x00, 0x01, PICTURE_START, 0, 0, 0, 0];
        bytes.extend_from_slice(&[0x00, 0x00, 0x01, PICTURE_START, 0, 0, 0, 0]);
        let size = parser.parse_frame_size(&bytes);
        assert_eq!(size, 8);
    }
}
