//! RDD-6 audio metadata parser: Dolby E / Dolby Digital data segments
//! packaged into SMPTE ST 2020 frames.

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::bitreader::BitReader;
use crate::error::{Error, Result};

const SYNC_SEGMENT: [u8; 2] = [0x96, 0xf8];
const END_OF_FRAME_SYNC: [u8; 2] = [0xf8, 0x72];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSegmentType {
    DolbyEComplete,
    DolbyEEssential,
    DolbyDigitalComplete,
    DolbyDigitalEssential,
    ExtBsi,
}

impl DataSegmentType {
    fn from_id(id: u16) -> Option<Self> {
        match id {
            0x0000 => Some(Self::DolbyEComplete),
            0x0001 => Some(Self::DolbyEEssential),
            0x0002 => Some(Self::DolbyDigitalComplete),
            0x0003 => Some(Self::DolbyDigitalEssential),
            0x0004 => Some(Self::ExtBsi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataSegment {
    pub segment_type: DataSegmentType,
    pub payload_bits: usize,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct FrameInfo {
    pub segments: Vec<SegmentSummary>,
}

#[derive(Debug, Clone)]
pub struct SegmentSummary {
    pub segment_type: DataSegmentType,
    pub payload_bits: usize,
}

impl Default for SegmentSummary {
    fn default() -> Self {
        Self {
            segment_type: DataSegmentType::DolbyEComplete,
            payload_bits: 0,
        }
    }
}

pub struct Rdd6Parser;

impl Default for Rdd6Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Rdd6Parser {
    pub fn new() -> Self {
        Self
    }

    /// Parse one ST 2020 frame: sync segment, a run of data segments, and a
    /// closing end-of-frame sync word.
    pub fn parse_frame(&mut self, bytes: &[u8]) -> Result<Vec<DataSegment>> {
        if bytes.len() < 2 || bytes[0..2] != SYNC_SEGMENT {
            return Err(Error::UnexpectedMarker {
                expected: u16::from_be_bytes(SYNC_SEGMENT),
                found: u16::from_be_bytes(bytes.get(0..2).map(|s| [s[0], s[1]]).unwrap_or([0, 0])),
            });
        }
        let mut r = BitReader::new(&bytes[2..]);
        let mut segments = Vec::new();
        loop {
            if r.bits_remaining() < 16 {
                break;
            }
            let marker = r.read_bits(16)?;
            if marker as u16 == u16::from_be_bytes(END_OF_FRAME_SYNC) {
                break;
            }
            let segment_id = (marker >> 4) as u16 & 0x0fff;
            let Some(segment_type) = DataSegmentType::from_id(segment_id & 0x7) else {
                return Err(Error::SyntaxViolation(format!(
                    "unknown RDD-6 data segment id {segment_id}"
                )));
            };
            let payload_bits = r.read_bits(16)? as usize;
            if r.bits_remaining() < payload_bits {
                return Err(Error::BitstreamUnderrun("RDD-6 data segment payload"));
            }
            let mut payload = vec![0u8; payload_bits.div_ceil(8)];
            for byte in payload.iter_mut() {
                let mut b = 0u8;
                for _ in 0..8.min(payload_bits) {
                    b = (b << 1) | r.read_bit()? as u8;
                }
                *byte = b;
            }
            segments.push(DataSegment {
                segment_type,
                payload_bits,
                payload,
            });
        }
        Ok(segments)
    }

    pub fn frame_info(segments: &[DataSegment]) -> FrameInfo {
        FrameInfo {
            segments: segments
                .iter()
                .map(|s| SegmentSummary {
                    segment_type: s.segment_type,
                    payload_bits: s.payload_bits,
                })
                .collect(),
        }
    }
}

/// Serialize parsed data segments to the RDD-6 authoring XML schema.
pub fn segments_to_xml(segments: &[DataSegment]) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Start(BytesStart::new("Dolby_E_Metadata")))
        .map_err(Error::Xml)?;
    for segment in segments {
        let tag = match segment.segment_type {
            DataSegmentType::DolbyEComplete => "complete_metadata",
            DataSegmentType::DolbyEEssential => "essential_metadata",
            DataSegmentType::DolbyDigitalComplete => "dd_complete_metadata",
            DataSegmentType::DolbyDigitalEssential => "dd_essential_metadata",
            DataSegmentType::ExtBsi => "ext_bsi_metadata",
        };
        writer
            .write_event(Event::Start(BytesStart::new(tag)))
            .map_err(Error::Xml)?;
        writer
            .write_event(Event::Text(BytesText::new(&hex::encode(&segment.payload))))
            .map_err(Error::Xml)?;
        writer
            .write_event(Event::End(quick_xml::events::BytesEnd::new(tag)))
            .map_err(Error::Xml)?;
    }
    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new("Dolby_E_Metadata")))
        .map_err(Error::Xml)?;
    String::from_utf8(writer.into_inner()).map_err(|e| Error::SyntaxViolation(e.to_string()))
}

/// Parse the RDD-6 authoring XML schema back into data segments.
pub fn segments_from_xml(xml: &str) -> Result<Vec<DataSegment>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut segments = Vec::new();
    let mut current: Option<DataSegmentType> = None;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(Error::Xml)? {
            Event::Start(e) => {
                current = match e.name().as_ref() {
                    b"complete_metadata" => Some(DataSegmentType::DolbyEComplete),
                    b"essential_metadata" => Some(DataSegmentType::DolbyEEssential),
                    b"dd_complete_metadata" => Some(DataSegmentType::DolbyDigitalComplete),
                    b"dd_essential_metadata" => Some(DataSegmentType::DolbyDigitalEssential),
                    b"ext_bsi_metadata" => Some(DataSegmentType::ExtBsi),
                    _ => current,
                };
            }
            Event::Text(t) => {
                if let Some(segment_type) = current {
                    let text = t.unescape().map_err(Error::Xml)?.into_owned();
                    if let Ok(payload) = hex::decode(text.trim()) {
                        segments.push(DataSegment {
                            segment_type,
                            payload_bits: payload.len() * 8,
                            payload,
                        });
                    }
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_round_trips_a_segment() {
        let segments = vec![DataSegment {
            segment_type: DataSegmentType::DolbyEComplete,
            payload_bits: 16,
            payload: vec![0xab, 0xcd],
        }];
        let xml = segments_to_xml(&segments).unwrap();
        let parsed = segments_from_xml(&xml).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].payload, vec![0xab, 0xcd]);
    }

    #[test]
    fn rejects_frame_missing_sync() {
        let mut parser = Rdd6Parser::new();
        assert!(parser.parse_frame(&[0, 0, 0]).is_err());
    }
}
