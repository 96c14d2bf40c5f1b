//! Finite-state bitstream parsers for broadcast essence codecs.
//!
//! Every parser in this crate implements [`EssenceParser`]: restartable frame
//! boundary detection over a byte buffer, so the content-package assembler
//! can feed it data incrementally without knowing the codec's frame size up
//! front. Internal parameter sets (AVC SPS/PPS, MPEG-2 sequence headers, ...)
//! persist across calls, since later frames reference parameters carried by
//! earlier ones.

pub mod avc;
pub mod bitreader;
pub mod dv;
pub mod error;
pub mod jpeg2000;
pub mod mjpeg;
pub mod mpeg2;
pub mod rdd6;
pub mod rdd36;
pub mod vc2;
pub mod vc3;

pub use error::{Error, Result};

/// Sentinel returned by [`EssenceParser::parse_frame_start`] and
/// [`EssenceParser::parse_frame_size`] when no boundary/size can yet be
/// determined from the supplied buffer; the caller should provide more data.
pub const NULL_OFFSET: i64 = -1;

/// Sentinel returned when the buffer's content is structurally invalid and
/// scanning cannot continue.
pub const NULL_FRAME_SIZE: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    I,
    P,
    B,
}

/// Shared contract for every essence-kind parser in this crate.
///
/// `parse_frame_start` and `parse_frame_size` operate on a buffer that may
/// hold less than one full frame; callers grow the buffer and retry until a
/// non-`NULL_OFFSET` value is returned. Once a frame's extent is known,
/// `parse_frame_info` is called with exactly that many bytes to populate the
/// codec-specific accessors for the frame.
pub trait EssenceParser {
    type FrameInfo;

    /// Offset of the first frame's first byte within `bytes`, or
    /// [`NULL_OFFSET`] if more data is needed, or [`NULL_FRAME_SIZE`] if the
    /// buffer cannot contain a valid frame start.
    fn parse_frame_start(&mut self, bytes: &[u8]) -> i64;

    /// Size in bytes of the frame starting at offset 0 of `bytes`, or
    /// [`NULL_OFFSET`] if more data is needed, or [`NULL_FRAME_SIZE`] if the
    /// buffer does not contain a structurally valid frame.
    fn parse_frame_size(&mut self, bytes: &[u8]) -> i64;

    /// Fully decode the frame occupying `bytes[..size]`, updating persistent
    /// parser state and returning the codec-specific frame description.
    fn parse_frame_info(&mut self, bytes: &[u8], size: usize) -> Result<Self::FrameInfo>;
}
