//! Read-only HTTP range-request file backend.
//!
//! One of several possible implementations of [`MxfFile`] for a URL backed
//! essence or metadata source, following the shape of `MXFHTTPFile.cpp`: the
//! server must advertise `Accept-Ranges: bytes`; reads are served from a
//! read-ahead buffer that is discarded whenever the cursor jumps somewhere
//! not contiguous with what's already buffered, triggering a fresh ranged
//! request.

use std::io::SeekFrom;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::file::MxfFile;

/// Minimum number of bytes fetched per range request, to avoid one request
/// per KLV key read.
pub const DEFAULT_MIN_READ_AHEAD: u64 = 64 * 1024;

#[derive(Debug)]
pub struct HttpFile {
    client: Client,
    url: String,
    size: u64,
    min_read_ahead: u64,
    position: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
}

impl HttpFile {
    pub fn open(url: impl Into<String>) -> Result<Self> {
        Self::open_with(url, DEFAULT_MIN_READ_AHEAD)
    }

    pub fn open_with(url: impl Into<String>, min_read_ahead: u64) -> Result<Self> {
        let url = url.into();
        let client = Client::new();
        let resp = client
            .head(&url)
            .send()
            .map_err(|e| Error::Http(e.to_string()))?;

        let accepts_ranges = resp
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("bytes"))
            .unwrap_or(false);
        if !accepts_ranges {
            return Err(Error::RangeRequestsUnsupported(url));
        }

        let size = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| Error::Http("missing Content-Length".into()))?;

        debug!(%url, size, "opened HTTP range file");
        Ok(Self {
            client,
            url,
            size,
            min_read_ahead,
            position: 0,
            buffer: Vec::new(),
            buffer_start: 0,
        })
    }

    fn buffer_end(&self) -> u64 {
        self.buffer_start + self.buffer.len() as u64
    }

    fn fill_buffer(&mut self, from: u64, want: u64) -> Result<()> {
        let want = want.max(self.min_read_ahead).min(self.size - from);
        let to = (from + want).min(self.size).saturating_sub(1);
        trace!(from, to, "issuing HTTP range request");

        let resp = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={}-{}", from, to))
            .send()
            .map_err(|e| Error::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Http(format!(
                "range request returned status {}",
                resp.status()
            )));
        }
        if resp.headers().get(CONTENT_RANGE).is_none() && resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
            warn!(url = %self.url, "server ignored Range header, got a full response");
        }

        let bytes = resp.bytes().map_err(|e| Error::Http(e.to_string()))?;
        self.buffer = bytes.to_vec();
        self.buffer_start = from;
        Ok(())
    }
}

impl MxfFile for HttpFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.position >= self.size {
            return Ok(0);
        }
        let contiguous = self.position >= self.buffer_start && self.position <= self.buffer_end();
        let covers_request = self.position + buf.len() as u64 <= self.buffer_end();
        if !contiguous || !covers_request {
            if !contiguous {
                trace!(position = self.position, "non-contiguous seek, discarding read-ahead buffer");
            }
            self.fill_buffer(self.position, buf.len() as u64)?;
        }

        let off = (self.position - self.buffer_start) as usize;
        let available = self.buffer.len().saturating_sub(off);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.buffer[off..off + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::ReadOnly)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(o) => o,
            SeekFrom::Current(d) => {
                if d >= 0 {
                    self.position.saturating_add(d as u64)
                } else {
                    self.position
                        .checked_sub(d.unsigned_abs())
                        .ok_or(Error::Overflow("http file seek before start"))?
                }
            }
            SeekFrom::End(d) => {
                if d >= 0 {
                    self.size.saturating_add(d as u64)
                } else {
                    self.size
                        .checked_sub(d.unsigned_abs())
                        .ok_or(Error::Overflow("http file seek before start"))?
                }
            }
        };
        self.position = target;
        Ok(self.position)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.size)
    }
}
