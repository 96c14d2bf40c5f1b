//! Chunked in-memory file, used for clip headers that must be assembled
//! before the real output file's position is known.
//!
//! Per DESIGN NOTES §9 ("Chunked memory file growth"), chunk storage is a
//! `Vec<Chunk>` rather than the source's raw `realloc`'d array — the
//! allocator's growth policy amortizes resizes for us.

use std::io::SeekFrom;

use tracing::trace;

use crate::error::{Error, Result};
use crate::file::MxfFile;

const DEFAULT_CHUNK_SIZE: usize = 4096;

type Chunk = Vec<u8>;

/// A growable, chunked in-memory file.
///
/// Positions reported by `tell`/`seek` can be offset by a configurable
/// "virtual start position" so that, once flushed into a real file at some
/// byte offset, KLV lengths computed while the header was still in memory
/// remain correct.
#[derive(Debug)]
pub struct MemoryFile {
    chunks: Vec<Chunk>,
    chunk_size: usize,
    len: u64,
    position: u64,
    virtual_start: u64,
}

impl MemoryFile {
    /// Create an empty, growable memory file with the default chunk size.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create an empty, growable memory file with an explicit chunk size.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            chunks: Vec::new(),
            chunk_size,
            len: 0,
            position: 0,
            virtual_start: 0,
        }
    }

    /// Set the virtual start position: `tell()`/`seek()` on this file will
    /// behave as if the file began at this many bytes into some outer
    /// logical file.
    pub fn set_virtual_start_position(&mut self, start: u64) {
        self.virtual_start = start;
    }

    pub fn virtual_start_position(&self) -> u64 {
        self.virtual_start
    }

    /// Number of logical bytes stored, not counting the virtual offset.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn ensure_capacity(&mut self, end: u64) {
        let needed_chunks = end.div_ceil(self.chunk_size as u64) as usize;
        while self.chunks.len() < needed_chunks {
            self.chunks.push(vec![0u8; self.chunk_size]);
        }
    }

    fn local_position(&self) -> Result<u64> {
        self.position
            .checked_sub(self.virtual_start)
            .ok_or(Error::Overflow("memory file position below virtual start"))
    }
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self::new()
    }
}

impl MxfFile for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let local = self.local_position()?;
        if local >= self.len {
            return Ok(0);
        }
        let available = (self.len - local).min(buf.len() as u64) as usize;
        let mut copied = 0;
        while copied < available {
            let pos = local + copied as u64;
            let chunk_idx = (pos / self.chunk_size as u64) as usize;
            let chunk_off = (pos % self.chunk_size as u64) as usize;
            let chunk = &self.chunks[chunk_idx];
            let take = (chunk.len() - chunk_off).min(available - copied);
            buf[copied..copied + take].copy_from_slice(&chunk[chunk_off..chunk_off + take]);
            copied += take;
        }
        self.position += copied as u64;
        Ok(copied)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let local = self.local_position()?;
        let end = local
            .checked_add(buf.len() as u64)
            .ok_or(Error::Overflow("memory file write end"))?;
        self.ensure_capacity(end);

        let mut copied = 0;
        while copied < buf.len() {
            let pos = local + copied as u64;
            let chunk_idx = (pos / self.chunk_size as u64) as usize;
            let chunk_off = (pos % self.chunk_size as u64) as usize;
            let chunk = &mut self.chunks[chunk_idx];
            let take = (chunk.len() - chunk_off).min(buf.len() - copied);
            chunk[chunk_off..chunk_off + take].copy_from_slice(&buf[copied..copied + take]);
            copied += take;
        }
        self.position += copied as u64;
        if end > self.len {
            self.len = end;
        }
        trace!(written = copied, len = self.len, "memory file write");
        Ok(copied)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => self.virtual_start + offset,
            SeekFrom::Current(delta) => {
                if delta >= 0 {
                    self.position.saturating_add(delta as u64)
                } else {
                    self.position
                        .checked_sub(delta.unsigned_abs())
                        .ok_or(Error::Overflow("memory file seek before start"))?
                }
            }
            SeekFrom::End(delta) => {
                let end = self.virtual_start + self.len;
                if delta >= 0 {
                    end.saturating_add(delta as u64)
                } else {
                    end.checked_sub(delta.unsigned_abs())
                        .ok_or(Error::Overflow("memory file seek before start"))?
                }
            }
        };
        if target < self.virtual_start {
            return Err(Error::Overflow("memory file seek before virtual start"));
        }
        self.position = target;
        Ok(self.position)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.virtual_start + self.len)
    }
}

/// Read-only view over a borrowed byte slice, for parsing data already held
/// in memory (e.g. an mmap'd region) without an extra copy.
#[derive(Debug)]
pub struct BorrowedMemoryFile<'a> {
    data: &'a [u8],
    position: u64,
}

impl<'a> BorrowedMemoryFile<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }
}

impl MxfFile for BorrowedMemoryFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pos = self.position as usize;
        if pos >= self.data.len() {
            return Ok(0);
        }
        let n = (self.data.len() - pos).min(buf.len());
        buf[..n].copy_from_slice(&self.data[pos..pos + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::ReadOnly)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => {
                if delta >= 0 {
                    self.position.saturating_add(delta as u64)
                } else {
                    self.position
                        .checked_sub(delta.unsigned_abs())
                        .ok_or(Error::Overflow("borrowed file seek before start"))?
                }
            }
            SeekFrom::End(delta) => {
                let end = self.data.len() as u64;
                if delta >= 0 {
                    end.saturating_add(delta as u64)
                } else {
                    end.checked_sub(delta.unsigned_abs())
                        .ok_or(Error::Overflow("borrowed file seek before start"))?
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
        Ok(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::SeekFrom;

    #[test]
    fn write_then_read_round_trip() {
        let mut f = MemoryFile::with_chunk_size(8);
        f.write_all(b"hello world, this spans chunks").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut out = vec![0u8; 11];
        f.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"hello world");
    }

    #[test]
    fn virtual_start_position_offsets_reported_positions() {
        let mut f = MemoryFile::new();
        f.set_virtual_start_position(1024);
        assert_eq!(f.tell().unwrap(), 1024);
        f.write_all(b"abcd").unwrap();
        assert_eq!(f.tell().unwrap(), 1028);
        assert_eq!(f.size().unwrap(), 1028);
    }

    #[test]
    fn growth_across_many_chunks() {
        let mut f = MemoryFile::with_chunk_size(16);
        let data: Vec<u8> = (0..=255u8).collect();
        f.write_all(&data).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut out = vec![0u8; data.len()];
        f.read_exact(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
