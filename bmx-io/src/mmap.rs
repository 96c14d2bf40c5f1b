//! Memory-mapped file backend.
//!
//! A fixed-size view into the underlying file is kept mapped at all times;
//! the cursor crossing the view's boundary triggers a remap centred on the
//! new position. Writes past the current file size grow the file in large
//! chunks rather than one page at a time, matching the "amortize the growth"
//! rationale the teacher crate applies to its own buffer types.

use std::fs::{File, OpenOptions};
use std::io::SeekFrom;
use std::path::Path;

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::file::{MxfFile, OpenMode};

/// Default size of the mapped view kept resident at any one time.
pub const DEFAULT_VIEW_SIZE: u64 = 4 * 1024 * 1024;
/// Default amount by which the file is grown when a write needs more space.
pub const DEFAULT_GROW_CHUNK: u64 = 32 * 1024 * 1024;

enum View {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl View {
    fn as_slice(&self) -> &[u8] {
        match self {
            View::ReadOnly(m) => m,
            View::ReadWrite(m) => m,
        }
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match self {
            View::ReadOnly(_) => Err(Error::ReadOnly),
            View::ReadWrite(m) => Ok(m),
        }
    }
}

/// A memory-mapped file, remapped in fixed-size windows as the cursor moves.
pub struct MmapFile {
    file: File,
    writable: bool,
    file_size: u64,
    logical_size: u64,
    view_size: u64,
    grow_chunk: u64,
    view_start: u64,
    view: View,
    position: u64,
}

impl std::fmt::Debug for MmapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapFile")
            .field("writable", &self.writable)
            .field("file_size", &self.file_size)
            .field("logical_size", &self.logical_size)
            .field("view_start", &self.view_start)
            .field("position", &self.position)
            .finish()
    }
}

impl MmapFile {
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        Self::open_with(path, mode, DEFAULT_VIEW_SIZE, DEFAULT_GROW_CHUNK)
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        view_size: u64,
        grow_chunk: u64,
    ) -> Result<Self> {
        let path = path.as_ref();
        let writable = matches!(mode, OpenMode::New | OpenMode::Modify);
        let file = match mode {
            OpenMode::New => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
            OpenMode::Read => OpenOptions::new().read(true).open(path)?,
            OpenMode::Modify => OpenOptions::new().read(true).write(true).open(path)?,
        };
        let file_size = file.metadata()?.len();
        let view = Self::map_view(&file, 0, view_size, file_size, writable)?;
        debug!(?path, writable, file_size, "opened mmap file");
        Ok(Self {
            file,
            writable,
            file_size,
            logical_size: file_size,
            view_size,
            grow_chunk,
            view_start: 0,
            view,
            position: 0,
        })
    }

    fn map_view(file: &File, start: u64, size: u64, file_size: u64, writable: bool) -> Result<View> {
        let len = size.min(file_size.saturating_sub(start)).max(1);
        if writable {
            let m = unsafe { MmapOptions::new().offset(start).len(len as usize).map_mut(file)? };
            Ok(View::ReadWrite(m))
        } else {
            let m = unsafe { MmapOptions::new().offset(start).len(len as usize).map(file)? };
            m.advise(memmap2::Advice::WillNeed).ok();
            Ok(View::ReadOnly(m))
        }
    }

    fn ensure_file_capacity(&mut self, required: u64) -> Result<()> {
        if required <= self.file_size {
            return Ok(());
        }
        let new_size = self.file_size + ((required - self.file_size).div_ceil(self.grow_chunk)) * self.grow_chunk;
        self.file.set_len(new_size)?;
        self.file_size = new_size;
        trace!(new_size, "grew mmap-backed file");
        self.remap(self.view_start)
    }

    fn remap(&mut self, start: u64) -> Result<()> {
        self.view = Self::map_view(&self.file, start, self.view_size, self.file_size, self.writable)?;
        self.view_start = start;
        Ok(())
    }

    fn ensure_view_contains(&mut self, pos: u64, len: u64) -> Result<()> {
        let view_end = self.view_start + self.view.as_slice().len() as u64;
        if pos >= self.view_start && pos + len <= view_end {
            return Ok(());
        }
        let new_start = pos.saturating_sub(self.view_size / 2);
        self.remap(new_start)
    }

    /// Truncate the backing file down to the logical size on close; the
    /// grow-chunk may have left the file larger than the data written.
    pub fn finish(mut self) -> Result<()> {
        if self.writable && self.file_size != self.logical_size {
            self.view = View::ReadOnly(unsafe { MmapOptions::new().len(1).map(&self.file)? });
            self.file.set_len(self.logical_size)?;
        }
        Ok(())
    }
}

impl MxfFile for MmapFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.position >= self.logical_size {
            return Ok(0);
        }
        let available = (self.logical_size - self.position).min(buf.len() as u64);
        self.ensure_view_contains(self.position, available)?;
        let off = (self.position - self.view_start) as usize;
        let n = available as usize;
        buf[..n].copy_from_slice(&self.view.as_slice()[off..off + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        let end = self.position + buf.len() as u64;
        self.ensure_file_capacity(end)?;
        self.ensure_view_contains(self.position, buf.len() as u64)?;
        let off = (self.position - self.view_start) as usize;
        self.view.as_mut_slice()?[off..off + buf.len()].copy_from_slice(buf);
        self.position += buf.len() as u64;
        if self.position > self.logical_size {
            self.logical_size = self.position;
        }
        Ok(buf.len())
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
                        .ok_or(Error::Overflow("mmap file seek before start"))?
                }
            }
            SeekFrom::End(d) => {
                if d >= 0 {
                    self.logical_size.saturating_add(d as u64)
                } else {
                    self.logical_size
                        .checked_sub(d.unsigned_abs())
                        .ok_or(Error::Overflow("mmap file seek before start"))?
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
        Ok(self.logical_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_reopen_read_only_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmap_file_test.bin");

        let mut f = MmapFile::open(&path, OpenMode::New).unwrap();
        f.write_all(b"mapped bytes").unwrap();
        f.finish().unwrap();

        let mut f = MmapFile::open(&path, OpenMode::Read).unwrap();
        assert_eq!(f.size().unwrap(), 12);
        let mut buf = [0u8; 12];
        f.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"mapped bytes");
    }

    #[test]
    fn write_beyond_initial_file_size_grows_the_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mmap_file_grow.bin");

        // View and grow-chunk sizes both comfortably larger than the
        // payload, so a single write/read never needs a view wider than the
        // configured window.
        let mut f = MmapFile::open_with(&path, OpenMode::New, 1024, 1024).unwrap();
        let payload = vec![0xabu8; 64];
        f.write_all(&payload).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut readback = vec![0u8; 64];
        f.read_exact(&mut readback).unwrap();
        assert_eq!(readback, payload);
    }
}
