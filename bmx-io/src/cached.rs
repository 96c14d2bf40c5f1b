//! Page cache in front of another [`MxfFile`].
//!
//! Ported from the page-replacement scheme in `mxf_cache_file.c`: pages are
//! stored in a direct-mapped table indexed by `pageNumber mod numPages`.
//! Dirty pages are kept contiguous in that table so that flushing can always
//! be expressed as a single sequential write; a read or write that would
//! break contiguity flushes first. Eviction of a dirty page on write flushes
//! just that page.

use std::io::SeekFrom;

use tracing::trace;

use crate::error::Result;
use crate::file::MxfFile;

/// Default OS-page-aligned cache page size (4 pages of 4 KiB).
pub const DEFAULT_PAGE_SIZE: usize = 16 * 1024;
/// Default number of pages held in the cache.
pub const DEFAULT_NUM_PAGES: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Page {
    /// Page-aligned absolute byte position this slot currently caches.
    position: i64,
    /// Number of valid bytes in this page (may be less than `page_size` at EOF).
    size: u32,
    dirty: bool,
}

impl Page {
    const EMPTY: Self = Page {
        position: -1,
        size: 0,
        dirty: false,
    };
}

/// A read/write page cache wrapping any other [`MxfFile`].
#[derive(Debug)]
pub struct CachedFile<F: MxfFile> {
    target: F,
    data: Vec<u8>,
    pages: Vec<Page>,
    page_size: usize,
    num_pages: usize,
    first_dirty_page: usize,
    dirty_count: usize,
    position: u64,
    size: u64,
}

impl<F: MxfFile> CachedFile<F> {
    pub fn new(target: F, page_size: usize, num_pages: usize) -> Result<Self> {
        let mut f = target;
        let size = f.size()?;
        Ok(Self {
            target: f,
            data: vec![0u8; page_size * num_pages],
            pages: vec![Page::EMPTY; num_pages],
            page_size,
            num_pages,
            first_dirty_page: 0,
            dirty_count: 0,
            position: 0,
            size,
        })
    }

    pub fn with_defaults(target: F) -> Result<Self> {
        Self::new(target, DEFAULT_PAGE_SIZE, DEFAULT_NUM_PAGES)
    }

    fn current_page_info(&self) -> (i64, usize, usize) {
        let page_number = self.position as i64 / self.page_size as i64;
        let page_position = page_number * self.page_size as i64;
        let page_index = (page_number as u64 % self.num_pages as u64) as usize;
        let page_offset = (self.position as i64 - page_position) as usize;
        (page_position, page_index, page_offset)
    }

    /// Flush `pages_required` pages starting at `page_index`, extending the
    /// range so that any dirty run stays contiguous on disk.
    fn flush_dirty_pages(&mut self, page_index: usize, pages_required: usize) -> Result<()> {
        if self.dirty_count == 0 || pages_required == 0 {
            return Ok(());
        }

        let mut rem_pages = pages_required;
        let mut clean_index = page_index;

        while self.dirty_count > 0 && rem_pages > 0 {
            let is_dirty = self.pages[clean_index].dirty;
            let mut num_clean_pages = if is_dirty {
                if clean_index >= self.first_dirty_page {
                    self.dirty_count - (clean_index - self.first_dirty_page)
                } else {
                    ((self.first_dirty_page + self.dirty_count) % self.num_pages) - clean_index
                }
            } else if clean_index >= self.first_dirty_page {
                self.num_pages - clean_index
            } else {
                self.first_dirty_page - clean_index
            };

            // Flush to the end of the contiguous dirty run to keep it contiguous.
            if is_dirty && clean_index != self.first_dirty_page && rem_pages < num_clean_pages {
                rem_pages = num_clean_pages;
            }
            num_clean_pages = num_clean_pages.min(self.num_pages - clean_index);
            num_clean_pages = num_clean_pages.min(rem_pages.max(1));

            if is_dirty {
                let last = clean_index + num_clean_pages - 1;
                let write_len =
                    (num_clean_pages - 1) * self.page_size + self.pages[last].size as usize;
                let start_pos = self.pages[clean_index].position;

                self.target.seek(SeekFrom::Start(start_pos as u64))?;
                let start_off = clean_index * self.page_size;
                self.target
                    .write_all(&self.data[start_off..start_off + write_len])?;

                for i in 0..num_clean_pages {
                    self.pages[clean_index + i].dirty = false;
                }
                self.dirty_count -= num_clean_pages;
                if clean_index == self.first_dirty_page {
                    self.first_dirty_page = (self.first_dirty_page + num_clean_pages) % self.num_pages;
                }
                trace!(start_pos, write_len, "flushed contiguous dirty pages");
            }

            clean_index = (clean_index + num_clean_pages) % self.num_pages;
            rem_pages -= num_clean_pages;
        }

        Ok(())
    }

    /// Flush every dirty page, in order, as one or more sequential writes.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_dirty_pages(self.first_dirty_page, self.num_pages)
    }

    fn load_page(&mut self, page_index: usize, page_position: i64) -> Result<()> {
        self.flush_dirty_pages(page_index, 1)?;
        self.target.seek(SeekFrom::Start(page_position as u64))?;
        let off = page_index * self.page_size;
        let n = self.target.read(&mut self.data[off..off + self.page_size])?;
        self.pages[page_index] = Page {
            position: page_position,
            size: n as u32,
            dirty: false,
        };
        Ok(())
    }

    fn mark_dirty(&mut self, page_index: usize) {
        if self.pages[page_index].dirty {
            return;
        }
        self.pages[page_index].dirty = true;
        if self.dirty_count == 0 {
            self.first_dirty_page = page_index;
            self.dirty_count = 1;
        } else {
            // Grow the contiguous run; a page not adjacent to the current run
            // is handled conservatively by flushing the existing run first.
            let run_end = (self.first_dirty_page + self.dirty_count) % self.num_pages;
            if page_index == run_end {
                self.dirty_count += 1;
            } else if page_index + 1 == self.first_dirty_page {
                self.first_dirty_page = page_index;
                self.dirty_count += 1;
            } else {
                self.first_dirty_page = page_index;
                self.dirty_count = 1;
            }
        }
    }
}

impl<F: MxfFile> MxfFile for CachedFile<F> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut remaining = buf.len();
        let mut filled = 0;
        while remaining > 0 {
            let (page_position, page_index, page_offset) = self.current_page_info();
            if self.pages[page_index].position != page_position {
                self.load_page(page_index, page_position)?;
            }
            let page = self.pages[page_index];
            if page_offset >= page.size as usize {
                break;
            }
            let avail = page.size as usize - page_offset;
            let take = avail.min(remaining);
            let off = page_index * self.page_size + page_offset;
            buf[filled..filled + take].copy_from_slice(&self.data[off..off + take]);
            filled += take;
            remaining -= take;
            self.position += take as u64;
        }
        Ok(filled)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut remaining = buf.len();
        let mut written = 0;
        while remaining > 0 {
            let (page_position, page_index, page_offset) = self.current_page_info();
            if self.pages[page_index].position != page_position {
                // A fresh page being written from offset 0 for a full page
                // does not need a read-before-write; otherwise load it so
                // partial writes preserve the rest of the page.
                if page_offset == 0 && remaining >= self.page_size {
                    self.flush_dirty_pages(page_index, 1)?;
                    self.pages[page_index] = Page {
                        position: page_position,
                        size: 0,
                        dirty: false,
                    };
                } else {
                    self.load_page(page_index, page_position)?;
                }
            }
            let take = (self.page_size - page_offset).min(remaining);
            let off = page_index * self.page_size + page_offset;
            self.data[off..off + take].copy_from_slice(&buf[written..written + take]);
            self.mark_dirty(page_index);
            let page = &mut self.pages[page_index];
            page.size = page.size.max((page_offset + take) as u32);
            written += take;
            remaining -= take;
            self.position += take as u64;
        }
        if self.position > self.size {
            self.size = self.position;
        }
        Ok(written)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(o) => o,
            SeekFrom::Current(d) => {
                if d >= 0 {
                    self.position + d as u64
                } else {
                    self.position.saturating_sub(d.unsigned_abs())
                }
            }
            SeekFrom::End(d) => {
                if d >= 0 {
                    self.size + d as u64
                } else {
                    self.size.saturating_sub(d.unsigned_abs())
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

impl<F: MxfFile> Drop for CachedFile<F> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFile;

    #[test]
    fn sequential_write_read_round_trip() {
        let mut f = CachedFile::new(MemoryFile::new(), 64, 4).unwrap();
        let data: Vec<u8> = (0..512u32).map(|i| (i % 251) as u8).collect();
        f.write_all(&data).unwrap();
        f.flush().unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut out = vec![0u8; data.len()];
        f.read_exact(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn partial_page_write_preserves_neighbours() {
        let mut f = CachedFile::new(MemoryFile::new(), 16, 2).unwrap();
        f.write_all(&[0xAAu8; 32]).unwrap();
        f.seek(SeekFrom::Start(4)).unwrap();
        f.write_all(&[0xBB; 4]).unwrap();
        f.flush().unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut out = [0u8; 32];
        f.read_exact(&mut out).unwrap();
        assert_eq!(&out[0..4], &[0xAA; 4]);
        assert_eq!(&out[4..8], &[0xBB; 4]);
        assert_eq!(&out[8..32], &[0xAA; 24]);
    }
}
