//! Standard buffered disk I/O backend.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::file::{MxfFile, OpenMode};

/// A file backed by ordinary OS-buffered disk I/O.
#[derive(Debug)]
pub struct DiskFile {
    file: File,
    size: u64,
}

impl DiskFile {
    /// Open `path` according to `mode`.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
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
        let size = file.metadata()?.len();
        debug!(?path, ?mode, size, "opened disk file");
        Ok(Self { file, size })
    }

}

impl MxfFile for DiskFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.file.write(buf)?;
        let pos = self.file.stream_position()?;
        if pos > self.size {
            self.size = pos;
        }
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos)?)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_file_round_trips_through_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk_file_test.bin");

        let mut f = DiskFile::open(&path, OpenMode::New).unwrap();
        f.write_all(b"hello disk").unwrap();
        assert_eq!(f.size().unwrap(), 10);

        let mut f = DiskFile::open(&path, OpenMode::Read).unwrap();
        let mut buf = [0u8; 10];
        f.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello disk");
    }

    #[test]
    fn modify_mode_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk_file_modify.bin");

        DiskFile::open(&path, OpenMode::New)
            .unwrap()
            .write_all(b"0123456789")
            .unwrap();

        let mut f = DiskFile::open(&path, OpenMode::Modify).unwrap();
        f.seek(SeekFrom::Start(3)).unwrap();
        f.write_all(b"XYZ").unwrap();

        let mut f = DiskFile::open(&path, OpenMode::Read).unwrap();
        let mut buf = [0u8; 10];
        f.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"012XYZ6789");
    }
}
