//! Checksumming file wrapper, grounded on `MXFChecksumFile.cpp`'s "force
//! update" semantics: the digest must stay in lock-step with the highest
//! position read or written so far. In force-update mode, a seek or read
//! past the digested position first reads forward from the digested
//! position to bring the running hash up to date before satisfying the
//! caller, rather than rejecting the operation outright.

use std::io::SeekFrom;

use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::file::MxfFile;

/// Digest algorithm applied to bytes as they are read/written in order.
#[derive(Debug)]
pub enum Digest {
    Md5(md5::Context),
    Sha1(sha1::Sha1),
    Crc32(crc32fast::Hasher),
}

impl Digest {
    pub fn md5() -> Self {
        Digest::Md5(md5::Context::new())
    }
    pub fn sha1() -> Self {
        use sha1::Digest as _;
        Digest::Sha1(sha1::Sha1::new())
    }
    pub fn crc32() -> Self {
        Digest::Crc32(crc32fast::Hasher::new())
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Digest::Md5(ctx) => ctx.consume(data),
            Digest::Sha1(h) => {
                use sha1::Digest as _;
                h.update(data);
            }
            Digest::Crc32(h) => h.update(data),
        }
    }

    /// Hex-encoded digest of everything consumed so far. Does not require
    /// cloning the underlying state for MD5/CRC32; SHA-1 reports the value
    /// from a finalize-without-consume.
    pub fn hex_digest(&self) -> String {
        match self {
            Digest::Md5(ctx) => hex::encode(ctx.clone().compute().0),
            Digest::Sha1(h) => {
                use sha1::Digest as _;
                hex::encode(h.clone().finalize())
            }
            Digest::Crc32(h) => hex::encode(h.clone().finalize().to_be_bytes()),
        }
    }
}

/// Wraps another [`MxfFile`], maintaining a running digest over bytes read
/// or written in position order.
#[derive(Debug)]
pub struct ChecksumFile<F: MxfFile> {
    inner: F,
    digest: Digest,
    /// Highest position up to which `digest` has consumed bytes.
    digested_position: u64,
    /// When true, a read/seek past `digested_position` reads forward to
    /// catch the digest up instead of erroring.
    force_update: bool,
    position: u64,
}

impl<F: MxfFile> ChecksumFile<F> {
    pub fn new(inner: F, digest: Digest) -> Self {
        Self {
            inner,
            digest,
            digested_position: 0,
            force_update: true,
            position: 0,
        }
    }

    pub fn with_force_update(mut self, force_update: bool) -> Self {
        self.force_update = force_update;
        self
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Read forward from `digested_position` to `up_to`, feeding the digest,
    /// without disturbing the caller-visible cursor.
    fn update_checksum_to_position(&mut self, up_to: u64) -> Result<()> {
        if up_to <= self.digested_position {
            return Ok(());
        }
        let saved_pos = self.inner.tell()?;
        self.inner.seek(SeekFrom::Start(self.digested_position))?;
        let mut buf = vec![0u8; 64 * 1024];
        while self.digested_position < up_to {
            let want = ((up_to - self.digested_position) as usize).min(buf.len());
            let n = self.inner.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            self.digest.update(&buf[..n]);
            self.digested_position += n as u64;
        }
        self.inner.seek(SeekFrom::Start(saved_pos))?;
        trace!(up_to = self.digested_position, "updated checksum");
        Ok(())
    }

    /// Read forward to the end of a non-seekable stream, used when closing
    /// a checksum file wrapping something like an HTTP body.
    pub fn update_checksum_to_nonseekable_end(&mut self) -> Result<()> {
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = self.inner.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.digest.update(&buf[..n]);
            self.digested_position += n as u64;
        }
        Ok(())
    }
}

impl<F: MxfFile> MxfFile for ChecksumFile<F> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.position < self.digested_position {
            warn!(
                position = self.position,
                digested = self.digested_position,
                "reading behind the digested position"
            );
            if !self.force_update {
                return Err(Error::ChecksumDesync {
                    position: self.position,
                    digested: self.digested_position,
                });
            }
        }
        self.inner.seek(SeekFrom::Start(self.position))?;
        let n = self.inner.read(buf)?;
        if self.position == self.digested_position {
            self.digest.update(&buf[..n]);
            self.digested_position += n as u64;
        } else if self.force_update {
            self.update_checksum_to_position(self.position + n as u64)?;
        }
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.position < self.digested_position {
            // Rewriting already-digested bytes can never be reconciled by
            // reading forward, regardless of `force_update`.
            warn!(
                position = self.position,
                digested = self.digested_position,
                "write would rewrite already-digested bytes"
            );
            return Err(Error::ChecksumDesync {
                position: self.position,
                digested: self.digested_position,
            });
        }
        if self.position > self.digested_position {
            if !self.force_update {
                return Err(Error::ChecksumDesync {
                    position: self.position,
                    digested: self.digested_position,
                });
            }
            self.update_checksum_to_position(self.position)?;
        }
        self.inner.seek(SeekFrom::Start(self.position))?;
        let n = self.inner.write(buf)?;
        if self.position == self.digested_position {
            self.digest.update(&buf[..n]);
            self.digested_position += n as u64;
        }
        self.position += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let size = self.inner.size()?;
        let target = match pos {
            SeekFrom::Start(o) => o,
            SeekFrom::Current(d) => {
                if d >= 0 {
                    self.position.saturating_add(d as u64)
                } else {
                    self.position
                        .checked_sub(d.unsigned_abs())
                        .ok_or(Error::Overflow("checksum file seek before start"))?
                }
            }
            SeekFrom::End(d) => {
                if d >= 0 {
                    size.saturating_add(d as u64)
                } else {
                    size.checked_sub(d.unsigned_abs())
                        .ok_or(Error::Overflow("checksum file seek before start"))?
                }
            }
        };
        if self.force_update && target > self.digested_position {
            self.update_checksum_to_position(target)?;
        }
        self.position = target;
        Ok(self.position)
    }

    fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    fn size(&mut self) -> Result<u64> {
        self.inner.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFile;

    #[test]
    fn sequential_write_digests_every_byte() {
        let mut f = ChecksumFile::new(MemoryFile::new(), Digest::crc32());
        f.write_all(b"hello world").unwrap();
        let mut expected = crc32fast::Hasher::new();
        expected.update(b"hello world");
        assert_eq!(f.digest().hex_digest(), hex::encode(expected.finalize().to_be_bytes()));
    }

    #[test]
    fn force_update_catches_up_on_forward_seek() {
        let mut f = ChecksumFile::new(MemoryFile::new(), Digest::crc32());
        f.write_all(b"0123456789").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f.write_all(b"ab").unwrap();
        f.seek(SeekFrom::Start(10)).unwrap();
        let mut expected = crc32fast::Hasher::new();
        expected.update(b"ab23456789");
        assert_eq!(f.digest().hex_digest(), hex::encode(expected.finalize().to_be_bytes()));
    }
}
