//! Key-Length-Value triple read/write primitives, layered over
//! [`bmx_io::MxfFile`] and the BER length codec in [`crate::length`].

use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::key::{Key, KEY_LEN};
use crate::length::{read_ber_length, write_ber_length, write_fixed_ber_length};
use bmx_io::MxfFile;

/// A decoded KL header: the key, the declared value length, and the total
/// number of bytes the key+length pair itself occupied (needed by callers
/// computing a set's total footprint for fixed-space allocation).
#[derive(Debug, Clone, Copy)]
pub struct KlHeader {
    pub key: Key,
    pub value_length: u64,
    pub kl_size: u64,
}

/// Read a Key and BER Length, leaving the file positioned at the start of
/// the value.
pub fn read_kl(f: &mut dyn MxfFile) -> Result<KlHeader> {
    let start = f.tell()?;
    let key = Key::read(f)?;
    let value_length = read_ber_length(f)?;
    let kl_size = f.tell()? - start;
    trace!(%key, value_length, "read KL header");
    Ok(KlHeader {
        key,
        value_length,
        kl_size,
    })
}

/// Read a full KLV triple's value into a freshly allocated buffer.
pub fn read_klv(f: &mut dyn MxfFile) -> Result<(KlHeader, Vec<u8>)> {
    let header = read_kl(f)?;
    if header.value_length > (1u64 << 56) {
        return Err(Error::ValueTooLarge(header.value_length));
    }
    let mut value = vec![0u8; header.value_length as usize];
    f.read_exact(&mut value).map_err(|e| {
        warn!(key = %header.key, expected = header.value_length, "truncated KLV value");
        match e {
            bmx_io::Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                Error::TruncatedValue {
                    expected: header.value_length,
                    actual: 0,
                }
            }
            other => Error::Io(other),
        }
    })?;
    Ok((header, value))
}

/// Write a Key, its BER-shortest length, then the value bytes.
pub fn write_klv(f: &mut dyn MxfFile, key: &Key, value: &[u8]) -> Result<()> {
    key.write(f)?;
    write_ber_length(f, value.len() as u64)?;
    f.write_all(value)?;
    Ok(())
}

/// Write a Key and a fixed-width BER length (`llen` octets) followed by
/// `value`, for callers who will patch the length in place once the true
/// value size is known (partition packs, index table segments).
pub fn write_klv_fixed_length(
    f: &mut dyn MxfFile,
    key: &Key,
    value: &[u8],
    llen: usize,
) -> Result<()> {
    key.write(f)?;
    write_fixed_ber_length(f, value.len() as u64, llen)?;
    f.write_all(value)?;
    Ok(())
}

/// Seek back to `length_pos` (the position immediately after the key) and
/// rewrite the fixed-width BER length there, without disturbing bytes that
/// come after the value. Used to back-patch a value whose size was not known
/// until after it, and in turn everything following it, had already been
/// written — e.g. the body partition's declared size once its content
/// package count is final.
pub fn patch_fixed_length(
    f: &mut dyn MxfFile,
    length_pos: u64,
    value_length: u64,
    llen: usize,
) -> Result<()> {
    let current = f.tell()?;
    f.seek(std::io::SeekFrom::Start(length_pos))?;
    write_fixed_ber_length(f, value_length, llen)?;
    f.seek(std::io::SeekFrom::Start(current))?;
    Ok(())
}

/// `KEY_LEN` plus the space reserved for a fixed-form BER length, i.e. the
/// total bytes a KL header occupies when `llen` octets are reserved for the
/// length.
pub fn kl_fixed_size(llen: usize) -> u64 {
    (KEY_LEN + llen) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmx_io::MemoryFile;
    use std::io::SeekFrom;

    fn test_key() -> Key {
        Key::new([
            0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x01,
            0x01, 0x00,
        ])
    }

    #[test]
    fn klv_round_trips() {
        let mut f = MemoryFile::new();
        write_klv(&mut f, &test_key(), b"hello").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let (header, value) = read_klv(&mut f).unwrap();
        assert_eq!(header.key, test_key());
        assert_eq!(value, b"hello");
    }

    #[test]
    fn fixed_length_can_be_patched_after_writing_value() {
        let mut f = MemoryFile::new();
        let key = test_key();
        key.write(&mut f).unwrap();
        let length_pos = f.tell().unwrap();
        write_fixed_ber_length(&mut f, 0, 9).unwrap();
        let value_pos = f.tell().unwrap();
        f.write_all(b"grows later").unwrap();

        patch_fixed_length(&mut f, length_pos, 11, 9).unwrap();

        f.seek(SeekFrom::Start(0)).unwrap();
        let header = read_kl(&mut f).unwrap();
        assert_eq!(header.value_length, 11);
        assert_eq!(f.tell().unwrap(), value_pos);
    }

    #[test]
    fn truncated_value_errors() {
        let mut f = MemoryFile::new();
        test_key().write(&mut f).unwrap();
        write_ber_length(&mut f, 100).unwrap();
        f.write_all(b"short").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        assert!(read_klv(&mut f).is_err());
    }
}
