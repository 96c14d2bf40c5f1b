//! Fill item recognition and KAG-alignment padding.
//!
//! The registered fill-item key (`060e2b34.0101.0101.03010201.10010000`) lets
//! a writer pad a KLV stream out to a KAG (KLV Alignment Grid) boundary: any
//! KAG-respecting reader must skip a fill item's value without interpreting
//! it, so padding never needs a real payload, just the right declared
//! length.

use tracing::trace;

use crate::error::{Error, Result};
use crate::key::{Key, KEY_LEN};
use crate::klv::write_klv;
use crate::length::ber_length_size;
use bmx_io::MxfFile;

/// SMPTE-registered fill item key.
pub const FILL_KEY: Key = Key::new([
    0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x03, 0x01, 0x02, 0x01, 0x10, 0x01, 0x00, 0x00,
]);

/// `true` if `key` is the registered fill item key (registry-version
/// tolerant, per [`Key`]'s `PartialEq`).
pub fn is_fill_key(key: &Key) -> bool {
    *key == FILL_KEY
}

/// Smallest total KLV size (key + BER length + value) a fill item can have:
/// a 1-octet short-form zero length needs no value bytes at all.
const MIN_FILL_SIZE: u64 = KEY_LEN as u64 + 1;

/// Write a fill item that pads the stream from the current position out to
/// the next multiple of `kag_size`. If already aligned, writes nothing. If
/// the gap would be smaller than a fill item can express, pads to the
/// *next* KAG boundary instead (SMPTE ST 377-1's treatment of a
/// sub-minimum remainder).
pub fn write_fill_to_kag(f: &mut dyn MxfFile, kag_size: u32) -> Result<u64> {
    if kag_size == 0 || (kag_size & (kag_size - 1)) != 0 {
        return Err(Error::InvalidKagSize(kag_size));
    }
    let pos = f.tell()?;
    let mut gap = next_multiple(pos, kag_size as u64) - pos;
    if gap != 0 && gap < MIN_FILL_SIZE {
        gap += kag_size as u64;
    }
    if gap == 0 {
        return Ok(0);
    }

    let value_len = solve_fill_value_len(gap);
    let value = vec![0u8; value_len as usize];
    write_klv(f, &FILL_KEY, &value)?;
    let written = f.tell()? - pos;
    trace!(pos, kag_size, written, "wrote KAG alignment fill item");
    Ok(written)
}

/// Find the value length `v` such that `KEY_LEN + ber_length_size(v) + v == target`.
fn solve_fill_value_len(target: u64) -> u64 {
    // ber_length_size only changes at well-known thresholds, so a small fixed
    // point iteration converges immediately.
    let mut v = target.saturating_sub(KEY_LEN as u64 + 1);
    loop {
        let total = KEY_LEN as u64 + ber_length_size(v) as u64 + v;
        if total == target {
            return v;
        }
        if total < target {
            v += target - total;
        } else {
            v -= total - target;
        }
    }
}

fn next_multiple(pos: u64, alignment: u64) -> u64 {
    let rem = pos % alignment;
    if rem == 0 {
        pos
    } else {
        pos + (alignment - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmx_io::MemoryFile;
    use std::io::SeekFrom;

    #[test]
    fn aligned_position_writes_nothing() {
        let mut f = MemoryFile::new();
        f.write_all(&[0u8; 512]).unwrap();
        let written = write_fill_to_kag(&mut f, 512).unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn pads_to_exact_kag_boundary() {
        let mut f = MemoryFile::new();
        f.write_all(&[0u8; 100]).unwrap();
        let written = write_fill_to_kag(&mut f, 512).unwrap();
        assert_eq!(written, 412);
        assert_eq!(f.tell().unwrap(), 512);
    }

    #[test]
    fn fill_item_value_is_skippable() {
        let mut f = MemoryFile::new();
        f.write_all(&[0u8; 1]).unwrap();
        write_fill_to_kag(&mut f, 2048).unwrap();
        f.seek(SeekFrom::Start(1)).unwrap();
        let header = crate::klv::read_kl(&mut f).unwrap();
        assert!(is_fill_key(&header.key));
        assert_eq!(header.kl_size + header.value_length, 2047);
    }
}
