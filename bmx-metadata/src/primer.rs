//! Primer pack: the per-header mapping between 16-bit local tags and
//! 16-byte item keys.
//!
//! On read, the primer is decoded once per header and consulted for every
//! item's local tag. On write, local tags are allocated as the graph is
//! walked depth-first; an item key seen from two different sets shares the
//! same local tag, matching the data model's "same key, same tag across
//! sets" rule.

use std::collections::HashMap;

use bmx_io::MxfFile;
use bmx_klv::{read_kl, write_klv, Key};

use crate::error::{Error, Result};

const PRIMER_PACK_KEY: Key = Key::new([
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x05, 0x01, 0x00,
]);

/// First local tag allocated to a dynamically-assigned item key. Tags below
/// this are reserved by the static/baseline item registry.
const FIRST_DYNAMIC_TAG: u16 = 0x8000;

#[derive(Debug, Default)]
pub struct Primer {
    tag_to_key: HashMap<u16, Key>,
    key_to_tag: HashMap<Key, u16>,
    next_tag: u16,
}

impl Primer {
    pub fn new() -> Self {
        Self {
            tag_to_key: HashMap::new(),
            key_to_tag: HashMap::new(),
            next_tag: FIRST_DYNAMIC_TAG,
        }
    }

    /// Look up (or allocate, if this primer is being built for a write) the
    /// local tag for `key`.
    pub fn allocate(&mut self, key: Key) -> u16 {
        if let Some(&tag) = self.key_to_tag.get(&key) {
            return tag;
        }
        let tag = self.next_tag;
        self.next_tag += 1;
        self.key_to_tag.insert(key, tag);
        self.tag_to_key.insert(tag, key);
        tag
    }

    /// Assign `key` to exactly `tag`, as read from an existing primer,
    /// rather than allocating the next free tag. A no-op if `key` already
    /// has a tag (first writer wins, same as [`Primer::allocate`]).
    /// Bumps the dynamic-tag counter past `tag` so a later `allocate` call
    /// never collides with it.
    pub fn force(&mut self, tag: u16, key: Key) {
        if self.key_to_tag.contains_key(&key) {
            return;
        }
        self.tag_to_key.insert(tag, key);
        self.key_to_tag.insert(key, tag);
        if tag >= self.next_tag {
            self.next_tag = tag + 1;
        }
    }

    pub fn key_for_tag(&self, tag: u16) -> Result<Key> {
        self.tag_to_key.get(&tag).copied().ok_or(Error::UnknownLocalTag(tag))
    }

    pub fn tag_for_key(&self, key: &Key) -> Result<u16> {
        self.key_to_tag
            .get(key)
            .copied()
            .ok_or(Error::ItemKeyNotInPrimer(*key))
    }

    pub fn entries(&self) -> impl Iterator<Item = (u16, Key)> + '_ {
        self.tag_to_key.iter().map(|(&tag, &key)| (tag, key))
    }

    pub fn is_primer_pack_key(key: &Key) -> bool {
        *key == PRIMER_PACK_KEY
    }

    /// Decode a primer pack value: a count-prefixed array of
    /// `(local-tag: u16, item-key: 16 bytes)` pairs.
    pub fn decode(f: &mut dyn MxfFile) -> Result<Self> {
        let header = read_kl(f)?;
        if !Self::is_primer_pack_key(&header.key) {
            return Err(Error::NotAPrimerPack(header.key));
        }
        let mut buf = [0u8; 8];
        f.read_exact(&mut buf)?;
        let count = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let element_len = u32::from_be_bytes(buf[4..8].try_into().unwrap());

        let mut primer = Self::new();
        for _ in 0..count {
            let mut entry = vec![0u8; element_len as usize];
            f.read_exact(&mut entry)?;
            let tag = u16::from_be_bytes([entry[0], entry[1]]);
            let mut key_bytes = [0u8; 16];
            key_bytes.copy_from_slice(&entry[2..18]);
            let key = Key::new(key_bytes);
            primer.tag_to_key.insert(tag, key);
            primer.key_to_tag.insert(key, tag);
        }
        Ok(primer)
    }

    /// Encode this primer as a KLV triple.
    pub fn encode(&self, f: &mut dyn MxfFile) -> Result<()> {
        let mut value = Vec::with_capacity(8 + self.tag_to_key.len() * 18);
        value.extend_from_slice(&(self.tag_to_key.len() as u32).to_be_bytes());
        value.extend_from_slice(&18u32.to_be_bytes());

        let mut entries: Vec<(u16, Key)> = self.entries().collect();
        entries.sort_by_key(|(tag, _)| *tag);
        for (tag, key) in entries {
            value.extend_from_slice(&tag.to_be_bytes());
            value.extend_from_slice(key.as_bytes());
        }
        write_klv(f, &PRIMER_PACK_KEY, &value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmx_io::MemoryFile;
    use std::io::SeekFrom;

    fn key(last: u8) -> Key {
        let mut b = [0u8; 16];
        b[15] = last;
        Key::new(b)
    }

    #[test]
    fn same_key_gets_same_tag() {
        let mut p = Primer::new();
        let t1 = p.allocate(key(1));
        let t2 = p.allocate(key(1));
        assert_eq!(t1, t2);
    }

    #[test]
    fn forced_tag_is_respected_and_later_allocations_avoid_it() {
        let mut p = Primer::new();
        p.force(0x3c0a, key(9));
        assert_eq!(p.tag_for_key(&key(9)).unwrap(), 0x3c0a);

        // A forced low tag below FIRST_DYNAMIC_TAG doesn't disturb the
        // dynamic allocation counter.
        let t = p.allocate(key(1));
        assert_eq!(t, FIRST_DYNAMIC_TAG);

        // A forced tag at or past the dynamic counter bumps it so a later
        // allocation never collides.
        p.force(FIRST_DYNAMIC_TAG + 5, key(2));
        let t2 = p.allocate(key(3));
        assert_eq!(t2, FIRST_DYNAMIC_TAG + 6);
    }

    #[test]
    fn force_is_a_no_op_once_a_key_already_has_a_tag() {
        let mut p = Primer::new();
        let original = p.allocate(key(1));
        p.force(0x1234, key(1));
        assert_eq!(p.tag_for_key(&key(1)).unwrap(), original);
    }

    #[test]
    fn encode_decode_round_trips() {
        let mut p = Primer::new();
        p.allocate(key(1));
        p.allocate(key(2));

        let mut f = MemoryFile::new();
        p.encode(&mut f).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();

        let decoded = Primer::decode(&mut f).unwrap();
        assert_eq!(decoded.key_for_tag(p.tag_for_key(&key(1)).unwrap()).unwrap(), key(1));
        assert_eq!(decoded.key_for_tag(p.tag_for_key(&key(2)).unwrap()).unwrap(), key(2));
    }
}
