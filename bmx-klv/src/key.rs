//! 16-byte Key / Universal Label / UUID identifiers.
//!
//! All three share the same 16-byte layout; which interpretation applies is
//! determined by the first byte (`0x06` for a SMPTE-registered UL) and by
//! context. Equality for ULs ignores the registry-version octet (byte 7) so
//! that sets and items keyed by UL still match across the minor-version
//! churn real-world files exhibit.

use std::fmt;

use tracing::trace;

use crate::error::Result;
use bmx_io::MxfFile;

pub const KEY_LEN: usize = 16;

/// A 16-byte Key, typically a SMPTE Universal Label.
#[derive(Clone, Copy, Eq)]
pub struct Key(pub [u8; KEY_LEN]);

impl Key {
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Byte 7 (0-indexed) carries the registry version for SMPTE ULs; it is
    /// ignored by [`PartialEq`] so that e.g. version 1 and version 2 of the
    /// same label compare equal.
    pub fn registry_version(&self) -> u8 {
        self.0[7]
    }

    /// `true` if this key could plausibly be a SMPTE UL (starts `06.0e.2b.34`).
    pub fn is_ul(&self) -> bool {
        self.0[0] == 0x06 && self.0[1] == 0x0e && self.0[2] == 0x2b && self.0[3] == 0x34
    }

    /// Byte-for-byte equality, including the registry version — used when an
    /// exact match (not a subclass/version-tolerant match) is required.
    pub fn exact_eq(&self, other: &Key) -> bool {
        self.0 == other.0
    }

    /// Read a fixed 16-byte key from `f`.
    pub fn read(f: &mut dyn MxfFile) -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        f.read_exact(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Write the 16 raw bytes of this key to `f`.
    pub fn write(&self, f: &mut dyn MxfFile) -> Result<()> {
        f.write_all(&self.0)?;
        trace!(key = %self, "wrote key");
        Ok(())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        if !self.is_ul() || !other.is_ul() {
            return self.0 == other.0;
        }
        self.0[0..7] == other.0[0..7] && self.0[8..] == other.0[8..]
    }
}

impl std::hash::Hash for Key {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0[0..7].hash(state);
        self.0[8..].hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Alias used where a Key is specifically being treated as a registered
/// Universal Label (set key, item key, essence container label, codec UL).
pub type UL = Key;

/// A UUID/UMID-style 16-byte identifier, stored and compared byte-for-byte
/// (unlike [`Key`], no registry-version masking applies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid(pub [u8; 16]);

impl Uuid {
    pub fn read(f: &mut dyn MxfFile) -> Result<Self> {
        let mut bytes = [0u8; 16];
        f.read_exact(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn write(&self, f: &mut dyn MxfFile) -> Result<()> {
        f.write_all(&self.0)?;
        Ok(())
    }

    /// MXF's "half-swapped" UUID form: the first 8 bytes are byte-swapped in
    /// 2-byte and 4-byte groups (as in a Microsoft/COM GUID), the last 8 are
    /// left as-is. Some legacy writers emit UMIDs in this form; round-trip
    /// through this conversion rather than reinterpreting byte order ad hoc.
    pub fn to_half_swapped(&self) -> Self {
        let b = &self.0;
        Self([
            b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9], b[10], b[11], b[12],
            b[13], b[14], b[15],
        ])
    }

    /// Inverse of [`Self::to_half_swapped`]; applying it twice is the identity.
    pub fn from_half_swapped(&self) -> Self {
        self.to_half_swapped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ul_equality_ignores_registry_version() {
        let a = Key::new([
            0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x00, 0x00,
        ]);
        let mut b_bytes = *a.as_bytes();
        b_bytes[7] = 0x02;
        let b = Key::new(b_bytes);
        assert_eq!(a, b);
        assert!(!a.exact_eq(&b));
    }

    #[test]
    fn display_formats_dotted_hex() {
        let k = Key::new([0u8; 16]);
        assert_eq!(
            format!("{k}"),
            "00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00"
        );
    }

    #[test]
    fn half_swap_is_involution() {
        let u = Uuid([
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
        ]);
        assert_eq!(u.to_half_swapped().from_half_swapped(), u);
    }
}
