//! Partition pack read/write: the per-partition header that anchors a
//! body/header/footer segment within an MXF file, plus the Random Index Pack
//! written at EOF.

use bmx_io::MxfFile;
use bmx_klv::{read_kl, write_klv, Key};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    Header,
    Body,
    Footer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStatus {
    OpenIncomplete,
    ClosedIncomplete,
    OpenComplete,
    ClosedComplete,
}

/// Byte 14 of a partition pack's key encodes kind+status as defined by
/// SMPTE 377-1 table 2: 02=Header,03=Body,04=Footer; byte 15 encodes status
/// 00=OpenIncomplete,01=ClosedIncomplete,02=OpenComplete,03=ClosedComplete.
fn partition_key(kind: PartitionKind, status: PartitionStatus) -> Key {
    let kind_byte = match kind {
        PartitionKind::Header => 0x02,
        PartitionKind::Body => 0x03,
        PartitionKind::Footer => 0x04,
    };
    let status_byte = match status {
        PartitionStatus::OpenIncomplete => 0x00,
        PartitionStatus::ClosedIncomplete => 0x01,
        PartitionStatus::OpenComplete => 0x02,
        PartitionStatus::ClosedComplete => 0x03,
    };
    let mut b = [
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, kind_byte,
        status_byte, 0x00,
    ];
    b[15] = 0x00;
    Key::new(b)
}

/// `true` if `key` has the shared prefix every partition pack key carries,
/// regardless of its specific kind/status bytes. Used by the header
/// metadata reader to know where the header partition's metadata ends.
pub fn is_partition_pack_key(key: &Key) -> bool {
    decode_partition_key(key).is_some()
}

fn decode_partition_key(key: &Key) -> Option<(PartitionKind, PartitionStatus)> {
    let bytes = key.as_bytes();
    if bytes[0..13] != [0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01] {
        return None;
    }
    let kind = match bytes[13] {
        0x02 => PartitionKind::Header,
        0x03 => PartitionKind::Body,
        0x04 => PartitionKind::Footer,
        _ => return None,
    };
    let status = match bytes[14] {
        0x00 => PartitionStatus::OpenIncomplete,
        0x01 => PartitionStatus::ClosedIncomplete,
        0x02 => PartitionStatus::OpenComplete,
        0x03 => PartitionStatus::ClosedComplete,
        _ => return None,
    };
    Some((kind, status))
}

#[derive(Debug, Clone)]
pub struct PartitionPack {
    pub kind: PartitionKind,
    pub status: PartitionStatus,
    pub major_version: u16,
    pub minor_version: u16,
    pub kag_size: u32,
    pub this_partition: u64,
    pub previous_partition: u64,
    pub footer_partition: u64,
    pub header_byte_count: u64,
    pub index_byte_count: u64,
    pub index_sid: u32,
    pub body_offset: u64,
    pub body_sid: u32,
    pub operational_pattern: Key,
    pub essence_containers: Vec<Key>,
    /// Total bytes the partition pack's own KLV triple occupied on disk
    /// (key + BER length + value), so callers can locate the header
    /// metadata/index/body data that immediately follows it. Zero until
    /// populated by [`PartitionPack::read`].
    pub pack_byte_size: u64,
}

impl PartitionPack {
    pub fn new(kind: PartitionKind, status: PartitionStatus, kag_size: u32) -> Self {
        Self {
            kind,
            status,
            major_version: 1,
            minor_version: 2,
            kag_size,
            this_partition: 0,
            previous_partition: 0,
            footer_partition: 0,
            header_byte_count: 0,
            index_byte_count: 0,
            index_sid: 0,
            body_offset: 0,
            body_sid: 0,
            operational_pattern: Key::new([0; 16]),
            essence_containers: Vec::new(),
            pack_byte_size: 0,
        }
    }

    pub fn read(f: &mut dyn MxfFile) -> Result<Self> {
        let start = f.tell()?;
        let header = read_kl(f)?;
        let (kind, status) = decode_partition_key(&header.key)
            .ok_or_else(|| Error::Parse(format!("{} is not a partition pack key", header.key)))?;

        let major_version = read_u16(f)?;
        let minor_version = read_u16(f)?;
        let kag_size = read_u32(f)?;
        let this_partition = read_u64(f)?;
        let previous_partition = read_u64(f)?;
        let footer_partition = read_u64(f)?;
        let header_byte_count = read_u64(f)?;
        let index_byte_count = read_u64(f)?;
        let index_sid = read_u32(f)?;
        let body_offset = read_u64(f)?;
        let body_sid = read_u32(f)?;
        let operational_pattern = Key::read(f)?;

        let batch_count = read_u32(f)?;
        let batch_item_len = read_u32(f)?;
        let mut essence_containers = Vec::with_capacity(batch_count as usize);
        for _ in 0..batch_count {
            let mut bytes = [0u8; 16];
            f.read_exact(&mut bytes)?;
            essence_containers.push(Key::new(bytes));
            // Skip any extra padding beyond 16 bytes per the declared item
            // length, matching the batch's self-described element size.
            if batch_item_len > 16 {
                let mut pad = vec![0u8; (batch_item_len - 16) as usize];
                f.read_exact(&mut pad)?;
            }
        }

        let pack_byte_size = f.tell()? - start;

        Ok(Self {
            kind,
            status,
            major_version,
            minor_version,
            kag_size,
            this_partition,
            previous_partition,
            footer_partition,
            header_byte_count,
            index_byte_count,
            index_sid,
            body_offset,
            body_sid,
            operational_pattern,
            essence_containers,
            pack_byte_size,
        })
    }

    pub fn write(&self, f: &mut dyn MxfFile) -> Result<u64> {
        let key = partition_key(self.kind, self.status);
        let mut value = Vec::with_capacity(4 + 8 * 6 + 4 * 3 + 16 + 8 + self.essence_containers.len() * 16);
        value.extend_from_slice(&self.major_version.to_be_bytes());
        value.extend_from_slice(&self.minor_version.to_be_bytes());
        value.extend_from_slice(&self.kag_size.to_be_bytes());
        value.extend_from_slice(&self.this_partition.to_be_bytes());
        value.extend_from_slice(&self.previous_partition.to_be_bytes());
        value.extend_from_slice(&self.footer_partition.to_be_bytes());
        value.extend_from_slice(&self.header_byte_count.to_be_bytes());
        value.extend_from_slice(&self.index_byte_count.to_be_bytes());
        value.extend_from_slice(&self.index_sid.to_be_bytes());
        value.extend_from_slice(&self.body_offset.to_be_bytes());
        value.extend_from_slice(&self.body_sid.to_be_bytes());
        value.extend_from_slice(self.operational_pattern.as_bytes());
        value.extend_from_slice(&(self.essence_containers.len() as u32).to_be_bytes());
        value.extend_from_slice(&16u32.to_be_bytes());
        for ul in &self.essence_containers {
            value.extend_from_slice(ul.as_bytes());
        }

        let pos = f.tell()?;
        write_klv(f, &key, &value)?;
        Ok(pos)
    }
}

fn read_u16(f: &mut dyn MxfFile) -> Result<u16> {
    let mut b = [0u8; 2];
    f.read_exact(&mut b)?;
    Ok(u16::from_be_bytes(b))
}
fn read_u32(f: &mut dyn MxfFile) -> Result<u32> {
    let mut b = [0u8; 4];
    f.read_exact(&mut b)?;
    Ok(u32::from_be_bytes(b))
}
fn read_u64(f: &mut dyn MxfFile) -> Result<u64> {
    let mut b = [0u8; 8];
    f.read_exact(&mut b)?;
    Ok(u64::from_be_bytes(b))
}

/// One entry in the Random Index Pack: a body/footer SID and the byte
/// offset of its partition pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomIndexEntry {
    pub body_sid: u32,
    pub byte_offset: u64,
}

pub const RANDOM_INDEX_PACK_KEY: Key = Key::new([
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x11, 0x01, 0x00,
]);

/// Write a Random Index Pack covering `entries` plus the footer partition
/// writing the RIP itself. `this_partition` is the footer's own byte
/// offset; per ST 377-1 the footer records itself (BodySID 0) as the last
/// element of the partition array, since it cannot appear in `entries` as
/// built by the caller before the footer's own offset was known.
pub fn write_random_index_pack(
    f: &mut dyn MxfFile,
    entries: &[RandomIndexEntry],
    this_partition: u64,
) -> Result<()> {
    let mut value = Vec::with_capacity((entries.len() + 1) * 12 + 4);
    for entry in entries {
        value.extend_from_slice(&entry.body_sid.to_be_bytes());
        value.extend_from_slice(&entry.byte_offset.to_be_bytes());
    }
    value.extend_from_slice(&0u32.to_be_bytes());
    value.extend_from_slice(&this_partition.to_be_bytes());
    let pack_len = value.len() as u32 + 4 /* overall pack length field */;
    value.extend_from_slice(&pack_len.to_be_bytes());
    write_klv(f, &RANDOM_INDEX_PACK_KEY, &value)?;
    Ok(())
}

pub fn read_random_index_pack(f: &mut dyn MxfFile) -> Result<Vec<RandomIndexEntry>> {
    let (header, value) = bmx_klv::read_klv(f)?;
    if header.key != RANDOM_INDEX_PACK_KEY {
        return Err(Error::Parse("expected a random index pack key".into()));
    }
    if value.len() < 4 {
        return Err(Error::Parse("random index pack too short".into()));
    }
    let body = &value[..value.len() - 4];
    let mut entries = Vec::with_capacity(body.len() / 12);
    for chunk in body.chunks_exact(12) {
        entries.push(RandomIndexEntry {
            body_sid: u32::from_be_bytes(chunk[0..4].try_into().unwrap()),
            byte_offset: u64::from_be_bytes(chunk[4..12].try_into().unwrap()),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmx_io::MemoryFile;
    use std::io::SeekFrom;

    #[test]
    fn partition_pack_round_trips() {
        let mut pack = PartitionPack::new(PartitionKind::Header, PartitionStatus::OpenIncomplete, 512);
        pack.body_sid = 1;
        pack.index_sid = 2;
        pack.essence_containers.push(Key::new([1; 16]));

        let mut f = MemoryFile::new();
        pack.write(&mut f).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();

        let decoded = PartitionPack::read(&mut f).unwrap();
        assert_eq!(decoded.kind, PartitionKind::Header);
        assert_eq!(decoded.status, PartitionStatus::OpenIncomplete);
        assert_eq!(decoded.body_sid, 1);
        assert_eq!(decoded.essence_containers, vec![Key::new([1; 16])]);
    }

    #[test]
    fn random_index_pack_round_trips() {
        let entries = vec![
            RandomIndexEntry {
                body_sid: 1,
                byte_offset: 1024,
            },
            RandomIndexEntry {
                body_sid: 0,
                byte_offset: 2048,
            },
        ];
        let mut f = MemoryFile::new();
        write_random_index_pack(&mut f, &entries, 4096).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let decoded = read_random_index_pack(&mut f).unwrap();
        // The two caller-supplied entries plus the footer's own offset.
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].byte_offset, 1024);
        assert_eq!(decoded[2].body_sid, 0);
        assert_eq!(decoded[2].byte_offset, 4096);
    }
}
