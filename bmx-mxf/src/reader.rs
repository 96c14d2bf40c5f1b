//! Single-file and group readers.
//!
//! A [`SingleFileReader`] parses the partition list (via the Random Index
//! Pack when present), validates the header metadata graph, decodes index
//! table segments, and exposes one [`TrackReader`] per essence track. A
//! [`GroupReader`] composites several single-file readers into one logical
//! timeline, the way an AS-02 bundle or an Avid OP-Atom set splits one clip
//! across several files.

use std::collections::HashMap;
use std::io::SeekFrom;

use tracing::{debug, trace, warn};

use bmx_io::MxfFile;
use bmx_klv::{is_fill_key, read_kl, Key};
use bmx_metadata::{read_header_metadata, FilterDecision, Graph};
use bmx_model::{Rational, Registry};

use crate::error::{Error, Result};
use crate::index::{IndexKey, INDEX_TABLE_SEGMENT_KEY};
use crate::partition::{is_partition_pack_key, read_random_index_pack, PartitionKind, PartitionPack};

/// One decoded index table segment, read back off disk. Distinct from
/// [`crate::index::IndexSegment`], which is the writer's in-memory
/// accumulator; this is the read-side, fully-materialized counterpart.
#[derive(Debug, Clone)]
pub struct ReadIndexSegment {
    pub index_edit_rate: Rational,
    pub index_start_position: i64,
    pub index_duration: i64,
    pub edit_unit_byte_count: u32,
    pub index_sid: u32,
    pub body_sid: u32,
    pub delta_entry_count: u32,
    pub entries: Vec<ReadIndexEntry>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadIndexEntry {
    pub temporal_offset: i8,
    pub key_frame_offset: i8,
    pub flags: u8,
    pub stream_offset: u64,
}

impl ReadIndexSegment {
    fn decode(value: &[u8]) -> Result<Self> {
        if value.len() < 32 {
            return Err(Error::Parse("index table segment too short".into()));
        }
        let mut pos = 0usize;
        let mut take = |n: usize| -> Result<&[u8]> {
            if pos + n > value.len() {
                return Err(Error::Parse("index table segment truncated".into()));
            }
            let s = &value[pos..pos + n];
            pos += n;
            Ok(s)
        };
        let numerator = i32::from_be_bytes(take(4)?.try_into().unwrap());
        let denominator = i32::from_be_bytes(take(4)?.try_into().unwrap());
        let index_start_position = i64::from_be_bytes(take(8)?.try_into().unwrap());
        let index_duration = i64::from_be_bytes(take(8)?.try_into().unwrap());
        let edit_unit_byte_count = u32::from_be_bytes(take(4)?.try_into().unwrap());
        let index_sid = u32::from_be_bytes(take(4)?.try_into().unwrap());
        let body_sid = u32::from_be_bytes(take(4)?.try_into().unwrap());
        let _slice_count = take(1)?[0];
        let _pos_table_count = take(1)?[0];

        let delta_count = u32::from_be_bytes(take(4)?.try_into().unwrap());
        let delta_elem_len = u32::from_be_bytes(take(4)?.try_into().unwrap()) as usize;
        pos += delta_count as usize * delta_elem_len;

        let entry_count = u32::from_be_bytes(take(4)?.try_into().unwrap());
        let entry_elem_len = u32::from_be_bytes(take(4)?.try_into().unwrap()) as usize;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let chunk = take(entry_elem_len)?;
            if chunk.len() < 11 {
                return Err(Error::Parse("index entry too short".into()));
            }
            entries.push(ReadIndexEntry {
                temporal_offset: chunk[0] as i8,
                key_frame_offset: chunk[1] as i8,
                flags: chunk[2],
                stream_offset: u64::from_be_bytes(chunk[3..11].try_into().unwrap()),
            });
        }

        Ok(Self {
            index_edit_rate: Rational::new(numerator, denominator),
            index_start_position,
            index_duration,
            edit_unit_byte_count,
            index_sid,
            body_sid,
            delta_entry_count: delta_count,
            entries,
        })
    }

    fn is_cbe(&self) -> bool {
        self.edit_unit_byte_count != 0
    }
}

/// Per-frame metadata a [`FrameMetadataReader`] attaches to a decoded frame:
/// SDTI-CP timecode arrays and a BBC-scheme CRC-32, keyed by the system-item
/// UL that carried them.
#[derive(Debug, Clone, Default)]
pub struct FrameMetadata {
    pub timecodes: Vec<u32>,
    pub bbc_crc32: Option<u32>,
}

/// Recognizes SDTI-CP system items and BBC preservation-scheme CRC-32 marks
/// while reading one edit unit's elements, attaching the result to the
/// returned [`Frame`].
#[derive(Debug, Default)]
pub struct FrameMetadataReader {
    pub system_item_key: Option<Key>,
}

const BBC_CRC32_LABEL_BYTE14: u8 = 0x01;

impl FrameMetadataReader {
    pub fn new(system_item_key: Option<Key>) -> Self {
        Self { system_item_key }
    }

    /// Parse one system item's payload, recognizing SDTI-CP's fixed
    /// timecode-array offset and a trailing BBC CRC-32 tag if present.
    pub fn parse_system_item(&self, key: &Key, payload: &[u8]) -> FrameMetadata {
        let mut meta = FrameMetadata::default();
        if Some(*key) != self.system_item_key {
            return meta;
        }
        // SDTI-CP system metadata pack: a fixed 1-byte array-count field at
        // offset 1, followed by that many 4-byte timecodes, per SMPTE 326M.
        if payload.len() > 1 {
            let count = payload[1] as usize;
            let mut off = 2;
            for _ in 0..count {
                if off + 4 > payload.len() {
                    break;
                }
                meta.timecodes
                    .push(u32::from_be_bytes(payload[off..off + 4].try_into().unwrap()));
                off += 4;
            }
        }
        if key.as_bytes()[14] == BBC_CRC32_LABEL_BYTE14 && payload.len() >= 4 {
            let tail = &payload[payload.len() - 4..];
            meta.bbc_crc32 = Some(u32::from_be_bytes(tail.try_into().unwrap()));
        }
        meta
    }
}

/// One decoded frame: an opaque essence byte range plus whatever metadata
/// the [`FrameMetadataReader`] attached while scanning the content package.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub metadata: FrameMetadata,
}

/// One essence track's position within a body stream, plus enough of the
/// index table to compute byte offsets for `seek`/`read`.
pub struct TrackReader<'f> {
    file: &'f mut dyn MxfFile,
    index_sid: u32,
    body_sid: u32,
    segments: Vec<ReadIndexSegment>,
    essence_base_offset: u64,
    element_key: Key,
    position: i64,
}

impl<'f> TrackReader<'f> {
    pub fn new(
        file: &'f mut dyn MxfFile,
        index_sid: u32,
        body_sid: u32,
        segments: Vec<ReadIndexSegment>,
        essence_base_offset: u64,
        element_key: Key,
    ) -> Self {
        Self {
            file,
            index_sid,
            body_sid,
            segments,
            essence_base_offset,
            element_key,
            position: 0,
        }
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    fn segment_for(&self, edit_unit: i64) -> Option<&ReadIndexSegment> {
        self.segments
            .iter()
            .find(|s| edit_unit >= s.index_start_position && edit_unit < s.index_start_position + s.index_duration)
    }

    /// Byte offset of an edit unit's essence element, relative to the
    /// partition's essence start.
    fn byte_offset(&self, edit_unit: i64) -> Result<u64> {
        let seg = self
            .segment_for(edit_unit)
            .ok_or_else(|| Error::Parse(format!("edit unit {edit_unit} has no index entry")))?;
        if seg.is_cbe() {
            let rel = (edit_unit - seg.index_start_position) as u64;
            Ok(rel * seg.edit_unit_byte_count as u64)
        } else {
            let idx = (edit_unit - seg.index_start_position) as usize;
            seg.entries
                .get(idx)
                .map(|e| e.stream_offset)
                .ok_or_else(|| Error::Parse(format!("edit unit {edit_unit} missing VBE entry")))
        }
    }

    /// Minimum number of edit units of decode-order lookback a long-GOP
    /// codec needs before `position` can be presented correctly, computed
    /// from the most negative `temporal_offset` seen at or before it.
    pub fn precharge_at(&self, position: i64) -> u32 {
        let mut min_offset = 0i8;
        for seg in &self.segments {
            if seg.index_start_position > position {
                continue;
            }
            for (i, entry) in seg.entries.iter().enumerate() {
                let edit_unit = seg.index_start_position + i as i64;
                if edit_unit > position {
                    break;
                }
                min_offset = min_offset.min(entry.temporal_offset);
            }
        }
        min_offset.unsigned_abs() as u32
    }

    pub fn seek(&mut self, edit_unit: i64) -> Result<()> {
        self.position = edit_unit;
        Ok(())
    }

    /// Read `n` frames starting at the current position, always advancing
    /// position by exactly `n` regardless of whether every edit unit
    /// produced a frame (a missing track position yields an empty frame).
    pub fn read(&mut self, n: u32) -> Result<Vec<Frame>> {
        let mut out = Vec::with_capacity(n as usize);
        for i in 0..n {
            let edit_unit = self.position + i as i64;
            match self.byte_offset(edit_unit) {
                Ok(offset) => {
                    let abs = self.essence_base_offset + offset;
                    self.file.seek(SeekFrom::Start(abs))?;
                    let header = read_kl(self.file)?;
                    if header.key != self.element_key {
                        warn!(expected = %self.element_key, found = %header.key, "unexpected element key at indexed offset");
                    }
                    let mut data = vec![0u8; header.value_length as usize];
                    self.file.read_exact(&mut data)?;
                    out.push(Frame {
                        data,
                        metadata: FrameMetadata::default(),
                    });
                }
                Err(_) => out.push(Frame {
                    data: Vec::new(),
                    metadata: FrameMetadata::default(),
                }),
            }
        }
        self.position += n as i64;
        Ok(out)
    }
}

/// One physical file's parsed structure: partition list, header graph, and
/// decoded index table segments grouped by `(index_sid, body_sid)`.
pub struct SingleFileReader {
    pub partitions: Vec<PartitionPack>,
    pub graph: Graph,
    pub index_segments: HashMap<IndexKey, Vec<ReadIndexSegment>>,
}

impl SingleFileReader {
    /// Open and fully parse `f`: locate the partition list (via the Random
    /// Index Pack when present, else by walking partition packs forward
    /// from the file's start), read the header metadata graph out of the
    /// header partition, and decode every index table segment encountered.
    pub fn open(f: &mut dyn MxfFile, registry: &Registry) -> Result<Self> {
        let partitions = read_partition_list(f)?;
        let header_offset = partitions
            .iter()
            .find(|p| p.kind == PartitionKind::Header)
            .ok_or_else(|| Error::Parse("no header partition found".into()))?
            .this_partition;

        f.seek(SeekFrom::Start(header_offset))?;
        // Re-read the header partition pack to leave the cursor positioned
        // at the header metadata that immediately follows it.
        let _ = PartitionPack::read(f)?;

        let (graph, _primer) = read_header_metadata(
            f,
            registry,
            |key| {
                // Stop once we reach the index table segment key or another
                // partition pack; both terminate the header metadata block.
                *key == INDEX_TABLE_SEGMENT_KEY || is_partition_pack_key(key)
            },
            |_| FilterDecision::Keep,
        )?;

        let mut index_segments: HashMap<IndexKey, Vec<ReadIndexSegment>> = HashMap::new();
        for partition in &partitions {
            if partition.index_byte_count == 0 {
                continue;
            }
            f.seek(SeekFrom::Start(partition.this_partition))?;
            // Skip past the partition pack itself and its header metadata
            // to reach the index table segments.
            let _ = PartitionPack::read(f)?;
            f.seek(SeekFrom::Current(partition.header_byte_count as i64))?;

            let index_end = f.tell()? + partition.index_byte_count;
            while f.tell()? < index_end {
                let kl = read_kl(f)?;
                if is_fill_key(&kl.key) {
                    f.seek(SeekFrom::Current(kl.value_length as i64))?;
                    continue;
                }
                if kl.key != INDEX_TABLE_SEGMENT_KEY {
                    break;
                }
                let mut value = vec![0u8; kl.value_length as usize];
                f.read_exact(&mut value)?;
                let seg = ReadIndexSegment::decode(&value)?;
                index_segments
                    .entry(IndexKey {
                        index_sid: seg.index_sid,
                        body_sid: seg.body_sid,
                    })
                    .or_default()
                    .push(seg);
            }
        }

        debug!(
            partitions = partitions.len(),
            sets = graph.len(),
            "parsed single-file reader structure"
        );
        Ok(Self {
            partitions,
            graph,
            index_segments,
        })
    }

    pub fn track_reader<'f>(
        &self,
        f: &'f mut dyn MxfFile,
        index_sid: u32,
        body_sid: u32,
        element_key: Key,
    ) -> Result<TrackReader<'f>> {
        let key = IndexKey { index_sid, body_sid };
        let segments = self
            .index_segments
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Parse(format!("no index segments for body SID {body_sid}")))?;
        let body_partition = self
            .partitions
            .iter()
            .find(|p| p.body_sid == body_sid && p.kind != PartitionKind::Footer)
            .ok_or_else(|| Error::Parse(format!("no body partition for body SID {body_sid}")))?;
        let essence_base = body_partition.this_partition
            + body_partition.pack_byte_size
            + body_partition.header_byte_count
            + body_partition.index_byte_count;
        Ok(TrackReader::new(f, index_sid, body_sid, segments, essence_base, element_key))
    }
}

/// Recover the partition list via the Random Index Pack at EOF when present
/// (the fast path); otherwise walk partition packs forward from the file
/// start following each partition's declared size.
fn read_partition_list(f: &mut dyn MxfFile) -> Result<Vec<PartitionPack>> {
    let size = f.size()?;
    if size >= 4 {
        if let Some(partitions) = try_read_via_rip(f, size)? {
            return Ok(partitions);
        }
    }
    walk_partitions_forward(f, size)
}

fn try_read_via_rip(f: &mut dyn MxfFile, size: u64) -> Result<Option<Vec<PartitionPack>>> {
    f.seek(SeekFrom::Start(size - 4))?;
    let mut len_bytes = [0u8; 4];
    f.read_exact(&mut len_bytes)?;
    let rip_len = u32::from_be_bytes(len_bytes) as u64;
    if rip_len < 16 || rip_len > size {
        return Ok(None);
    }
    let rip_start = size - rip_len;
    f.seek(SeekFrom::Start(rip_start))?;
    let entries = match read_random_index_pack(f) {
        Ok(e) => e,
        Err(_) => return Ok(None),
    };

    let mut partitions = Vec::with_capacity(entries.len());
    for entry in entries {
        f.seek(SeekFrom::Start(entry.byte_offset))?;
        match PartitionPack::read(f) {
            Ok(p) => partitions.push(p),
            Err(e) => {
                warn!(offset = entry.byte_offset, error = %e, "RIP entry did not point at a partition pack");
                return Ok(None);
            }
        }
    }
    trace!(count = partitions.len(), "recovered partition list via RIP");
    Ok(Some(partitions))
}

/// Without a Random Index Pack the body data's length isn't declared
/// anywhere in the partition pack itself, so after the header metadata and
/// index table this scans forward KLV triple by triple until it finds the
/// next partition-pack-shaped key.
fn walk_partitions_forward(f: &mut dyn MxfFile, size: u64) -> Result<Vec<PartitionPack>> {
    let mut partitions = Vec::new();
    let mut pos = 0u64;
    loop {
        f.seek(SeekFrom::Start(pos))?;
        let pack = PartitionPack::read(f)?;
        let is_footer = pack.kind == PartitionKind::Footer;
        let mut cursor = pos + pack.pack_byte_size + pack.header_byte_count + pack.index_byte_count;
        partitions.push(pack);
        if is_footer {
            break;
        }

        let next = loop {
            if cursor >= size {
                break None;
            }
            f.seek(SeekFrom::Start(cursor))?;
            let kl = read_kl(f)?;
            if is_partition_pack_key(&kl.key) {
                break Some(cursor);
            }
            cursor += kl.kl_size + kl.value_length;
        };
        match next {
            Some(n) if n > pos => pos = n,
            _ => break,
        }
    }
    Ok(partitions)
}

/// Composites several [`SingleFileReader`]s' track readers into one logical
/// timeline at the lowest member sample rate, for clips split across files.
pub struct GroupReader {
    pub group_edit_rate: Rational,
    member_edit_rates: Vec<Rational>,
}

impl GroupReader {
    pub fn new(member_edit_rates: Vec<Rational>) -> Result<Self> {
        if member_edit_rates.is_empty() {
            return Err(Error::Parse("group reader requires at least one member".into()));
        }
        let group_edit_rate = member_edit_rates
            .iter()
            .copied()
            .min_by(|a, b| a.as_f64().partial_cmp(&b.as_f64()).unwrap())
            .unwrap();
        Ok(Self {
            group_edit_rate,
            member_edit_rates,
        })
    }

    /// Convert a group-timeline edit-unit position to the corresponding
    /// member-timeline position for member index `member`.
    pub fn group_to_member_position(&self, group_position: i64, member: usize) -> i64 {
        let member_rate = self.member_edit_rates[member];
        let ratio = member_rate.as_f64() / self.group_edit_rate.as_f64();
        (group_position as f64 * ratio).round() as i64
    }

    pub fn member_to_group_position(&self, member_position: i64, member: usize) -> i64 {
        let member_rate = self.member_edit_rates[member];
        let ratio = self.group_edit_rate.as_f64() / member_rate.as_f64();
        (member_position as f64 * ratio).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmx_io::MemoryFile;
    use std::io::SeekFrom;

    fn test_key(last: u8) -> Key {
        let mut b = [0u8; 16];
        b[0] = 0x06;
        b[15] = last;
        Key::new(b)
    }

    #[test]
    fn read_index_segment_round_trips_via_write_segment() {
        use crate::index::{IndexEngine, IndexKey};
        let mut engine = IndexEngine::new(false);
        let key = IndexKey {
            index_sid: 2,
            body_sid: 1,
        };
        let rate = Rational::new(25, 1);
        engine.append_vbe_edit_unit(key, rate, 0, 0, 0).unwrap();
        engine.append_vbe_edit_unit(key, rate, 500, 0, 0).unwrap();

        let mut f = MemoryFile::new();
        engine.write_segments(&mut f, key).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();

        let kl = read_kl(&mut f).unwrap();
        assert_eq!(kl.key, INDEX_TABLE_SEGMENT_KEY);
        let mut value = vec![0u8; kl.value_length as usize];
        f.read_exact(&mut value).unwrap();

        let decoded = ReadIndexSegment::decode(&value).unwrap();
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[1].stream_offset, 500);
        assert!(!decoded.is_cbe());
    }

    #[test]
    fn frame_metadata_reader_ignores_other_keys() {
        let reader = FrameMetadataReader::new(Some(test_key(1)));
        let meta = reader.parse_system_item(&test_key(2), &[0, 0]);
        assert!(meta.timecodes.is_empty());
        assert!(meta.bbc_crc32.is_none());
    }

    #[test]
    fn frame_metadata_reader_extracts_timecodes() {
        let system_key = test_key(1);
        let reader = FrameMetadataReader::new(Some(system_key));
        let mut payload = vec![0u8, 1u8];
        payload.extend_from_slice(&10u32.to_be_bytes());
        let meta = reader.parse_system_item(&system_key, &payload);
        assert_eq!(meta.timecodes, vec![10]);
    }

    #[test]
    fn group_reader_picks_lowest_member_rate() {
        let group = GroupReader::new(vec![Rational::new(25, 1), Rational::new(50, 1)]).unwrap();
        assert_eq!(group.group_edit_rate, Rational::new(25, 1));
        assert_eq!(group.group_to_member_position(10, 1), 20);
        assert_eq!(group.member_to_group_position(20, 1), 10);
    }
}
