//! Index table engine.
//!
//! Maintains, per `(index_sid, body_sid, edit_rate)`, a list of CBE or VBE
//! segments. CBE segments carry only a delta-entry array (one entry per
//! element, shared by every edit unit); VBE segments carry one index entry
//! per edit unit, each with its own stream offset and (for temporally
//! reordered essence) temporal/key-frame offsets.

use std::collections::HashMap;

use bmx_io::MxfFile;
use bmx_klv::{write_klv, Key};
use bmx_model::Rational;

use crate::error::{Error, Result};

/// Roughly the largest entry-array size that keeps one segment's KLV value
/// under the practical ~65,000-entry cap this engine enforces.
pub const MAX_ENTRIES_PER_SEGMENT: usize = 65_000 - 64;

/// Index segments fail with `IndexOverflow` before a single segment would
/// exceed this many bytes of encoded index entry data.
pub const MAX_SEGMENT_BYTES: u64 = 2 * 1024 * 1024 * 1024;

pub const INDEX_TABLE_SEGMENT_KEY: Key = Key::new([
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x10, 0x01, 0x00,
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub index_sid: u32,
    pub body_sid: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DeltaEntry {
    /// -1 if this element uses temporal reordering, else 0.
    pub pos_table_index: i8,
    pub slice: u8,
    pub element_delta: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexEntry {
    pub temporal_offset: i8,
    pub key_frame_offset: i8,
    pub flags: u8,
    pub stream_offset: u64,
}

#[derive(Debug, Clone)]
pub enum SegmentBody {
    /// Constant bytes-per-edit-unit: the entries array is empty, only the
    /// shared delta-entry array and the fixed `edit_unit_byte_count` apply.
    Cbe { edit_unit_byte_count: u32 },
    /// Variable bytes-per-edit-unit: one entry per edit unit.
    Vbe { entries: Vec<IndexEntry> },
}

#[derive(Debug, Clone)]
pub struct IndexSegment {
    pub index_edit_rate: Rational,
    pub index_start_position: i64,
    pub index_duration: i64,
    pub delta_entries: Vec<DeltaEntry>,
    pub body: SegmentBody,
}

impl IndexSegment {
    pub fn new_cbe(index_edit_rate: Rational, start_position: i64, edit_unit_byte_count: u32) -> Self {
        Self {
            index_edit_rate,
            index_start_position: start_position,
            index_duration: 0,
            delta_entries: Vec::new(),
            body: SegmentBody::Cbe { edit_unit_byte_count },
        }
    }

    pub fn new_vbe(index_edit_rate: Rational, start_position: i64) -> Self {
        Self {
            index_edit_rate,
            index_start_position: start_position,
            index_duration: 0,
            delta_entries: Vec::new(),
            body: SegmentBody::Vbe { entries: Vec::new() },
        }
    }

    fn entry_count(&self) -> usize {
        match &self.body {
            SegmentBody::Cbe { .. } => self.index_duration.max(0) as usize,
            SegmentBody::Vbe { entries } => entries.len(),
        }
    }

    fn has_capacity(&self) -> bool {
        self.entry_count() < MAX_ENTRIES_PER_SEGMENT
    }

    /// Estimated on-disk size of this segment's index-entry data so far.
    fn estimated_bytes(&self) -> u64 {
        match &self.body {
            SegmentBody::Cbe { .. } => 0,
            SegmentBody::Vbe { entries } => (entries.len() * 11) as u64,
        }
    }
}

/// Element sizes measured from the first edit unit of a CBE segment, used to
/// compute the shared delta-entry array once and verify it on every
/// subsequent edit unit.
#[derive(Debug, Clone)]
struct DeltaEntryTemplate {
    entries: Vec<DeltaEntry>,
}

impl DeltaEntryTemplate {
    fn from_element_sizes(sizes: &[(bool, u8, u32)]) -> Self {
        // (apply_temporal_reordering, slice, element size in bytes)
        let mut entries = Vec::with_capacity(sizes.len());
        let mut running = HashMap::<u8, u32>::new();
        for &(temporal, slice, size) in sizes {
            let delta = *running.get(&slice).unwrap_or(&0);
            entries.push(DeltaEntry {
                pos_table_index: if temporal { -1 } else { 0 },
                slice,
                element_delta: delta,
            });
            *running.entry(slice).or_insert(0) += size;
        }
        // The array is omitted when a single all-zero-field element would
        // result (SMPTE 377-1 8.14: implicit single-delta-entry case).
        if entries.len() == 1 && entries[0].pos_table_index == 0 && entries[0].slice == 0 && entries[0].element_delta == 0 {
            entries.clear();
        }
        Self { entries }
    }
}

pub struct IndexEngine {
    segments: HashMap<IndexKey, Vec<IndexSegment>>,
    templates: HashMap<IndexKey, DeltaEntryTemplate>,
    footer_repeat: bool,
}

impl IndexEngine {
    pub fn new(footer_repeat: bool) -> Self {
        Self {
            segments: HashMap::new(),
            templates: HashMap::new(),
            footer_repeat,
        }
    }

    /// Register the element sizes for the first edit unit of a CBE stream,
    /// computing its delta-entry template once.
    pub fn establish_cbe_template(&mut self, key: IndexKey, element_sizes: &[(bool, u8, u32)]) {
        self.templates
            .insert(key, DeltaEntryTemplate::from_element_sizes(element_sizes));
    }

    /// Verify a later edit unit's element sizes still match the
    /// already-established template; a mismatch is an `InvariantViolation`
    /// (CBE element size mismatch across edit units).
    pub fn verify_cbe_element_sizes(&self, key: IndexKey, element_sizes: &[(bool, u8, u32)]) -> Result<()> {
        let Some(template) = self.templates.get(&key) else {
            return Ok(());
        };
        let candidate = DeltaEntryTemplate::from_element_sizes(element_sizes);
        if template.entries.len() == candidate.entries.len()
            && template
                .entries
                .iter()
                .zip(candidate.entries.iter())
                .all(|(a, b)| a.slice == b.slice && a.pos_table_index == b.pos_table_index && a.element_delta == b.element_delta)
        {
            Ok(())
        } else {
            Err(Error::InvariantViolation(
                "CBE element size mismatch across edit units".into(),
            ))
        }
    }

    fn current_segment_mut(
        &mut self,
        key: IndexKey,
        index_edit_rate: Rational,
        is_cbe: bool,
        edit_unit_byte_count: u32,
    ) -> &mut IndexSegment {
        let list = self.segments.entry(key).or_default();
        let needs_new = match list.last() {
            None => true,
            Some(seg) => !seg.has_capacity() || seg.estimated_bytes() >= MAX_SEGMENT_BYTES,
        };
        if needs_new {
            let start = list.last().map(|s| s.index_start_position + s.index_duration).unwrap_or(0);
            let mut seg = if is_cbe {
                IndexSegment::new_cbe(index_edit_rate, start, edit_unit_byte_count)
            } else {
                IndexSegment::new_vbe(index_edit_rate, start)
            };
            if let Some(template) = self.templates.get(&key) {
                seg.delta_entries = template.entries.clone();
            }
            list.push(seg);
        }
        list.last_mut().unwrap()
    }

    /// Append a CBE edit unit; the byte count per edit unit is fixed by the
    /// segment, so this only needs to advance the duration counter.
    pub fn append_cbe_edit_unit(&mut self, key: IndexKey, index_edit_rate: Rational, edit_unit_byte_count: u32) -> Result<()> {
        let seg = self.current_segment_mut(key, index_edit_rate, true, edit_unit_byte_count);
        if seg.estimated_bytes() >= MAX_SEGMENT_BYTES {
            return Err(Error::IndexOverflow);
        }
        seg.index_duration += 1;
        Ok(())
    }

    /// Append a VBE edit unit with a known stream offset, temporal offset
    /// defaulting to zero until a later `back_patch_temporal_offset` call
    /// updates it in place.
    pub fn append_vbe_edit_unit(
        &mut self,
        key: IndexKey,
        index_edit_rate: Rational,
        stream_offset: u64,
        key_frame_offset: i8,
        flags: u8,
    ) -> Result<()> {
        let seg = self.current_segment_mut(key, index_edit_rate, false, 0);
        if seg.estimated_bytes() >= MAX_SEGMENT_BYTES {
            return Err(Error::IndexOverflow);
        }
        if let SegmentBody::Vbe { entries } = &mut seg.body {
            entries.push(IndexEntry {
                temporal_offset: 0,
                key_frame_offset,
                flags,
                stream_offset,
            });
        }
        seg.index_duration += 1;
        Ok(())
    }

    /// Update the temporal offset of a previously-appended frame at decode
    /// position `frame_num + temporal_offset`, rewriting a single byte on
    /// disk via `f` if that entry has already been flushed past
    /// `flushed_up_to`, the position in the output file that writes have
    /// already reached.
    pub fn back_patch_temporal_offset(
        &mut self,
        key: IndexKey,
        edit_unit_position: i64,
        temporal_offset: i8,
        entry_file_offset: Option<(u64, u64)>,
        f: &mut dyn MxfFile,
    ) -> Result<()> {
        let Some(list) = self.segments.get_mut(&key) else {
            return Ok(());
        };
        for seg in list.iter_mut() {
            if edit_unit_position < seg.index_start_position
                || edit_unit_position >= seg.index_start_position + seg.index_duration
            {
                continue;
            }
            let idx = (edit_unit_position - seg.index_start_position) as usize;
            if let SegmentBody::Vbe { entries } = &mut seg.body {
                if let Some(entry) = entries.get_mut(idx) {
                    entry.temporal_offset = temporal_offset;
                }
            }
            if let Some((segment_base, entry_size)) = entry_file_offset {
                // Temporal offset is the first byte of each index entry.
                let byte_pos = segment_base + (idx as u64) * entry_size;
                f.seek(std::io::SeekFrom::Start(byte_pos))?;
                f.put_byte(temporal_offset as u8)?;
            }
            return Ok(());
        }
        Ok(())
    }

    pub fn segments_for(&self, key: IndexKey) -> Option<&[IndexSegment]> {
        self.segments.get(&key).map(|v| v.as_slice())
    }

    pub fn footer_repeat(&self) -> bool {
        self.footer_repeat
    }

    /// Encode every retained VBE segment for `key` as KLV index table
    /// segments, for writing into the header (footer-repeat) or body
    /// partition.
    pub fn write_segments(&self, f: &mut dyn MxfFile, key: IndexKey) -> Result<()> {
        let Some(segments) = self.segments.get(&key) else {
            return Ok(());
        };
        for seg in segments {
            write_segment(f, key, seg)?;
        }
        Ok(())
    }
}

fn write_segment(f: &mut dyn MxfFile, key: IndexKey, seg: &IndexSegment) -> Result<()> {
    let mut value = Vec::new();
    value.extend_from_slice(&(seg.index_edit_rate.numerator as u32).to_be_bytes());
    value.extend_from_slice(&(seg.index_edit_rate.denominator as u32).to_be_bytes());
    value.extend_from_slice(&seg.index_start_position.to_be_bytes());
    value.extend_from_slice(&seg.index_duration.to_be_bytes());

    let (edit_unit_byte_count, index_sid, body_sid) = match seg.body {
        SegmentBody::Cbe { edit_unit_byte_count } => (edit_unit_byte_count, key.index_sid, key.body_sid),
        SegmentBody::Vbe { .. } => (0, key.index_sid, key.body_sid),
    };
    value.extend_from_slice(&edit_unit_byte_count.to_be_bytes());
    value.extend_from_slice(&index_sid.to_be_bytes());
    value.extend_from_slice(&body_sid.to_be_bytes());

    value.extend_from_slice(&0u8.to_be_bytes()); // slice count placeholder (single slice)
    value.extend_from_slice(&0u8.to_be_bytes()); // pos table count placeholder

    value.extend_from_slice(&(seg.delta_entries.len() as u32).to_be_bytes());
    value.extend_from_slice(&6u32.to_be_bytes());
    for d in &seg.delta_entries {
        value.push(d.pos_table_index as u8);
        value.push(d.slice);
        value.extend_from_slice(&d.element_delta.to_be_bytes());
    }

    if let SegmentBody::Vbe { entries } = &seg.body {
        value.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        value.extend_from_slice(&11u32.to_be_bytes());
        for e in entries {
            value.push(e.temporal_offset as u8);
            value.push(e.key_frame_offset as u8);
            value.push(e.flags);
            value.extend_from_slice(&e.stream_offset.to_be_bytes());
        }
    } else {
        value.extend_from_slice(&0u32.to_be_bytes());
        value.extend_from_slice(&11u32.to_be_bytes());
    }

    write_klv(f, &INDEX_TABLE_SEGMENT_KEY, &value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate() -> Rational {
        Rational {
            numerator: 25,
            denominator: 1,
        }
    }

    #[test]
    fn single_zero_delta_entry_is_omitted() {
        let template = DeltaEntryTemplate::from_element_sizes(&[(false, 0, 0)]);
        assert!(template.entries.is_empty());
    }

    #[test]
    fn cbe_mismatch_is_rejected() {
        let mut engine = IndexEngine::new(false);
        let key = IndexKey {
            index_sid: 2,
            body_sid: 1,
        };
        engine.establish_cbe_template(key, &[(false, 0, 1000)]);
        assert!(engine.verify_cbe_element_sizes(key, &[(false, 0, 1000)]).is_ok());
        assert!(engine.verify_cbe_element_sizes(key, &[(false, 0, 2000)]).is_err());
    }

    #[test]
    fn new_segment_opened_once_capacity_exceeded() {
        let mut engine = IndexEngine::new(false);
        let key = IndexKey {
            index_sid: 2,
            body_sid: 1,
        };
        for i in 0..(MAX_ENTRIES_PER_SEGMENT + 5) {
            engine
                .append_vbe_edit_unit(key, rate(), i as u64 * 100, 0, 0)
                .unwrap();
        }
        assert_eq!(engine.segments_for(key).unwrap().len(), 2);
    }

    #[test]
    fn temporal_offset_back_patch_updates_entry_in_memory() {
        let mut engine = IndexEngine::new(false);
        let key = IndexKey {
            index_sid: 2,
            body_sid: 1,
        };
        engine.append_vbe_edit_unit(key, rate(), 0, 0, 0).unwrap();
        engine.append_vbe_edit_unit(key, rate(), 100, 0, 0).unwrap();
        let mut f = bmx_io::MemoryFile::new();
        engine
            .back_patch_temporal_offset(key, 0, 2, None, &mut f)
            .unwrap();
        let segs = engine.segments_for(key).unwrap();
        if let SegmentBody::Vbe { entries } = &segs[0].body {
            assert_eq!(entries[0].temporal_offset, 2);
        } else {
            panic!("expected VBE body");
        }
    }
}
