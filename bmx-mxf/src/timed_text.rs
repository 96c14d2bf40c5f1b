//! Timed-text track support: a single clip-wrapped TTML resource plus its
//! ancillary resources (fonts, images), each in its own dedicated stream
//! partition, read on demand through a caller-supplied provider rather than
//! being buffered into memory up front.

use std::io::SeekFrom;

use bmx_io::MxfFile;
use bmx_klv::{write_ber_length, write_fill_to_kag, Key};
use bmx_model::Rational;

use crate::error::Result;
use crate::index::{IndexEngine, IndexKey};
use crate::partition::{PartitionKind, PartitionPack, PartitionStatus, RandomIndexEntry};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Identifies one of a timed-text track's ancillary resources (a font or
/// image the TTML document references), as assigned by the caller's own
/// manifest.
pub type AncillaryResourceId = u32;

/// Supplies timed-text essence bytes on demand. `None` identifies the
/// primary TTML document; `Some(id)` an ancillary resource.
pub trait TimedTextResourceProvider {
    /// Total size in bytes of the identified resource.
    fn resource_size(&mut self, resource_id: Option<AncillaryResourceId>) -> Result<u64>;

    /// Open the resource for reading; called once before the first `read`.
    fn open_resource(&mut self, resource_id: Option<AncillaryResourceId>) -> Result<()>;

    /// Fill `buf` with up to `buf.len()` bytes, returning the number read.
    /// Returns `0` once the resource is exhausted.
    fn read(&mut self, resource_id: Option<AncillaryResourceId>, buf: &mut [u8]) -> Result<usize>;
}

/// Duration, in edit units, of the pre-roll filler a timed-text track's
/// structural sequence needs ahead of its source clip, given the track's
/// start offset relative to the material package timeline. `None` when the
/// track starts at the timeline origin and no filler component is needed.
pub fn preroll_filler_duration(start_offset: i64) -> Option<i64> {
    if start_offset > 0 {
        Some(start_offset)
    } else {
        None
    }
}

/// Write a clip-wrapped KLV value whose bytes are pulled from `provider`
/// rather than held in memory, since timed-text resources (fonts, embedded
/// images) can be large.
fn write_provider_data(
    f: &mut dyn MxfFile,
    key: &Key,
    resource_id: Option<AncillaryResourceId>,
    provider: &mut dyn TimedTextResourceProvider,
) -> Result<()> {
    provider.open_resource(resource_id)?;
    let data_size = provider.resource_size(resource_id)?;

    key.write(f)?;
    write_ber_length(f, data_size)?;

    let mut buf = [0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;
    while written < data_size {
        let n = provider.read(resource_id, &mut buf)?;
        if n == 0 {
            break;
        }
        f.write_all(&buf[..n])?;
        written += n as u64;
    }
    Ok(())
}

/// One dedicated, clip-wrapped stream partition: the primary TTML document
/// or a single ancillary resource, each with its own `body_sid`.
///
/// The primary document's partition also carries a partial index table
/// segment covering only its first (and only) edit unit, matching how a
/// clip-wrapped single-value essence container is indexed.
pub struct TimedTextWriter {
    pub body_sid: u32,
    pub index_sid: u32,
    operational_pattern: Key,
    essence_container: Key,
    kag_size: u32,
}

impl TimedTextWriter {
    pub fn new(body_sid: u32, index_sid: u32, operational_pattern: Key, essence_container: Key, kag_size: u32) -> Self {
        Self {
            body_sid,
            index_sid,
            operational_pattern,
            essence_container,
            kag_size,
        }
    }

    /// Write the primary TTML resource's dedicated stream partition: partial
    /// index table (one entry, indexing the single clip-wrapped value) then
    /// the clip-wrapped essence element itself.
    pub fn write_document(
        &self,
        f: &mut dyn MxfFile,
        element_key: Key,
        edit_rate: Rational,
        previous_partition: u64,
        provider: &mut dyn TimedTextResourceProvider,
    ) -> Result<(PartitionPack, RandomIndexEntry)> {
        let offset = f.tell()?;
        let mut pack = PartitionPack::new(PartitionKind::Body, PartitionStatus::ClosedComplete, self.kag_size);
        pack.operational_pattern = self.operational_pattern;
        pack.essence_containers.push(self.essence_container);
        pack.index_sid = self.index_sid;
        pack.body_sid = self.body_sid;
        pack.this_partition = offset;
        pack.previous_partition = previous_partition;
        pack.write(f)?;

        let index_start = f.tell()?;
        let key = IndexKey {
            index_sid: self.index_sid,
            body_sid: self.body_sid,
        };
        let mut index = IndexEngine::new(true);
        // A clip-wrapped container holds one value; the index "indexes" only
        // that first edit unit, not the track's full duration.
        index.append_vbe_edit_unit(key, edit_rate, 0, 0, 0)?;
        index.write_segments(f, key)?;
        let index_byte_count = f.tell()? - index_start;

        write_provider_data(f, &element_key, None, provider)?;
        write_fill_to_kag(f, self.kag_size)?;
        let end = f.tell()?;

        f.seek(SeekFrom::Start(offset))?;
        pack.index_byte_count = index_byte_count;
        pack.write(f)?;
        f.seek(SeekFrom::Start(end))?;

        Ok((pack, RandomIndexEntry { body_sid: self.body_sid, byte_offset: offset }))
    }

    /// Write one ancillary resource's dedicated stream partition: just the
    /// clip-wrapped element, no index table (per the original bmx writer,
    /// ancillary resources aren't indexed).
    pub fn write_ancillary_resource(
        &self,
        f: &mut dyn MxfFile,
        resource_id: AncillaryResourceId,
        element_key: Key,
        previous_partition: u64,
        provider: &mut dyn TimedTextResourceProvider,
    ) -> Result<(PartitionPack, RandomIndexEntry)> {
        let offset = f.tell()?;
        let mut pack = PartitionPack::new(PartitionKind::Body, PartitionStatus::ClosedComplete, self.kag_size);
        pack.operational_pattern = self.operational_pattern;
        pack.essence_containers.push(self.essence_container);
        pack.index_sid = 0;
        pack.body_sid = self.body_sid;
        pack.this_partition = offset;
        pack.previous_partition = previous_partition;
        pack.write(f)?;

        write_provider_data(f, &element_key, Some(resource_id), provider)?;
        write_fill_to_kag(f, self.kag_size)?;

        Ok((pack, RandomIndexEntry { body_sid: self.body_sid, byte_offset: offset }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmx_io::MemoryFile;

    struct FakeProvider {
        document: Vec<u8>,
        ancillary: Vec<(AncillaryResourceId, Vec<u8>)>,
        cursor: usize,
    }

    impl TimedTextResourceProvider for FakeProvider {
        fn resource_size(&mut self, resource_id: Option<AncillaryResourceId>) -> Result<u64> {
            Ok(match resource_id {
                None => self.document.len() as u64,
                Some(id) => self.ancillary.iter().find(|(i, _)| *i == id).unwrap().1.len() as u64,
            })
        }

        fn open_resource(&mut self, _resource_id: Option<AncillaryResourceId>) -> Result<()> {
            self.cursor = 0;
            Ok(())
        }

        fn read(&mut self, resource_id: Option<AncillaryResourceId>, buf: &mut [u8]) -> Result<usize> {
            let data = match resource_id {
                None => &self.document,
                Some(id) => &self.ancillary.iter().find(|(i, _)| *i == id).unwrap().1,
            };
            let remaining = &data[self.cursor..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.cursor += n;
            Ok(n)
        }
    }

    #[test]
    fn preroll_filler_is_none_at_timeline_origin() {
        assert_eq!(preroll_filler_duration(0), None);
        assert_eq!(preroll_filler_duration(25), Some(25));
    }

    #[test]
    fn document_partition_round_trips_with_a_partial_index() {
        let mut f = MemoryFile::new();
        let mut provider = FakeProvider {
            document: b"<tt>hello</tt>".to_vec(),
            ancillary: vec![(1, b"fontdata".to_vec())],
            cursor: 0,
        };

        let writer = TimedTextWriter::new(2, 2, Key::new([3; 16]), Key::new([4; 16]), 0x200);
        let (pack, entry) = writer
            .write_document(&mut f, Key::new([9; 16]), Rational::new(25, 1), 0, &mut provider)
            .unwrap();
        assert_eq!(pack.body_sid, 2);
        assert_eq!(entry.byte_offset, 0);

        f.seek(SeekFrom::Start(0)).unwrap();
        let reread = PartitionPack::read(&mut f).unwrap();
        assert_eq!(reread.index_sid, 2);
        assert!(reread.index_byte_count > 0);
    }

    #[test]
    fn ancillary_resource_partition_carries_no_index() {
        let mut f = MemoryFile::new();
        let mut provider = FakeProvider {
            document: b"<tt>hello</tt>".to_vec(),
            ancillary: vec![(1, b"fontdata".to_vec())],
            cursor: 0,
        };

        let writer = TimedTextWriter::new(3, 0, Key::new([3; 16]), Key::new([4; 16]), 0x200);
        let (pack, entry) = writer
            .write_ancillary_resource(&mut f, 1, Key::new([10; 16]), 0, &mut provider)
            .unwrap();
        assert_eq!(pack.body_sid, 3);
        assert_eq!(entry.body_sid, 3);

        f.seek(SeekFrom::Start(0)).unwrap();
        let reread = PartitionPack::read(&mut f).unwrap();
        assert_eq!(reread.index_byte_count, 0);
    }
}
