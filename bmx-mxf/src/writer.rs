//! Top-level MXF writer driver.
//!
//! Sequences a header partition (primer + header metadata), one or more
//! body partitions and a footer partition, driven by a
//! [`ContentPackageAssembler`] for element framing and an [`IndexEngine`]
//! for per-edit-unit stream offsets.
//!
//! `WriterConfig::partition_interval` controls how often a fresh body
//! partition is opened; each body partition buffers its essence in memory
//! until it closes, so a self-contained index table segment can be written
//! before it (required for [`FooterIndexPolicy::Omit`]) without a second
//! pass over the output file. `WriterConfig::header_metadata_reserve` sizes
//! the header's fixed-space allocation used by the two-pass
//! reserve-and-rewrite path (`WriterConfig::input_duration` is `None`);
//! [`complete`](MxfWriter::complete) rewrites the header in place and fails
//! with [`Error::HeaderOverflow`] if the final metadata no longer fits.
//!
//! Stream offsets are always relative to the body partition an edit unit's
//! essence physically lives in, matching [`crate::reader::SingleFileReader`]'s
//! `essence_base_offset` convention. That reader currently locates only the
//! *first* body partition for a given BodySID, so output written with
//! `partition_interval: Some(_)` (more than one body partition) round-trips
//! through it only up to that first partition; see DESIGN.md.

use std::io::SeekFrom;

use tracing::{debug, trace};

use bmx_io::MxfFile;
use bmx_klv::{write_fill_to_kag, Key};
use bmx_metadata::{build_primer, write_header_metadata, Graph, StrongRef};
use bmx_model::Rational;

use crate::config::{FooterIndexPolicy, WriterConfig};
use crate::content_package::{ContentPackageAssembler, Track};
use crate::error::{Error, Result};
use crate::index::{IndexEngine, IndexKey};
use crate::partition::{
    write_random_index_pack, PartitionKind, PartitionPack, PartitionStatus, RandomIndexEntry,
};

const BODY_SID: u32 = 1;
const INDEX_SID: u32 = 1;
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Drives one MXF file's partitions, header metadata and index table to
/// completion.
pub struct MxfWriter<'f> {
    file: &'f mut dyn MxfFile,
    config: WriterConfig,
    essence_container: Key,
    operational_pattern: Key,
    edit_rate: Rational,

    graph: Graph,
    root: StrongRef,

    assembler: ContentPackageAssembler,
    index_key: IndexKey,
    /// Accumulates every edit unit's entry for the whole write when
    /// `footer_index_policy` is `Repeat`; reset at each body partition
    /// boundary when it's `Omit`, so each partition's own segment only
    /// covers its own edit units.
    index: IndexEngine,

    header_partition_offset: u64,
    current_partition_offset: u64,
    current_partition_pack: PartitionPack,
    /// Essence for the body partition currently being assembled, held in
    /// memory until the partition closes so its index table (if any) can be
    /// written before it.
    pending_essence: bmx_io::MemoryFile,
    partition_offsets: Vec<RandomIndexEntry>,
    edit_units_since_partition: u64,
    partition_start_edit_unit: i64,
    total_edit_units: u64,
    finished: bool,
}

impl<'f> MxfWriter<'f> {
    /// Begin a new file: writes the header partition pack and header
    /// metadata reachable from `root`, then opens the first body partition.
    ///
    /// If `config.input_duration` is `None`, `root`'s set is given
    /// `fixed_space = config.header_metadata_reserve` so [`complete`] can
    /// rewrite it in place once the final duration is known.
    pub fn begin(
        file: &'f mut dyn MxfFile,
        config: WriterConfig,
        essence_container: Key,
        operational_pattern: Key,
        edit_rate: Rational,
        mut graph: Graph,
        root: StrongRef,
    ) -> Result<Self> {
        let kag_size = config.kag_size;
        let reserve = config.header_metadata_reserve;
        let single_pass = config.is_single_pass();
        let footer_repeat = matches!(config.footer_index_policy, FooterIndexPolicy::Repeat);

        if !single_pass {
            graph.get_mut(root)?.fixed_space = Some(reserve);
        }

        let header_partition_offset = file.tell()?;
        let mut header_pack = PartitionPack::new(PartitionKind::Header, PartitionStatus::OpenIncomplete, kag_size);
        header_pack.operational_pattern = operational_pattern;
        header_pack.essence_containers.push(essence_container);
        header_pack.index_sid = INDEX_SID;
        header_pack.body_sid = 0;
        header_pack.this_partition = header_partition_offset;
        header_pack.write(file)?;

        let metadata_start = file.tell()?;
        let primer = build_primer(&graph, root)?;
        write_header_metadata(file, &graph, root, &primer)?;
        write_fill_to_kag(file, kag_size)?;
        let header_byte_count = file.tell()? - metadata_start;

        // The pack's encoded size doesn't change: every field is fixed-width
        // or an already-finalized essence container batch, so rewriting it
        // in place can't shift anything written after it.
        file.seek(SeekFrom::Start(header_partition_offset))?;
        header_pack.header_byte_count = header_byte_count;
        header_pack.write(file)?;
        file.seek(SeekFrom::Start(metadata_start + header_byte_count))?;

        let mut writer = Self {
            file,
            config,
            essence_container,
            operational_pattern,
            edit_rate,
            graph,
            root,
            assembler: ContentPackageAssembler::new(),
            index_key: IndexKey { index_sid: INDEX_SID, body_sid: BODY_SID },
            index: IndexEngine::new(footer_repeat),
            header_partition_offset,
            current_partition_offset: header_partition_offset,
            current_partition_pack: header_pack,
            pending_essence: bmx_io::MemoryFile::new(),
            partition_offsets: vec![RandomIndexEntry { body_sid: 0, byte_offset: header_partition_offset }],
            edit_units_since_partition: 0,
            partition_start_edit_unit: 0,
            total_edit_units: 0,
            finished: false,
        };
        writer.open_body_partition()?;
        Ok(writer)
    }

    pub fn register_track(&mut self, track: Track) -> usize {
        self.assembler.register_track(track)
    }

    pub fn track_mut(&mut self, index: usize) -> &mut Track {
        self.assembler.track_mut(index)
    }

    /// Attempt to flush one content package once every registered track has
    /// a complete edit unit buffered. Returns `false` if not ready yet.
    pub fn try_flush(&mut self) -> Result<bool> {
        let stream_offset = self.pending_essence.size()?;
        if !self.assembler.try_write_content_package(&mut self.pending_essence)? {
            return Ok(false);
        }
        self.index
            .append_vbe_edit_unit(self.index_key, self.edit_rate, stream_offset, 0, 0)?;
        self.edit_units_since_partition += 1;
        self.total_edit_units += 1;
        trace!(total = self.total_edit_units, "wrote content package");

        if let Some(interval) = self.config.partition_interval {
            if self.edit_units_since_partition >= interval {
                self.close_body_partition(PartitionStatus::OpenIncomplete)?;
                self.open_body_partition()?;
            }
        }
        Ok(true)
    }

    /// Back-patch a temporally-reordered edit unit's presentation offset,
    /// e.g. once a long-GOP picture track's decode order reveals a
    /// B-frame's true display position.
    ///
    /// Under [`FooterIndexPolicy::Omit`], an edit unit belonging to an
    /// already-closed body partition has had its index segment written to
    /// disk already; this writer doesn't retain that segment's file offset,
    /// so the correction can't be applied and this fails with
    /// [`Error::TemporalReorderingNeedsSeek`] regardless of whether the
    /// output is actually seekable. Callers using reordered essence with
    /// `Omit` must back-patch before the edit unit's partition closes.
    pub fn record_temporal_offset(&mut self, edit_unit_position: i64, temporal_offset: i8) -> Result<()> {
        let already_closed = matches!(self.config.footer_index_policy, FooterIndexPolicy::Omit)
            && edit_unit_position < self.partition_start_edit_unit;
        if already_closed {
            return Err(Error::TemporalReorderingNeedsSeek);
        }
        self.index
            .back_patch_temporal_offset(self.index_key, edit_unit_position, temporal_offset, None, self.file)?;
        Ok(())
    }

    /// Write a timed-text track's primary TTML document into its own
    /// dedicated, clip-wrapped stream partition with a partial index table.
    /// Brackets the insert between a close and reopen of the regular body
    /// partition so the dedicated partition never overlaps still-buffered
    /// essence, regardless of when the caller invokes this relative to
    /// normal track writes.
    pub fn write_timed_text_document(
        &mut self,
        body_sid: u32,
        index_sid: u32,
        element_key: Key,
        edit_rate: Rational,
        provider: &mut dyn crate::timed_text::TimedTextResourceProvider,
    ) -> Result<()> {
        self.close_body_partition(PartitionStatus::OpenIncomplete)?;
        let tt = crate::timed_text::TimedTextWriter::new(
            body_sid,
            index_sid,
            self.operational_pattern,
            self.essence_container,
            self.config.kag_size,
        );
        let (_, entry) = tt.write_document(self.file, element_key, edit_rate, self.current_partition_offset, provider)?;
        self.partition_offsets.push(entry);
        self.current_partition_offset = entry.byte_offset;
        self.open_body_partition()
    }

    /// Write one of a timed-text track's ancillary resources (a font or
    /// image the TTML references) into its own dedicated stream partition.
    /// Same bracketing as [`MxfWriter::write_timed_text_document`].
    pub fn write_timed_text_ancillary_resource(
        &mut self,
        body_sid: u32,
        resource_id: crate::timed_text::AncillaryResourceId,
        element_key: Key,
        provider: &mut dyn crate::timed_text::TimedTextResourceProvider,
    ) -> Result<()> {
        self.close_body_partition(PartitionStatus::OpenIncomplete)?;
        let tt = crate::timed_text::TimedTextWriter::new(
            body_sid,
            0,
            self.operational_pattern,
            self.essence_container,
            self.config.kag_size,
        );
        let (_, entry) =
            tt.write_ancillary_resource(self.file, resource_id, element_key, self.current_partition_offset, provider)?;
        self.partition_offsets.push(entry);
        self.current_partition_offset = entry.byte_offset;
        self.open_body_partition()
    }

    fn open_body_partition(&mut self) -> Result<()> {
        let offset = self.file.tell()?;
        let mut pack = PartitionPack::new(PartitionKind::Body, PartitionStatus::OpenIncomplete, self.config.kag_size);
        pack.operational_pattern = self.operational_pattern;
        pack.essence_containers.push(self.essence_container);
        pack.index_sid = INDEX_SID;
        pack.body_sid = BODY_SID;
        pack.body_offset = self.total_edit_units;
        pack.this_partition = offset;
        pack.previous_partition = self.current_partition_offset;
        pack.write(self.file)?;

        self.partition_offsets.push(RandomIndexEntry { body_sid: BODY_SID, byte_offset: offset });
        self.current_partition_offset = offset;
        self.current_partition_pack = pack;
        self.pending_essence = bmx_io::MemoryFile::new();
        self.edit_units_since_partition = 0;
        self.partition_start_edit_unit = self.total_edit_units as i64;
        if matches!(self.config.footer_index_policy, FooterIndexPolicy::Omit) {
            self.index = IndexEngine::new(false);
        }
        trace!(offset, "opened body partition");
        Ok(())
    }

    /// Write this partition's index (if `Omit`) and buffered essence, then
    /// rewrite its partition pack now that `index_byte_count` is known.
    fn close_body_partition(&mut self, status: PartitionStatus) -> Result<()> {
        let pack_start = self.current_partition_pack.this_partition;
        let index_start = self.file.tell()?;
        if matches!(self.config.footer_index_policy, FooterIndexPolicy::Omit) {
            self.index.write_segments(self.file, self.index_key)?;
        }
        let index_byte_count = self.file.tell()? - index_start;

        self.pending_essence.seek(SeekFrom::Start(0))?;
        copy_all(&mut self.pending_essence, self.file)?;

        let essence_end = self.file.tell()?;
        self.file.seek(SeekFrom::Start(pack_start))?;
        self.current_partition_pack.status = status;
        self.current_partition_pack.index_byte_count = index_byte_count;
        self.current_partition_pack.write(self.file)?;
        self.file.seek(SeekFrom::Start(essence_end))?;
        Ok(())
    }

    /// Finish the file: close the last body partition, rewrite the header's
    /// reserved metadata with its final contents (two-pass path), and write
    /// the footer partition, optional repeated index and the trailing
    /// Random Index Pack.
    pub fn complete(mut self) -> Result<()> {
        self.close_body_partition(PartitionStatus::ClosedComplete)?;

        if !self.config.is_single_pass() {
            self.rewrite_header_metadata()?;
        }

        let footer_offset = self.file.tell()?;
        let mut footer = PartitionPack::new(PartitionKind::Footer, PartitionStatus::ClosedComplete, self.config.kag_size);
        footer.operational_pattern = self.operational_pattern;
        footer.essence_containers.push(self.essence_container);
        footer.index_sid = INDEX_SID;
        footer.body_sid = 0;
        footer.body_offset = self.total_edit_units;
        footer.this_partition = footer_offset;
        footer.previous_partition = self.current_partition_offset;
        footer.footer_partition = footer_offset;

        footer.write(self.file)?;
        let index_start = self.file.tell()?;
        if matches!(self.config.footer_index_policy, FooterIndexPolicy::Repeat) {
            self.index.write_segments(self.file, self.index_key)?;
        }
        let index_byte_count = self.file.tell()? - index_start;
        if index_byte_count > 0 {
            self.file.seek(SeekFrom::Start(footer_offset))?;
            footer.index_byte_count = index_byte_count;
            footer.write(self.file)?;
            self.file.seek(SeekFrom::End(0))?;
        }

        write_random_index_pack(self.file, &self.partition_offsets, footer_offset)?;
        debug!(edit_units = self.total_edit_units, "completed mxf write");
        self.finished = true;
        Ok(())
    }

    /// Rewrite the header's fixed-space-allocated metadata in place, now
    /// that the caller has updated `graph_mut()`'s root set (e.g. a final
    /// Duration) with the true final values. Fails with
    /// [`Error::HeaderOverflow`] if the rewritten metadata no longer fits in
    /// the original reservation.
    fn rewrite_header_metadata(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.header_partition_offset))?;
        let header_pack = PartitionPack::read(self.file)?;
        let metadata_start = self.header_partition_offset + header_pack.pack_byte_size;
        self.file.seek(SeekFrom::Start(metadata_start))?;

        let primer = build_primer(&self.graph, self.root)?;
        match write_header_metadata(self.file, &self.graph, self.root, &primer) {
            Ok(()) => {}
            Err(bmx_metadata::Error::FixedSpaceOverflow(_, reserved, needed)) => {
                return Err(Error::HeaderOverflow { reserved, needed });
            }
            Err(other) => return Err(Error::Metadata(other)),
        }

        // The Preface's own fixed-space check only bounds that one set; a
        // newly-added item key can still grow the primer pack enough to push
        // the overall header past what was reserved at `begin`.
        let written = self.file.tell()? - metadata_start;
        if written > header_pack.header_byte_count {
            return Err(Error::HeaderOverflow {
                reserved: header_pack.header_byte_count,
                needed: written,
            });
        }
        self.file.seek(SeekFrom::Start(metadata_start + header_pack.header_byte_count))?;
        Ok(())
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn root(&self) -> StrongRef {
        self.root
    }
}

fn copy_all(src: &mut dyn MxfFile, dst: &mut dyn MxfFile) -> Result<()> {
    let mut buf = [0u8; COPY_BUFFER_SIZE];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperationalPattern;
    use bmx_io::MemoryFile;
    use bmx_klv::Uuid;
    use bmx_metadata::{MetadataSet, Item};
    use bmx_model::{baseline::{INSTANCE_UID, PREFACE}, Value};

    fn preface_graph() -> (Graph, StrongRef) {
        let mut graph = Graph::new();
        let mut preface = MetadataSet::new(PREFACE, Uuid([7; 16]));
        preface.set_item(Item { key: INSTANCE_UID, value: Value::Uuid(Uuid([7; 16])) });
        let root = graph.insert(preface);
        (graph, root)
    }

    fn config(interval: Option<u64>, policy: FooterIndexPolicy) -> WriterConfig {
        WriterConfig {
            operational_pattern: OperationalPattern::Op1a,
            kag_size: 0x200,
            partition_interval: interval,
            header_metadata_reserve: 1024,
            footer_index_policy: policy,
            profile: Default::default(),
            input_duration: None,
        }
    }

    fn picture_track(assembler: &mut MxfWriter) -> usize {
        assembler.register_track(Track::new(
            crate::content_package::TrackKind::Picture,
            Key::new([9; 16]),
            vec![1],
            None,
        ))
    }

    #[test]
    fn single_partition_write_round_trips_through_the_rip() {
        let (graph, root) = preface_graph();
        let mut f = MemoryFile::new();
        let mut writer = MxfWriter::begin(
            &mut f,
            config(None, FooterIndexPolicy::Repeat),
            Key::new([2; 16]),
            Key::new([3; 16]),
            Rational::new(25, 1),
            graph,
            root,
        )
        .unwrap();

        let track = picture_track(&mut writer);
        for frame in 0..4u8 {
            writer.track_mut(track).write_samples(&[frame; 10], 1);
            assert!(writer.try_flush().unwrap());
        }
        writer.complete().unwrap();

        f.seek(SeekFrom::Start(0)).unwrap();
        let header = PartitionPack::read(&mut f).unwrap();
        assert_eq!(header.kind, PartitionKind::Header);

        let size = f.size().unwrap();
        f.seek(SeekFrom::Start(size - 4)).unwrap();
        let mut len_bytes = [0u8; 4];
        f.read_exact(&mut len_bytes).unwrap();
        let rip_len = u32::from_be_bytes(len_bytes) as u64;
        f.seek(SeekFrom::Start(size - rip_len)).unwrap();
        let entries = crate::partition::read_random_index_pack(&mut f).unwrap();
        // header (BodySID 0), one body partition, footer (BodySID 0).
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].body_sid, BODY_SID);
    }

    #[test]
    fn partition_interval_opens_additional_body_partitions() {
        let (graph, root) = preface_graph();
        let mut f = MemoryFile::new();
        let mut writer = MxfWriter::begin(
            &mut f,
            config(Some(2), FooterIndexPolicy::Omit),
            Key::new([2; 16]),
            Key::new([3; 16]),
            Rational::new(25, 1),
            graph,
            root,
        )
        .unwrap();

        let track = picture_track(&mut writer);
        for frame in 0..5u8 {
            writer.track_mut(track).write_samples(&[frame; 10], 1);
            assert!(writer.try_flush().unwrap());
        }
        writer.complete().unwrap();

        f.seek(SeekFrom::Start(0)).unwrap();
        let size = f.size().unwrap();
        f.seek(SeekFrom::Start(size - 4)).unwrap();
        let mut len_bytes = [0u8; 4];
        f.read_exact(&mut len_bytes).unwrap();
        let rip_len = u32::from_be_bytes(len_bytes) as u64;
        f.seek(SeekFrom::Start(size - rip_len)).unwrap();
        let entries = crate::partition::read_random_index_pack(&mut f).unwrap();
        // header, two interval-closed body partitions (2+2 edit units) plus
        // the final partial one (1 edit unit), then the footer.
        assert_eq!(entries.len(), 5);
    }

    #[test]
    fn header_overflow_is_reported_when_final_metadata_does_not_fit() {
        let (graph, root) = preface_graph();
        let mut f = MemoryFile::new();
        let mut config = config(None, FooterIndexPolicy::Repeat);
        // Just enough room for the initial InstanceUID-only Preface, not for
        // the larger item added below.
        config.header_metadata_reserve = 64;
        let mut writer = MxfWriter::begin(
            &mut f,
            config,
            Key::new([2; 16]),
            Key::new([3; 16]),
            Rational::new(25, 1),
            graph,
            root,
        )
        .unwrap();

        let track = picture_track(&mut writer);
        writer.track_mut(track).write_samples(&[1; 4], 1);
        assert!(writer.try_flush().unwrap());

        let big_item_key = Key::new([5; 16]);
        writer.graph_mut().get_mut(writer.root()).unwrap().set_item(Item {
            key: big_item_key,
            value: Value::Raw(vec![0u8; 100]),
        });

        let err = writer.complete().unwrap_err();
        assert!(matches!(err, Error::HeaderOverflow { .. }));
    }

    #[test]
    fn temporal_reorder_patch_fails_without_seek_once_omit_partition_closed() {
        let (graph, root) = preface_graph();
        let mut f = MemoryFile::new();
        let mut writer = MxfWriter::begin(
            &mut f,
            config(Some(1), FooterIndexPolicy::Omit),
            Key::new([2; 16]),
            Key::new([3; 16]),
            Rational::new(25, 1),
            graph,
            root,
        )
        .unwrap();

        let track = picture_track(&mut writer);
        writer.track_mut(track).write_samples(&[1; 4], 1);
        assert!(writer.try_flush().unwrap());
        writer.track_mut(track).write_samples(&[2; 4], 1);
        assert!(writer.try_flush().unwrap());

        // Edit unit 0's partition has already closed (interval is 1); its
        // index segment is already on disk and this writer doesn't retain
        // where, so the patch is refused outright.
        let err = writer.record_temporal_offset(0, 1).unwrap_err();
        assert!(matches!(err, Error::TemporalReorderingNeedsSeek));

        // Edit unit 1 is still in the open partition: pure in-memory patch.
        writer.record_temporal_offset(1, -1).unwrap();
    }

    #[test]
    fn written_file_reopens_from_disk_with_the_same_random_index_pack() {
        use bmx_io::{DiskFile, OpenMode};
        use pretty_assertions::assert_eq;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("writer_disk_round_trip.mxf");

        let (graph, root) = preface_graph();
        let mut disk = DiskFile::open(&path, OpenMode::New).unwrap();
        let mut writer = MxfWriter::begin(
            &mut disk,
            config(None, FooterIndexPolicy::Repeat),
            Key::new([2; 16]),
            Key::new([3; 16]),
            Rational::new(25, 1),
            graph,
            root,
        )
        .unwrap();

        let track = picture_track(&mut writer);
        for frame in 0..3u8 {
            writer.track_mut(track).write_samples(&[frame; 10], 1);
            assert!(writer.try_flush().unwrap());
        }
        writer.complete().unwrap();
        drop(disk);

        let mut reopened = DiskFile::open(&path, OpenMode::Read).unwrap();
        let size = reopened.size().unwrap();
        reopened.seek(SeekFrom::Start(size - 4)).unwrap();
        let mut len_bytes = [0u8; 4];
        reopened.read_exact(&mut len_bytes).unwrap();
        let rip_len = u32::from_be_bytes(len_bytes) as u64;
        reopened.seek(SeekFrom::Start(size - rip_len)).unwrap();
        let entries = crate::partition::read_random_index_pack(&mut reopened).unwrap();

        reopened.seek(SeekFrom::Start(0)).unwrap();
        let header = PartitionPack::read(&mut reopened).unwrap();

        assert_eq!(
            entries,
            vec![
                RandomIndexEntry { body_sid: 0, byte_offset: 0 },
                RandomIndexEntry { body_sid: BODY_SID, byte_offset: entries[1].byte_offset },
                RandomIndexEntry { body_sid: 0, byte_offset: entries[2].byte_offset },
            ]
        );
        assert_eq!(header.kind, PartitionKind::Header);
    }
}
