//! RIFF/RF64/BW64 WAVE writer.
//!
//! Shares its file abstraction with `bmx-mxf` through [`bmx_io::MxfFile`]
//! rather than committing to a disk-only writer, so the same writer runs
//! against a temp file, an in-memory buffer, or any other backend. Like the
//! MXF writer's two-pass header rewrite, size promotion is decided at
//! [`WaveWriter::complete`] time: a `JUNK` placeholder the exact size of a
//! `ds64` body is always reserved up front, and promoted in place only if
//! the finished file actually needs it, so promotion never changes the
//! file's length.

use std::io::SeekFrom;

use tracing::{debug, trace};

use bmx_io::MxfFile;

use crate::chunk::{
    pad_len, ChunkHeader, BEXT, BW64, CHNA, DATA, DS64, DS64_BODY_SIZE, FACT, FMT, JUNK, RF64,
    RF64_SIZE_ESCAPE, RIFF, WAVE,
};
use crate::error::{Error, Result};

/// `fmt ` chunk fields (PCM and non-PCM `format_tag`s alike; this writer
/// never emits a compressed-format `cbSize` extension).
#[derive(Debug, Clone, Copy)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn avg_bytes_per_sec(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// EBU Tech 3285 broadcast extension. Fixed 602-byte body plus a free-text
/// coding history tail; omitted once a file is written as BW64.
#[derive(Debug, Clone)]
pub struct BroadcastExtension {
    pub description: [u8; 256],
    pub originator: [u8; 32],
    pub originator_reference: [u8; 32],
    pub origination_date: [u8; 10],
    pub origination_time: [u8; 8],
    pub time_reference: u64,
    pub version: u16,
    pub umid: [u8; 64],
    pub coding_history: Vec<u8>,
}

impl BroadcastExtension {
    fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(602 + self.coding_history.len());
        body.extend_from_slice(&self.description);
        body.extend_from_slice(&self.originator);
        body.extend_from_slice(&self.originator_reference);
        body.extend_from_slice(&self.origination_date);
        body.extend_from_slice(&self.origination_time);
        body.extend_from_slice(&(self.time_reference as u32).to_le_bytes());
        body.extend_from_slice(&((self.time_reference >> 32) as u32).to_le_bytes());
        body.extend_from_slice(&self.version.to_le_bytes());
        body.extend_from_slice(&self.umid);
        // Loudness fields (version >= 1) plus reserved padding, left zeroed;
        // this writer never populates EBU R128 loudness metadata.
        body.resize(602, 0);
        body.extend_from_slice(&self.coding_history);
        body
    }
}

/// One `chna` entry (ITU-R BS.2094): binds a WAVE track index to an ADM
/// audioTrackUID/audioTrackFormatID/audioPackFormatID triple.
#[derive(Debug, Clone, Copy)]
pub struct ChnaEntry {
    pub track_index: u16,
    pub track_uid: [u8; 12],
    pub track_format_ref: [u8; 14],
    pub pack_format_ref: [u8; 11],
}

impl ChnaEntry {
    fn encode(&self) -> [u8; 40] {
        let mut out = [0u8; 40];
        out[0..2].copy_from_slice(&self.track_index.to_le_bytes());
        out[2..14].copy_from_slice(&self.track_uid);
        out[14..28].copy_from_slice(&self.track_format_ref);
        out[28..39].copy_from_slice(&self.pack_format_ref);
        out
    }
}

/// A chunk the caller supplies verbatim, written after `chna` and before
/// `data` (e.g. a `LIST`/`INFO` block, or BW64's `axml`/`bxml`).
#[derive(Debug, Clone)]
pub struct UserChunk {
    pub id: [u8; 4],
    pub body: Vec<u8>,
}

/// Byte offsets this writer must revisit once the final size is known.
#[derive(Debug, Clone, Copy)]
struct PatchPoints {
    riff_size_field: u64,
    junk_or_ds64: u64,
    data_size_field: u64,
    data_start: u64,
}

pub struct WaveWriter<'f> {
    file: &'f mut dyn MxfFile,
    format: Option<WaveFormat>,
    is_bw64: bool,
    patch: Option<PatchPoints>,
    bytes_written: u64,
}

impl<'f> WaveWriter<'f> {
    /// Begin a new WAVE file. `adm` forces BW64 framing (required once any
    /// `chna`/`axml`/`bxml`/`sxml` chunk will be written); RF64 promotion for
    /// a plain PCM file is instead decided lazily at [`WaveWriter::complete`].
    pub fn new(file: &'f mut dyn MxfFile, adm: bool) -> Self {
        Self {
            file,
            format: None,
            is_bw64: adm,
            patch: None,
            bytes_written: 0,
        }
    }

    /// Write the RIFF header, the `ds64`-sized `JUNK` placeholder, and
    /// `fmt ` (plus any `bext`/`fact`/`chna`/user chunks). Must be called
    /// once before any `write_samples` call.
    pub fn begin(
        &mut self,
        format: WaveFormat,
        bext: Option<&BroadcastExtension>,
        chna: &[ChnaEntry],
        user_chunks: &[UserChunk],
    ) -> Result<()> {
        let form = if self.is_bw64 { BW64 } else { RIFF };
        ChunkHeader { id: form, size: 0 }.write(self.file)?; // size patched in `complete`
        let riff_size_field = self.file.tell()? - 4;
        self.file.write_all(&WAVE)?;

        let junk_or_ds64 = self.file.tell()?;
        ChunkHeader {
            id: JUNK,
            size: DS64_BODY_SIZE,
        }
        .write(self.file)?;
        self.file.write_all(&vec![0u8; DS64_BODY_SIZE as usize])?;

        if !self.is_bw64 {
            if let Some(bext) = bext {
                let body = bext.encode();
                ChunkHeader {
                    id: BEXT,
                    size: body.len() as u32,
                }
                .write(self.file)?;
                self.file.write_all(&body)?;
                self.write_pad(body.len() as u32)?;
            }
        }

        let fmt_body = Self::encode_fmt(&format);
        ChunkHeader {
            id: FMT,
            size: fmt_body.len() as u32,
        }
        .write(self.file)?;
        self.file.write_all(&fmt_body)?;
        self.write_pad(fmt_body.len() as u32)?;

        if !self.is_bw64 {
            // Carries the sample-frame count; unknown until `complete`, so
            // reserve it as zero (or the RF64 escape) and patch it there.
            ChunkHeader { id: FACT, size: 4 }.write(self.file)?;
            self.file.write_all(&0u32.to_le_bytes())?;
        }

        if !chna.is_empty() {
            let body_len = (chna.len() * 40) as u32;
            ChunkHeader { id: CHNA, size: body_len }.write(self.file)?;
            for entry in chna {
                self.file.write_all(&entry.encode())?;
            }
            self.write_pad(body_len)?;
        }

        for chunk in user_chunks {
            ChunkHeader {
                id: chunk.id,
                size: chunk.body.len() as u32,
            }
            .write(self.file)?;
            self.file.write_all(&chunk.body)?;
            self.write_pad(chunk.body.len() as u32)?;
        }

        ChunkHeader { id: DATA, size: 0 }.write(self.file)?;
        let data_size_field = self.file.tell()? - 4;
        let data_start = self.file.tell()?;

        self.format = Some(format);
        self.patch = Some(PatchPoints {
            riff_size_field,
            junk_or_ds64,
            data_size_field,
            data_start,
        });
        trace!(bw64 = self.is_bw64, "wrote WAVE header through data chunk start");
        Ok(())
    }

    fn encode_fmt(format: &WaveFormat) -> [u8; 16] {
        let mut body = [0u8; 16];
        body[0..2].copy_from_slice(&format.format_tag.to_le_bytes());
        body[2..4].copy_from_slice(&format.channels.to_le_bytes());
        body[4..8].copy_from_slice(&format.sample_rate.to_le_bytes());
        body[8..12].copy_from_slice(&format.avg_bytes_per_sec().to_le_bytes());
        body[12..14].copy_from_slice(&format.block_align().to_le_bytes());
        body[14..16].copy_from_slice(&format.bits_per_sample.to_le_bytes());
        body
    }

    fn write_pad(&mut self, size: u32) -> Result<()> {
        if pad_len(size) > 0 {
            self.file.write_all(&[0u8; 1])?;
        }
        Ok(())
    }

    /// Append raw sample bytes to the `data` chunk. Must be a multiple of
    /// the format's block alignment; the caller is responsible for framing.
    pub fn write_samples(&mut self, data: &[u8]) -> Result<()> {
        if self.format.is_none() {
            return Err(Error::FmtNotSet);
        }
        self.file.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Patch the RIFF/`data` sizes and `fact` sample count, promoting `JUNK`
    /// to `ds64` in place (and escaping the 32-bit size fields) if the file
    /// is BW64 or grew past what a 32-bit RIFF size can address.
    pub fn complete(mut self) -> Result<()> {
        let patch = self.patch.ok_or(Error::FmtNotSet)?;
        let format = self.format.ok_or(Error::FmtNotSet)?;

        if pad_len(self.bytes_written as u32) > 0 {
            self.file.write_all(&[0u8; 1])?;
        }

        let data_end = self.file.tell()?;
        let riff_size = data_end - (patch.riff_size_field + 4);
        let block_align = format.block_align().max(1) as u64;
        let sample_count = self.bytes_written / block_align;
        let needs_ds64 = self.is_bw64 || riff_size > RF64_SIZE_ESCAPE as u64;

        let fact_value = if needs_ds64 {
            self.promote_to_ds64(patch, riff_size, sample_count)?;
            RF64_SIZE_ESCAPE
        } else {
            self.file.seek(SeekFrom::Start(patch.riff_size_field))?;
            self.file.write_all(&(riff_size as u32).to_le_bytes())?;
            self.file.seek(SeekFrom::Start(patch.data_size_field))?;
            self.file.write_all(&(self.bytes_written as u32).to_le_bytes())?;
            sample_count as u32
        };

        if !self.is_bw64 {
            self.patch_fact(patch, fact_value)?;
        }

        debug!(bytes = self.bytes_written, ds64 = needs_ds64, "completed WAVE file");
        Ok(())
    }

    fn promote_to_ds64(&mut self, patch: PatchPoints, riff_size: u64, sample_count: u64) -> Result<()> {
        let form = if self.is_bw64 { BW64 } else { RF64 };
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&form)?;
        self.file.write_all(&RF64_SIZE_ESCAPE.to_le_bytes())?;

        self.file.seek(SeekFrom::Start(patch.junk_or_ds64))?;
        self.file.write_all(&DS64)?;
        self.file.write_all(&DS64_BODY_SIZE.to_le_bytes())?;
        self.file.write_all(&riff_size.to_le_bytes())?;
        self.file.write_all(&self.bytes_written.to_le_bytes())?;
        self.file.write_all(&sample_count.to_le_bytes())?;
        self.file.write_all(&0u32.to_le_bytes())?; // table-of-sizes count: none

        self.file.seek(SeekFrom::Start(patch.data_size_field))?;
        self.file.write_all(&RF64_SIZE_ESCAPE.to_le_bytes())?;
        Ok(())
    }

    /// Walk forward from the header's fixed chunk run to find `fact`'s
    /// size-field offset and patch in `value`. Cheap: `begin` wrote only a
    /// handful of chunks before it.
    fn patch_fact(&mut self, patch: PatchPoints, value: u32) -> Result<()> {
        self.file.seek(SeekFrom::Start(patch.junk_or_ds64))?;
        loop {
            let pos = self.file.tell()?;
            if pos >= patch.data_start {
                break;
            }
            let header = ChunkHeader::read(self.file)?;
            if header.id == FACT {
                self.file.write_all(&value.to_le_bytes())?;
                return Ok(());
            }
            let skip = header.size as i64 + pad_len(header.size) as i64;
            self.file.seek(SeekFrom::Current(skip))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmx_io::MemoryFile;

    fn pcm_format() -> WaveFormat {
        WaveFormat {
            format_tag: 1,
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
        }
    }

    fn read_chunks(f: &mut MemoryFile) -> Vec<([u8; 4], u32)> {
        f.seek(SeekFrom::Start(12)).unwrap(); // past RIFF/RF64/BW64 id+size+WAVE
        let mut out = Vec::new();
        loop {
            let pos = f.tell().unwrap();
            if pos >= f.size().unwrap() {
                break;
            }
            let header = match ChunkHeader::read(f) {
                Ok(h) => h,
                Err(_) => break,
            };
            out.push((header.id, header.size));
            let skip = header.size as i64 + pad_len(header.size) as i64;
            f.seek(SeekFrom::Current(skip)).unwrap();
        }
        out
    }

    #[test]
    fn small_pcm_file_stays_riff_with_junk() {
        let mut f = MemoryFile::new();
        let mut writer = WaveWriter::new(&mut f, false);
        writer.begin(pcm_format(), None, &[], &[]).unwrap();
        writer.write_samples(&[0u8; 8]).unwrap();
        writer.complete().unwrap();

        f.seek(SeekFrom::Start(0)).unwrap();
        let mut form = [0u8; 4];
        f.read_exact(&mut form).unwrap();
        assert_eq!(&form, b"RIFF");

        let chunks = read_chunks(&mut f);
        let ids: Vec<[u8; 4]> = chunks.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![*b"JUNK", *b"fmt ", *b"fact", *b"data"]);
        assert_eq!(chunks.last().unwrap().1, 8);
    }

    #[test]
    fn fact_chunk_carries_sample_frame_count() {
        let mut f = MemoryFile::new();
        let mut writer = WaveWriter::new(&mut f, false);
        writer.begin(pcm_format(), None, &[], &[]).unwrap();
        // block_align = 2 channels * 2 bytes = 4; 16 bytes = 4 sample frames.
        writer.write_samples(&[0u8; 16]).unwrap();
        writer.complete().unwrap();

        f.seek(SeekFrom::Start(12)).unwrap();
        loop {
            let header = ChunkHeader::read(&mut f).unwrap();
            if header.id == FACT {
                let mut count_bytes = [0u8; 4];
                f.read_exact(&mut count_bytes).unwrap();
                assert_eq!(u32::from_le_bytes(count_bytes), 4);
                break;
            }
            let skip = header.size as i64 + pad_len(header.size) as i64;
            f.seek(SeekFrom::Current(skip)).unwrap();
        }
    }

    #[test]
    fn adm_chna_forces_bw64_and_omits_bext_fact() {
        let mut f = MemoryFile::new();
        let mut writer = WaveWriter::new(&mut f, true);
        let chna = vec![ChnaEntry {
            track_index: 1,
            track_uid: *b"ATU_00000001",
            track_format_ref: *b"AT_00010001_01",
            pack_format_ref: *b"AP_00010001",
        }];
        writer.begin(pcm_format(), None, &chna, &[]).unwrap();
        writer.write_samples(&[0u8; 8]).unwrap();
        writer.complete().unwrap();

        f.seek(SeekFrom::Start(0)).unwrap();
        let mut form = [0u8; 4];
        f.read_exact(&mut form).unwrap();
        assert_eq!(&form, b"BW64");

        let chunks = read_chunks(&mut f);
        let ids: Vec<[u8; 4]> = chunks.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![*b"ds64", *b"fmt ", *b"chna", *b"data"]);
    }

    #[test]
    fn writer_round_trips_through_an_actual_disk_file() {
        use bmx_io::DiskFile;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("writer_round_trip.wav");

        {
            let mut f = DiskFile::open(&path, bmx_io::OpenMode::New).unwrap();
            let mut writer = WaveWriter::new(&mut f, false);
            writer.begin(pcm_format(), None, &[], &[]).unwrap();
            writer.write_samples(&[0u8; 16]).unwrap();
            writer.complete().unwrap();
        }

        let mut f = DiskFile::open(&path, bmx_io::OpenMode::Read).unwrap();
        let mut form = [0u8; 4];
        f.read_exact(&mut form).unwrap();
        assert_eq!(&form, b"RIFF");
    }
}
