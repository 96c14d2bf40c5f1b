//! Content-package assembler: buffers per-track samples until a complete
//! edit unit is available, then emits one content package in the fixed
//! element order (system item, then picture, then sound, then data
//! elements) with each element prefixed by its 16-byte essence-element key.

use bmx_io::MxfFile;
use bmx_klv::{write_klv, Key};
use bmx_model::Rational;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    System,
    Picture,
    Sound,
    Data,
}

/// A sample-sequence-aware track: samples arrive at the source rate but are
/// emitted in edit-rate-sized chunks following a repeating cycle, e.g. 48kHz
/// audio against a 30000/1001 edit rate cycles `{1602,1601,1602,1601,1602}`
/// summing to 8008 samples over 5 edit units.
pub struct Track {
    pub kind: TrackKind,
    pub element_key: Key,
    pub sample_sequence: Vec<u32>,
    sequence_pos: usize,
    buffered: Vec<u8>,
    sample_size_bytes: Option<u32>,
}

impl Track {
    pub fn new(kind: TrackKind, element_key: Key, sample_sequence: Vec<u32>, sample_size_bytes: Option<u32>) -> Self {
        Self {
            kind,
            element_key,
            sample_sequence: if sample_sequence.is_empty() {
                vec![1]
            } else {
                sample_sequence
            },
            sequence_pos: 0,
            buffered: Vec::new(),
            sample_size_bytes,
        }
    }

    /// Append raw sample bytes for this track, e.g. `num_samples` audio
    /// samples or a single picture's compressed bytes.
    pub fn write_samples(&mut self, data: &[u8], _num_samples: u32) {
        self.buffered.extend_from_slice(data);
    }

    /// Number of samples this track must contribute to the current edit
    /// unit, per the sample-sequence cycle.
    fn samples_due(&self) -> u32 {
        self.sample_sequence[self.sequence_pos % self.sample_sequence.len()]
    }

    fn bytes_due(&self) -> Option<usize> {
        self.sample_size_bytes.map(|s| s as usize * self.samples_due() as usize)
    }

    fn has_complete_edit_unit(&self) -> bool {
        match self.bytes_due() {
            Some(needed) => self.buffered.len() >= needed,
            // Picture/system elements deliver one frame per write_samples
            // call; "complete" means at least one element is buffered.
            None => !self.buffered.is_empty(),
        }
    }

    fn take_edit_unit(&mut self) -> Vec<u8> {
        let taken = match self.bytes_due() {
            Some(needed) => self.buffered.drain(..needed).collect(),
            None => std::mem::take(&mut self.buffered),
        };
        self.sequence_pos += 1;
        taken
    }
}

/// Verifies a sample sequence tiles its edit rate exactly, i.e. the cycle's
/// sample count sums to an integer number of the source rate's samples per
/// edit-rate cycle length. Used to reject a misconfigured
/// `(sample_rate, edit_rate)` pair up front with `InvariantViolation`.
pub fn verify_sample_sequence_tiles(sample_rate: Rational, edit_rate: Rational, sequence: &[u32]) -> Result<()> {
    let total: u64 = sequence.iter().map(|&s| s as u64).sum();
    let cycle_len = sequence.len() as u64;
    // Over one cycle, `cycle_len` edit units must contain exactly
    // `sample_rate * cycle_len / edit_rate` samples.
    let lhs = total * edit_rate.denominator as u64 * sample_rate.numerator().unsigned_abs() as u64;
    let rhs = cycle_len
        * sample_rate.denominator().unsigned_abs() as u64
        * edit_rate.numerator.unsigned_abs() as u64;
    if lhs == rhs {
        Ok(())
    } else {
        Err(Error::InvariantViolation(
            "sample sequence did not tile the edit rate".into(),
        ))
    }
}

/// Compute the canonical sample-sequence cycle for `(sample_rate, edit_rate)`
/// using the Euclidean/Bresenham-style accumulator SMPTE 377-1 Annex describes.
pub fn compute_sample_sequence(sample_rate: Rational, edit_rate: Rational) -> Vec<u32> {
    let num = sample_rate.numerator().unsigned_abs() as u64 * edit_rate.denominator as u64;
    let den = sample_rate.denominator().unsigned_abs() as u64 * edit_rate.numerator as u64;
    if den == 0 {
        return vec![0];
    }
    let base = num / den;
    let remainder = num % den;
    if remainder == 0 {
        return vec![base as u32];
    }
    let cycle_len = den / gcd(den, remainder);
    let mut sequence = Vec::with_capacity(cycle_len as usize);
    let mut acc = 0u64;
    for _ in 0..cycle_len {
        acc += remainder;
        if acc >= den {
            acc -= den;
            sequence.push((base + 1) as u32);
        } else {
            sequence.push(base as u32);
        }
    }
    sequence
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Assembles one content package per call once every track has a complete
/// edit unit buffered, writing system, picture, sound, then data elements in
/// track-registration order.
pub struct ContentPackageAssembler {
    tracks: Vec<Track>,
}

impl ContentPackageAssembler {
    pub fn new() -> Self {
        Self { tracks: Vec::new() }
    }

    pub fn register_track(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    pub fn track_mut(&mut self, index: usize) -> &mut Track {
        &mut self.tracks[index]
    }

    fn all_tracks_ready(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.iter().all(|t| t.has_complete_edit_unit())
    }

    /// Write one content package if all tracks have a complete edit unit
    /// buffered; returns `false` if not enough data has accumulated yet.
    pub fn try_write_content_package(&mut self, f: &mut dyn MxfFile) -> Result<bool> {
        if !self.all_tracks_ready() {
            return Ok(false);
        }
        for kind in [TrackKind::System, TrackKind::Picture, TrackKind::Sound, TrackKind::Data] {
            for track in self.tracks.iter_mut().filter(|t| t.kind == kind) {
                let bytes = track.take_edit_unit();
                write_klv(f, &track.element_key, &bytes)?;
            }
        }
        Ok(true)
    }
}

impl Default for ContentPackageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

trait RationalExt {
    fn numerator(&self) -> i32;
    fn denominator(&self) -> i32;
}

impl RationalExt for Rational {
    fn numerator(&self) -> i32 {
        self.numerator
    }
    fn denominator(&self) -> i32 {
        self.denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(n: i32, d: i32) -> Rational {
        Rational {
            numerator: n,
            denominator: d,
        }
    }

    #[test]
    fn sample_sequence_48khz_against_2997_edit_rate() {
        let seq = compute_sample_sequence(rate(48000, 1), rate(30000, 1001));
        assert_eq!(seq.len(), 5);
        assert_eq!(seq.iter().sum::<u32>(), 8008);
    }

    #[test]
    fn sample_sequence_48khz_against_25fps_is_singleton() {
        let seq = compute_sample_sequence(rate(48000, 1), rate(25, 1));
        assert_eq!(seq, vec![1920]);
    }

    #[test]
    fn sample_sequence_48khz_against_24000_1001() {
        let seq = compute_sample_sequence(rate(48000, 1), rate(24000, 1001));
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.iter().sum::<u32>(), 4004);
    }

    #[test]
    fn verify_sequence_tiling_rejects_mismatched_edit_rate() {
        let seq = compute_sample_sequence(rate(48000, 1), rate(30000, 1001));
        assert!(verify_sample_sequence_tiles(rate(48000, 1), rate(30000, 1001), &seq).is_ok());
        assert!(verify_sample_sequence_tiles(rate(48000, 1), rate(25, 1), &seq).is_err());
    }

    #[test]
    fn content_package_waits_for_all_tracks() {
        let mut assembler = ContentPackageAssembler::new();
        let picture = assembler.register_track(Track::new(
            TrackKind::Picture,
            Key::new([1; 16]),
            vec![1],
            None,
        ));
        let sound = assembler.register_track(Track::new(
            TrackKind::Sound,
            Key::new([2; 16]),
            vec![1],
            Some(2),
        ));

        let mut f = bmx_io::MemoryFile::new();
        assembler.track_mut(picture).write_samples(&[0xaa, 0xbb], 1);
        assert!(!assembler.try_write_content_package(&mut f).unwrap());

        assembler.track_mut(sound).write_samples(&[0x01, 0x02], 1);
        assert!(assembler.try_write_content_package(&mut f).unwrap());
    }
}
