//! Writer and reader configuration.

/// KLV Alignment Grid size partitions and fill items are padded to.
pub const DEFAULT_KAG_SIZE: u32 = 0x200;

/// Default reserve for the header partition's fixed-space-allocated
/// metadata, used by a single-pass writer that doesn't know the final
/// duration up front.
pub const DEFAULT_HEADER_METADATA_RESERVE: u64 = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationalPattern {
    Op1a,
    OpAtom,
    Op1b,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlavourFlags {
    None,
    Avid,
    D10,
    Rdd9,
    As02,
    As10,
    As11,
    Imf,
}

/// Flags that modify header-metadata and essence-wrapping behavior for a
/// profile the core engine doesn't otherwise distinguish.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileFlags {
    /// Avid pads image data to an 8192-byte alignment.
    pub avid_image_alignment: bool,
    /// Avid uses alternative essence-container labels for some codecs.
    pub avid_alternative_ec_labels: bool,
    /// Avid's displayYOffset convention differs from the generalized one.
    pub avid_alternative_display_y_offset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FooterIndexPolicy {
    /// The footer repeats the header's index table segments in full.
    Repeat,
    /// The footer carries no index; readers rely on body-partition indexes.
    Omit,
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub operational_pattern: OperationalPattern,
    pub kag_size: u32,
    /// Edit units between body-partition boundaries; `None` disables
    /// periodic re-partitioning (OP-Atom style, one partition per track).
    pub partition_interval: Option<u64>,
    pub header_metadata_reserve: u64,
    pub footer_index_policy: FooterIndexPolicy,
    pub profile: ProfileFlags,
    /// Known up front via `set_input_duration`; `None` selects the
    /// two-pass reserve-and-rewrite path.
    pub input_duration: Option<i64>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            operational_pattern: OperationalPattern::Op1a,
            kag_size: DEFAULT_KAG_SIZE,
            partition_interval: None,
            header_metadata_reserve: DEFAULT_HEADER_METADATA_RESERVE,
            footer_index_policy: FooterIndexPolicy::Repeat,
            profile: ProfileFlags::default(),
            input_duration: None,
        }
    }
}

impl WriterConfig {
    /// Declare the final edit-unit count up front, selecting the
    /// single-pass write path (final durations in the header, footer just
    /// repeats them) instead of the reserve-and-rewrite path.
    pub fn set_input_duration(&mut self, duration: i64) {
        self.input_duration = Some(duration);
    }

    pub fn is_single_pass(&self) -> bool {
        self.input_duration.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrechargeBehaviour {
    /// Compute precharge from the index table's temporal offsets.
    Automatic,
    /// Use a fixed precharge regardless of what the index reports.
    Fixed(u32),
}

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub precharge: PrechargeBehaviour,
    /// Recognize SDTI-CP system items and attach per-frame timecode/CRC
    /// metadata while reading.
    pub recognize_frame_metadata: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            precharge: PrechargeBehaviour::Automatic,
            recognize_frame_metadata: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_pass_selected_once_duration_is_set() {
        let mut config = WriterConfig::default();
        assert!(!config.is_single_pass());
        config.set_input_duration(8008);
        assert!(config.is_single_pass());
    }
}
