//! The built-in SMPTE-registered baseline set/item catalogue.
//!
//! Only the sets and items the rest of the workspace actually constructs or
//! reads are registered here: the header-metadata spine (Preface through
//! StructuralComponent) and the identification items every set carries.
//! Application-specific extensions (Avid, AS-11, vendor private sets) are
//! added by callers via [`Registry::derive`](crate::registry::Registry::derive),
//! never by mutating this one.

use bmx_klv::Key;

use crate::error::Result;
use crate::registry::{ItemDefinition, Registry, SetDefinition};
use crate::types::PrimitiveType;

/// Build a `06.0e.2b.34` registered-UL skeleton differing only in the last
/// two bytes, the way the baseline catalogue's entries differ from each
/// other.
const fn ul(b12: u8, b13: u8) -> Key {
    Key::new([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, b12, b13, 0x00,
        0x00,
    ])
}

pub const INSTANCE_UID: Key = ul(0x01, 0x01);
pub const GENERATION_UID: Key = ul(0x01, 0x02);

pub const PREFACE: Key = ul(0x2f, 0x00);
pub const CONTENT_STORAGE: Key = ul(0x18, 0x00);
pub const MATERIAL_PACKAGE: Key = ul(0x36, 0x00);
pub const SOURCE_PACKAGE: Key = ul(0x37, 0x00);
pub const TRACK: Key = ul(0x3b, 0x00);
pub const SEQUENCE: Key = ul(0x0f, 0x00);
pub const STRUCTURAL_COMPONENT: Key = ul(0x02, 0x00);
pub const SOURCE_CLIP: Key = ul(0x11, 0x00);
pub const TIMECODE_COMPONENT: Key = ul(0x14, 0x00);
pub const DM_SEGMENT: Key = ul(0x41, 0x00);
pub const FILLER: Key = ul(0x09, 0x00);
pub const ESSENCE_DESCRIPTOR: Key = ul(0x27, 0x00);
pub const MULTIPLE_DESCRIPTOR: Key = ul(0x44, 0x00);

pub const PACKAGE_INSTANCE_UID: Key = ul(0x44, 0x01);
pub const PACKAGE_TRACKS: Key = ul(0x44, 0x06);
pub const TRACK_SEQUENCE: Key = ul(0x44, 0x0f);
pub const TRACK_EDIT_RATE: Key = ul(0x44, 0x0b);
pub const SEQUENCE_DURATION: Key = ul(0x44, 0x02);
pub const SEQUENCE_COMPONENTS: Key = ul(0x44, 0x03);

fn item(key: Key, name: &'static str, value_type: PrimitiveType, mandatory: bool) -> ItemDefinition {
    ItemDefinition {
        key,
        name,
        value_type,
        mandatory,
    }
}

fn set(key: Key, name: &'static str, parent: Option<Key>, items: Vec<Key>) -> SetDefinition {
    SetDefinition {
        key,
        name,
        parent,
        items,
    }
}

/// Construct the baseline registry. Called once; downstream crates derive
/// from the result rather than rebuilding it.
pub fn smpte_baseline() -> Result<Registry> {
    let mut reg = Registry::new();

    reg.register_item(item(INSTANCE_UID, "InstanceUID", PrimitiveType::Uuid, true))?;
    reg.register_item(item(
        GENERATION_UID,
        "GenerationUID",
        PrimitiveType::Uuid,
        false,
    ))?;
    reg.register_item(item(
        PACKAGE_INSTANCE_UID,
        "PackageUID",
        PrimitiveType::Umid,
        true,
    ))?;
    reg.register_item(item(
        PACKAGE_TRACKS,
        "Tracks",
        PrimitiveType::Array(Box::new(PrimitiveType::StrongReference)),
        false,
    ))?;
    reg.register_item(item(
        TRACK_SEQUENCE,
        "Sequence",
        PrimitiveType::StrongReference,
        true,
    ))?;
    reg.register_item(item(
        TRACK_EDIT_RATE,
        "EditRate",
        PrimitiveType::Rational,
        true,
    ))?;
    reg.register_item(item(
        SEQUENCE_DURATION,
        "Duration",
        PrimitiveType::Int64,
        true,
    ))?;
    reg.register_item(item(
        SEQUENCE_COMPONENTS,
        "StructuralComponents",
        PrimitiveType::Array(Box::new(PrimitiveType::StrongReference)),
        true,
    ))?;

    reg.register_set(set(PREFACE, "Preface", None, vec![INSTANCE_UID]))?;
    reg.register_set(set(
        CONTENT_STORAGE,
        "ContentStorage",
        None,
        vec![INSTANCE_UID],
    ))?;
    reg.register_set(set(
        MATERIAL_PACKAGE,
        "MaterialPackage",
        None,
        vec![INSTANCE_UID, PACKAGE_INSTANCE_UID, PACKAGE_TRACKS],
    ))?;
    reg.register_set(set(
        SOURCE_PACKAGE,
        "SourcePackage",
        Some(MATERIAL_PACKAGE),
        vec![INSTANCE_UID, PACKAGE_INSTANCE_UID, PACKAGE_TRACKS],
    ))?;
    reg.register_set(set(
        TRACK,
        "Track",
        None,
        vec![INSTANCE_UID, TRACK_SEQUENCE, TRACK_EDIT_RATE],
    ))?;
    reg.register_set(set(
        SEQUENCE,
        "Sequence",
        None,
        vec![INSTANCE_UID, SEQUENCE_DURATION, SEQUENCE_COMPONENTS],
    ))?;
    reg.register_set(set(
        STRUCTURAL_COMPONENT,
        "StructuralComponent",
        None,
        vec![INSTANCE_UID, SEQUENCE_DURATION],
    ))?;
    reg.register_set(set(
        SOURCE_CLIP,
        "SourceClip",
        Some(STRUCTURAL_COMPONENT),
        vec![],
    ))?;
    reg.register_set(set(
        TIMECODE_COMPONENT,
        "TimecodeComponent",
        Some(STRUCTURAL_COMPONENT),
        vec![],
    ))?;
    reg.register_set(set(DM_SEGMENT, "DMSegment", Some(STRUCTURAL_COMPONENT), vec![]))?;
    reg.register_set(set(FILLER, "Filler", Some(STRUCTURAL_COMPONENT), vec![]))?;
    reg.register_set(set(
        ESSENCE_DESCRIPTOR,
        "FileDescriptor",
        None,
        vec![INSTANCE_UID],
    ))?;
    reg.register_set(set(
        MULTIPLE_DESCRIPTOR,
        "MultipleDescriptor",
        Some(ESSENCE_DESCRIPTOR),
        vec![],
    ))?;

    Ok(reg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_builds_without_error() {
        let reg = smpte_baseline().unwrap();
        assert!(reg.set(&PREFACE).is_some());
        assert!(reg
            .is_subclass_of(&SOURCE_CLIP, &STRUCTURAL_COMPONENT)
            .unwrap());
    }
}
