//! Header metadata read pipeline.
//!
//! 1. Decode the primer pack.
//! 2. For each subsequent KLV triple whose key the registry recognizes as a
//!    set, decode every item inside it via the primer and the registry's
//!    declared item type.
//! 3. A caller-supplied filter may mark a set to be skipped; its bytes are
//!    still consumed (so the stream position stays correct) but no
//!    `MetadataSet` is added to the graph.
//! 4. Dangling references are left in place and reported by
//!    [`Graph::dangling_references`](crate::graph::Graph::dangling_references)
//!    rather than failing the read.

use tracing::{debug, trace, warn};

use bmx_io::MxfFile;
use bmx_klv::{is_fill_key, read_kl, Key, Uuid};
use bmx_model::{PrimitiveType, Registry, Value};

use crate::codec;
use crate::error::Result;
use crate::graph::{Graph, Item, MetadataSet, RawSetBody};
use crate::primer::Primer;

/// Decision returned by a read filter for one encountered set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Keep,
    Skip,
}

/// Read a header metadata graph starting at the current file position,
/// which must be the primer pack's KL header. Reads until `key_matches_end`
/// returns true for a just-read set key (callers typically stop at the next
/// partition pack key) or EOF.
pub fn read_header_metadata<F>(
    f: &mut dyn MxfFile,
    registry: &Registry,
    mut should_stop: impl FnMut(&Key) -> bool,
    mut filter: F,
) -> Result<(Graph, Primer)>
where
    F: FnMut(&Key) -> FilterDecision,
{
    let primer = Primer::decode(f)?;
    let mut graph = Graph::new();

    loop {
        let size = f.size()?;
        if f.tell()? >= size {
            break;
        }
        let header = read_kl(f)?;
        if should_stop(&header.key) {
            // Caller is responsible for rewinding past this KL if it needs
            // to hand it to the next stage (e.g. index table decoding).
            break;
        }
        if is_fill_key(&header.key) {
            f.seek(std::io::SeekFrom::Current(header.value_length as i64))?;
            continue;
        }

        if filter(&header.key) == FilterDecision::Skip {
            f.seek(std::io::SeekFrom::Current(header.value_length as i64))?;
            continue;
        }

        if registry.set(&header.key).is_none() {
            let mut bytes = vec![0u8; header.value_length as usize];
            f.read_exact(&mut bytes)?;
            let (instance_uid, tags) = scan_raw_set(&bytes, &primer, registry);
            warn!(key = %header.key, %instance_uid, "preserving unrecognized set verbatim");
            graph.insert(MetadataSet::new_raw(header.key, instance_uid, RawSetBody { bytes, tags }));
            continue;
        }

        let set_end = f.tell()? + header.value_length;
        let mut instance_uid = Uuid([0u8; 16]);
        let mut items = Vec::new();

        while f.tell()? < set_end {
            let tag_bytes = {
                let mut b = [0u8; 2];
                f.read_exact(&mut b)?;
                u16::from_be_bytes(b)
            };
            let len_bytes = {
                let mut b = [0u8; 2];
                f.read_exact(&mut b)?;
                u16::from_be_bytes(b)
            };
            let mut value = vec![0u8; len_bytes as usize];
            f.read_exact(&mut value)?;

            let item_key = match primer.key_for_tag(tag_bytes) {
                Ok(k) => k,
                Err(_) => {
                    warn!(tag = tag_bytes, "item local tag missing from primer");
                    continue;
                }
            };

            let decoded = match registry.item(&item_key) {
                Some(def) => codec::decode(&def.value_type, &value),
                None => bmx_model::Value::Raw(value.clone()),
            };

            if is_instance_uid_item(&item_key, registry) {
                if let bmx_model::Value::Uuid(u) = &decoded {
                    instance_uid = *u;
                }
            }

            items.push(Item {
                key: item_key,
                value: decoded,
            });
        }

        let mut set = MetadataSet::new(header.key, instance_uid);
        for item in items {
            set.set_item(item);
        }
        trace!(key = %header.key, %instance_uid, "decoded set");
        graph.insert(set);
    }

    graph.rebuild_uid_index();
    debug!(sets = graph.len(), "finished reading header metadata");
    Ok((graph, primer))
}

fn is_instance_uid_item(key: &Key, registry: &Registry) -> bool {
    registry
        .item(key)
        .map(|def| def.name == "InstanceUID")
        .unwrap_or(false)
}

/// Walk an unrecognized set's raw item TLs, resolving each local tag to an
/// item key through the primer so the write pipeline can reproduce the same
/// tag assignments. Doesn't require the set itself to be registered — item
/// keys (and the primer that maps tags to them) are global, so this works
/// even for a vendor-private set that otherwise follows the standard
/// tag-length-value item layout.
fn scan_raw_set(bytes: &[u8], primer: &Primer, registry: &Registry) -> (Uuid, Vec<(u16, Key)>) {
    let mut instance_uid = Uuid([0u8; 16]);
    let mut tags = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= bytes.len() {
        let tag = u16::from_be_bytes([bytes[pos], bytes[pos + 1]]);
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        pos += 4;
        if pos + len > bytes.len() {
            warn!(tag, len, "raw set item TL runs past its set's end, stopping scan");
            break;
        }
        let value = &bytes[pos..pos + len];
        pos += len;

        let Ok(item_key) = primer.key_for_tag(tag) else {
            warn!(tag, "raw set item local tag missing from primer");
            continue;
        };
        tags.push((tag, item_key));

        if is_instance_uid_item(&item_key, registry) {
            if let Value::Uuid(u) = codec::decode(&PrimitiveType::Uuid, value) {
                instance_uid = u;
            }
        }
    }
    (instance_uid, tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::{build_primer, write_header_metadata};
    use bmx_io::MemoryFile;
    use bmx_model::baseline::{INSTANCE_UID, PREFACE};
    use bmx_model::smpte_baseline;
    use std::io::SeekFrom;

    fn vendor_key(b12: u8, b13: u8) -> Key {
        Key::new([
            0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, b12, b13, 0x00,
            0x00,
        ])
    }

    #[test]
    fn unrecognized_set_is_preserved_verbatim_and_round_trips_again() {
        let registry = smpte_baseline().unwrap();
        let vendor_set_key = vendor_key(0x7f, 0x01);
        let vendor_item_key = vendor_key(0x7f, 0x02);
        let link_key = vendor_key(0x7f, 0x03);

        let mut graph = Graph::new();
        let mut preface = MetadataSet::new(PREFACE, Uuid([1; 16]));
        preface.set_item(Item { key: INSTANCE_UID, value: Value::Uuid(Uuid([1; 16])) });
        preface.set_item(Item {
            key: link_key,
            value: Value::StrongReference(Uuid([2; 16])),
        });
        let root = graph.insert(preface);

        let mut vendor = MetadataSet::new(vendor_set_key, Uuid([2; 16]));
        vendor.set_item(Item { key: INSTANCE_UID, value: Value::Uuid(Uuid([2; 16])) });
        vendor.set_item(Item {
            key: vendor_item_key,
            value: Value::Raw(vec![0xde, 0xad, 0xbe, 0xef]),
        });
        graph.insert(vendor);

        let primer = build_primer(&graph, root).unwrap();
        let mut f = MemoryFile::new();
        write_header_metadata(&mut f, &graph, root, &primer).unwrap();

        f.seek(SeekFrom::Start(0)).unwrap();
        let (decoded_graph, _) =
            read_header_metadata(&mut f, &registry, |_| false, |_| FilterDecision::Keep).unwrap();

        let (_, vendor_decoded) = decoded_graph
            .iter()
            .find(|(_, s)| s.key == vendor_set_key)
            .expect("vendor set preserved");
        assert!(vendor_decoded.raw.is_some());
        assert_eq!(vendor_decoded.instance_uid, Uuid([2; 16]));

        let decoded_root = decoded_graph
            .iter()
            .find(|(_, s)| s.key == PREFACE)
            .map(|(r, _)| r)
            .unwrap();
        let primer2 = build_primer(&decoded_graph, decoded_root).unwrap();
        let mut f2 = MemoryFile::new();
        write_header_metadata(&mut f2, &decoded_graph, decoded_root, &primer2).unwrap();

        f2.seek(SeekFrom::Start(0)).unwrap();
        let (decoded_graph2, _) =
            read_header_metadata(&mut f2, &registry, |_| false, |_| FilterDecision::Keep).unwrap();
        let (_, vendor_decoded2) = decoded_graph2
            .iter()
            .find(|(_, s)| s.key == vendor_set_key)
            .expect("vendor set preserved across a second round trip");

        assert_eq!(
            vendor_decoded.raw.as_ref().unwrap().bytes,
            vendor_decoded2.raw.as_ref().unwrap().bytes
        );
    }
}
