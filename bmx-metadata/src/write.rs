//! Header metadata write pipeline.
//!
//! 1. Walk the graph depth-first from the Preface, assigning local tags for
//!    every item key encountered.
//! 2. Emit the primer pack.
//! 3. Emit each set as a KLV triple, items pre-measured so the set's total
//!    length is known up front.
//! 4. A set with a declared fixed-space allocation is padded with a trailing
//!    fill item so its on-disk footprint matches that reservation exactly —
//!    used to reserve rewrite room in the header for a single-pass writer
//!    that doesn't know the final duration yet.

use tracing::trace;

use bmx_io::MxfFile;
use bmx_klv::{write_klv, KEY_LEN};

use crate::codec;
use crate::error::{Error, Result};
use crate::graph::{Graph, StrongRef};
use crate::primer::Primer;

/// Assign local tags for every item key reachable by strong reference from
/// `root`, without writing anything.
///
/// Raw (unrecognized-at-read-time) sets are visited first so their
/// originally-read tag assignments are forced in before any decoded item
/// gets a freshly allocated one; see
/// [`Primer::force`](crate::primer::Primer::force).
pub fn build_primer(graph: &Graph, root: StrongRef) -> Result<Primer> {
    let mut primer = Primer::new();
    graph.walk_strong(root, |_, set| {
        if let Some(raw) = &set.raw {
            for &(tag, key) in &raw.tags {
                primer.force(tag, key);
            }
        }
        Ok(())
    })?;
    graph.walk_strong(root, |_, set| {
        for item in set.items() {
            primer.allocate(item.key);
        }
        Ok(())
    })?;
    Ok(primer)
}

fn encode_set_items(set: &crate::graph::MetadataSet, primer: &Primer) -> Result<Vec<u8>> {
    if let Some(raw) = &set.raw {
        return Ok(raw.bytes.clone());
    }
    let mut out = Vec::new();
    for item in set.items() {
        let tag = primer.tag_for_key(&item.key)?;
        let value = codec::encode(&item.value);
        if value.len() > u16::MAX as usize {
            // Items this large are vanishingly rare in header metadata; the
            // item-TL format this pipeline writes is 16-bit.
            return Err(Error::FixedSpaceOverflow(item.key, u16::MAX as u64, value.len() as u64));
        }
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(&value);
    }
    Ok(out)
}

/// Write the primer pack followed by every set reachable from `root`,
/// depth-first. `kag_size` is used only to pad fixed-space-allocated sets'
/// internal fill item to a sensible multiple; callers are responsible for
/// KAG-aligning the partition as a whole.
pub fn write_header_metadata(
    f: &mut dyn MxfFile,
    graph: &Graph,
    root: StrongRef,
    primer: &Primer,
) -> Result<()> {
    primer.encode(f)?;

    graph.walk_strong(root, |_, set| {
        let body = encode_set_items(set, primer)?;

        match set.fixed_space {
            None => {
                write_klv(f, &set.key, &body)?;
            }
            Some(reserved) => {
                let set_start = f.tell()?;
                write_klv(f, &set.key, &body)?;
                let written = f.tell()? - set_start;
                if written > reserved {
                    return Err(Error::FixedSpaceOverflow(set.key, reserved, written));
                }
                // Pad the set out to its reservation with a nested fill
                // item so later rewrites of this set never need to move
                // whatever follows it.
                let pad_needed = reserved - written;
                if pad_needed > 0 {
                    write_padding_item(f, pad_needed)?;
                }
            }
        }
        trace!(key = %set.key, "wrote set");
        Ok(())
    })
}

/// Write a fill item whose total KLV size is exactly `target_size` bytes,
/// used to round a fixed-space-allocated set out to its reservation.
fn write_padding_item(f: &mut dyn MxfFile, target_size: u64) -> Result<()> {
    if target_size < KEY_LEN as u64 + 1 {
        return Err(Error::FixedSpaceOverflow(
            bmx_klv::FILL_KEY,
            target_size,
            KEY_LEN as u64 + 1,
        ));
    }
    // write_fill_to_kag pads to the next KAG boundary; here we want an exact
    // byte count, so fabricate a "KAG" equal to the padded stream's eventual
    // length by writing a value whose encoded length makes up the remainder.
    let pos = f.tell()?;
    let value_len = solve_value_len(target_size);
    write_klv(f, &bmx_klv::FILL_KEY, &vec![0u8; value_len as usize])?;
    debug_assert_eq!(f.tell()? - pos, target_size);
    Ok(())
}

fn solve_value_len(target_total: u64) -> u64 {
    let mut v = target_total.saturating_sub(KEY_LEN as u64 + 1);
    loop {
        let total = KEY_LEN as u64 + bmx_klv::ber_length_size(v) as u64 + v;
        if total == target_total {
            return v;
        }
        if total < target_total {
            v += target_total - total;
        } else {
            v -= total - target_total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Item, MetadataSet};
    use bmx_io::MemoryFile;
    use bmx_klv::{Key, Uuid};
    use bmx_model::Value;
    use pretty_assertions::assert_eq;
    use std::io::SeekFrom;

    fn key(last: u8) -> Key {
        let mut b = [0u8; 16];
        b[15] = last;
        Key::new(b)
    }

    #[test]
    fn write_then_read_single_set() {
        let mut graph = Graph::new();
        let mut set = MetadataSet::new(key(1), Uuid([1; 16]));
        set.set_item(Item {
            key: key(2),
            value: Value::UInt32(42),
        });
        let root = graph.insert(set);

        let primer = build_primer(&graph, root).unwrap();
        let mut f = MemoryFile::new();
        write_header_metadata(&mut f, &graph, root, &primer).unwrap();

        f.seek(SeekFrom::Start(0)).unwrap();
        let decoded_primer = Primer::decode(&mut f).unwrap();
        assert_eq!(
            decoded_primer.tag_for_key(&key(2)).unwrap(),
            primer.tag_for_key(&key(2)).unwrap()
        );
    }

    #[test]
    fn write_then_read_primer_entries_round_trip_for_a_multi_item_set() {
        let mut graph = Graph::new();
        let mut set = MetadataSet::new(key(1), Uuid([1; 16]));
        set.set_item(Item { key: key(2), value: Value::UInt32(42) });
        set.set_item(Item { key: key(3), value: Value::String("hello".into()) });
        set.set_item(Item { key: key(4), value: Value::Raw(vec![1, 2, 3, 4]) });
        let root = graph.insert(set);

        let primer = build_primer(&graph, root).unwrap();
        let mut f = MemoryFile::new();
        write_header_metadata(&mut f, &graph, root, &primer).unwrap();

        f.seek(SeekFrom::Start(0)).unwrap();
        let decoded_primer = Primer::decode(&mut f).unwrap();

        let mut expected: Vec<(u16, Key)> = primer.entries().collect();
        let mut actual: Vec<(u16, Key)> = decoded_primer.entries().collect();
        expected.sort_by_key(|(tag, _)| *tag);
        actual.sort_by_key(|(tag, _)| *tag);
        assert_eq!(expected, actual);
    }

    #[test]
    fn fixed_space_set_pads_to_exact_reservation() {
        let mut graph = Graph::new();
        let mut set = MetadataSet::new(key(1), Uuid([1; 16]));
        set.set_item(Item {
            key: key(2),
            value: Value::UInt32(42),
        });
        set.fixed_space = Some(256);
        let root = graph.insert(set);

        let primer = build_primer(&graph, root).unwrap();
        let mut f = MemoryFile::new();
        write_header_metadata(&mut f, &graph, root, &primer).unwrap();

        let primer_size = {
            let mut tmp = MemoryFile::new();
            primer.encode(&mut tmp).unwrap();
            tmp.size().unwrap()
        };
        assert_eq!(f.size().unwrap(), primer_size + 256);
    }
}
