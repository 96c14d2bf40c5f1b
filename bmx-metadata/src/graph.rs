//! Arena-backed header metadata graph.
//!
//! Sets live in a `Vec<MetadataSet>`; a [`StrongRef`] is an owning arena
//! index, a [`WeakRef`] names a target by instanceUID and is resolved
//! through a `HashMap<Uuid, usize>` rebuilt whenever the arena's instanceUID
//! set changes. This stands in for the raw pointer back-references a
//! C++-style object graph would use, without per-reference heap nodes and
//! without risking a dangling pointer if a set is removed.

use std::collections::HashMap;

use tracing::{trace, warn};

use bmx_klv::{Key, Uuid};
use bmx_model::Value;

use crate::error::{Error, Result};

/// An owning reference to another set in the same graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrongRef(pub usize);

/// A non-owning reference to another set, resolved by instanceUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeakRef(pub Uuid);

/// One decoded item within a set: the raw value plus, for arrays, the
/// element count that was on the wire (kept even if `value` is a `Raw`
/// fallback, so a write pipeline that doesn't understand the type can still
/// round-trip the bytes).
#[derive(Debug, Clone)]
pub struct Item {
    pub key: Key,
    pub value: Value,
}

/// A set the registry has no [`bmx_model::SetDefinition`] for: an
/// unrecognized or vendor-private set key. Its item bytes are kept exactly
/// as read, rather than decoded, so a write pipeline re-emits them
/// unchanged instead of silently dropping them.
///
/// `tags` records the (local tag, item key) pairs actually used inside
/// `bytes`, resolved through the read-time primer. The write-time primer
/// must assign the same tags to the same keys or the re-emitted bytes
/// would reference the wrong items; [`Primer::force`](crate::primer::Primer::force)
/// exists for exactly this.
#[derive(Debug, Clone)]
pub struct RawSetBody {
    pub bytes: Vec<u8>,
    pub tags: Vec<(u16, Key)>,
}

/// A single metadata set: concrete representation used for every set kind.
/// "Which kind" is determined by `key`, dispatched through `bmx-model`'s
/// registry rather than through a subclass hierarchy.
#[derive(Debug, Clone)]
pub struct MetadataSet {
    pub key: Key,
    pub instance_uid: Uuid,
    items: HashMap<Key, Item>,
    /// Declared fixed-space allocation in bytes, if this set reserves
    /// padding for future rewrite (typically only the Preface/header sets).
    pub fixed_space: Option<u64>,
    /// Present for a set the registry didn't recognize at read time; see
    /// [`RawSetBody`]. `items` is always empty for such a set.
    pub raw: Option<RawSetBody>,
}

impl MetadataSet {
    pub fn new(key: Key, instance_uid: Uuid) -> Self {
        Self {
            key,
            instance_uid,
            items: HashMap::new(),
            fixed_space: None,
            raw: None,
        }
    }

    /// Construct a set whose body the registry couldn't interpret; `raw`'s
    /// bytes are carried through to write untouched.
    pub fn new_raw(key: Key, instance_uid: Uuid, raw: RawSetBody) -> Self {
        Self {
            key,
            instance_uid,
            items: HashMap::new(),
            fixed_space: None,
            raw: Some(raw),
        }
    }

    pub fn set_item(&mut self, item: Item) {
        self.items.insert(item.key, item);
    }

    pub fn item(&self, key: &Key) -> Option<&Item> {
        self.items.get(key)
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }
}

/// The full header metadata graph: an arena of sets plus a lazily rebuilt
/// instanceUID → index lookup for weak reference resolution.
#[derive(Debug, Default)]
pub struct Graph {
    sets: Vec<MetadataSet>,
    uid_index: HashMap<Uuid, usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a set, returning a [`StrongRef`] to it.
    pub fn insert(&mut self, set: MetadataSet) -> StrongRef {
        let idx = self.sets.len();
        self.uid_index.insert(set.instance_uid, idx);
        self.sets.push(set);
        StrongRef(idx)
    }

    pub fn get(&self, r: StrongRef) -> Result<&MetadataSet> {
        self.sets.get(r.0).ok_or(Error::InvalidSetIndex(r.0))
    }

    pub fn get_mut(&mut self, r: StrongRef) -> Result<&mut MetadataSet> {
        self.sets.get_mut(r.0).ok_or(Error::InvalidSetIndex(r.0))
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StrongRef, &MetadataSet)> {
        self.sets
            .iter()
            .enumerate()
            .map(|(i, s)| (StrongRef(i), s))
    }

    /// Force a rebuild of the instanceUID index; call after any bulk mutation
    /// that bypassed `insert` (none currently do, but this keeps the
    /// invariant explicit rather than implicit).
    pub fn rebuild_uid_index(&mut self) {
        self.uid_index = self
            .sets
            .iter()
            .enumerate()
            .map(|(i, s)| (s.instance_uid, i))
            .collect();
        trace!(sets = self.sets.len(), "rebuilt instanceUID index");
    }

    /// Resolve a weak reference. Returns `Ok(None)` for a dangling reference
    /// rather than an error — per the read pipeline's contract, dangling
    /// references are reported during validation, not treated as fatal.
    pub fn resolve(&self, r: WeakRef) -> Option<StrongRef> {
        self.uid_index.get(&r.0).map(|&i| StrongRef(i))
    }

    /// Collect every weak reference in the graph that does not resolve to a
    /// set present in this arena.
    pub fn dangling_references(&self) -> Vec<(StrongRef, Key, Uuid)> {
        let mut out = Vec::new();
        for (idx, set) in self.sets.iter().enumerate() {
            for item in set.items() {
                if let Value::WeakReference(uuid) = &item.value {
                    if !self.uid_index.contains_key(uuid) {
                        warn!(set = %set.key, item = %item.key, ?uuid, "dangling weak reference");
                        out.push((StrongRef(idx), item.key, *uuid));
                    }
                }
            }
        }
        out
    }

    /// Depth-first walk from `root`, visiting each strongly-referenced set
    /// exactly once. Returns an error if a cycle is detected (forbidden by
    /// the data model's strong-reference invariant).
    pub fn walk_strong<F: FnMut(StrongRef, &MetadataSet) -> Result<()>>(
        &self,
        root: StrongRef,
        mut visit: F,
    ) -> Result<()> {
        let mut visiting = vec![false; self.sets.len()];
        let mut visited = vec![false; self.sets.len()];
        self.walk_strong_inner(root, &mut visiting, &mut visited, &mut visit)
    }

    fn walk_strong_inner<F: FnMut(StrongRef, &MetadataSet) -> Result<()>>(
        &self,
        node: StrongRef,
        visiting: &mut [bool],
        visited: &mut [bool],
        visit: &mut F,
    ) -> Result<()> {
        if visited[node.0] {
            return Ok(());
        }
        if visiting[node.0] {
            let set = self.get(node)?;
            return Err(Error::StrongReferenceCycle(set.key));
        }
        visiting[node.0] = true;
        let set = self.get(node)?;
        visit(node, set)?;

        let children: Vec<StrongRef> = set
            .items()
            .flat_map(|item| strong_targets(&item.value))
            .filter_map(|uuid| self.resolve(WeakRef(uuid)))
            .collect();

        for child in children {
            self.walk_strong_inner(child, visiting, visited, visit)?;
        }
        visiting[node.0] = false;
        visited[node.0] = true;
        Ok(())
    }
}

/// InstanceUIDs of every strong reference an item value carries, including
/// array-of-strong-reference items (e.g. a Package's `Tracks` item).
fn strong_targets(value: &Value) -> Vec<Uuid> {
    match value {
        Value::StrongReference(uuid) => vec![*uuid],
        Value::Array(values) => values
            .iter()
            .filter_map(|v| match v {
                Value::StrongReference(uuid) => Some(*uuid),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(last: u8) -> Key {
        let mut b = [0u8; 16];
        b[0] = 0x06;
        b[15] = last;
        Key::new(b)
    }

    fn uuid(seed: u8) -> Uuid {
        Uuid([seed; 16])
    }

    #[test]
    fn insert_and_resolve_weak_reference() {
        let mut g = Graph::new();
        let child = g.insert(MetadataSet::new(key(2), uuid(2)));
        let mut root = MetadataSet::new(key(1), uuid(1));
        root.set_item(Item {
            key: key(9),
            value: Value::WeakReference(uuid(2)),
        });
        let root_ref = g.insert(root);

        let item = g.get(root_ref).unwrap().item(&key(9)).unwrap();
        if let Value::WeakReference(target) = item.value {
            assert_eq!(g.resolve(WeakRef(target)), Some(child));
        } else {
            panic!("expected weak reference");
        }
    }

    #[test]
    fn dangling_reference_is_reported_not_fatal() {
        let mut g = Graph::new();
        let mut root = MetadataSet::new(key(1), uuid(1));
        root.set_item(Item {
            key: key(9),
            value: Value::WeakReference(uuid(99)),
        });
        g.insert(root);

        let dangling = g.dangling_references();
        assert_eq!(dangling.len(), 1);
    }

    #[test]
    fn strong_reference_cycle_is_detected() {
        let mut g = Graph::new();
        let a = g.insert(MetadataSet::new(key(1), uuid(1)));
        let b = g.insert(MetadataSet::new(key(2), uuid(2)));

        g.get_mut(a)
            .unwrap()
            .set_item(Item {
                key: key(9),
                value: Value::StrongReference(uuid(2)),
            });
        g.get_mut(b)
            .unwrap()
            .set_item(Item {
                key: key(9),
                value: Value::StrongReference(uuid(1)),
            });

        let result = g.walk_strong(a, |_, _| Ok(()));
        assert!(result.is_err());
    }
}
