//! Registry of set and item definitions keyed by Universal Label.
//!
//! A base registry ships the SMPTE-registered catalogue; callers derive a
//! clone and add application-specific extensions (Avid, AS-11, vendor private
//! sets) without mutating the shared base, the way `tact-parser`'s
//! configuration registration lets callers layer overrides onto a shared
//! default key/value set.

use std::collections::HashMap;

use tracing::trace;

use bmx_klv::Key;

use crate::error::{Error, Result};
use crate::types::PrimitiveType;

/// Definition of one item a set may carry.
#[derive(Debug, Clone)]
pub struct ItemDefinition {
    pub key: Key,
    pub name: &'static str,
    pub value_type: PrimitiveType,
    /// `true` if every instance of the owning set must carry this item.
    pub mandatory: bool,
}

/// Definition of a metadata set: its key, optional parent (for
/// `is-subclass-of` walks), and the items it is permitted to carry.
#[derive(Debug, Clone)]
pub struct SetDefinition {
    pub key: Key,
    pub name: &'static str,
    pub parent: Option<Key>,
    pub items: Vec<Key>,
}

/// A registry of set and item definitions. Cheaply cloneable (an `Arc` of
/// the maps would avoid the copy on `derive`; kept as owned maps here since
/// derived registries are built once at startup, not per file).
#[derive(Debug, Clone, Default)]
pub struct Registry {
    sets: HashMap<Key, SetDefinition>,
    items: HashMap<Key, ItemDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone this registry so the caller can add extensions without
    /// affecting the original (e.g. the shared base registry).
    pub fn derive(&self) -> Self {
        self.clone()
    }

    pub fn register_set(&mut self, def: SetDefinition) -> Result<()> {
        if self.sets.contains_key(&def.key) {
            return Err(Error::DuplicateSetDefinition(def.key));
        }
        trace!(key = %def.key, name = def.name, "registered set definition");
        self.sets.insert(def.key, def);
        Ok(())
    }

    pub fn register_item(&mut self, def: ItemDefinition) -> Result<()> {
        if self.items.contains_key(&def.key) {
            return Err(Error::DuplicateItemDefinition(def.key));
        }
        trace!(key = %def.key, name = def.name, "registered item definition");
        self.items.insert(def.key, def);
        Ok(())
    }

    pub fn set(&self, key: &Key) -> Option<&SetDefinition> {
        self.sets.get(key)
    }

    pub fn item(&self, key: &Key) -> Option<&ItemDefinition> {
        self.items.get(key)
    }

    pub fn require_set(&self, key: &Key) -> Result<&SetDefinition> {
        self.set(key).ok_or(Error::UnknownSet(*key))
    }

    pub fn require_item(&self, key: &Key) -> Result<&ItemDefinition> {
        self.item(key).ok_or(Error::UnknownItem(*key))
    }

    /// `true` if the set registered under `key` is `ancestor` or descends
    /// from it by walking `parent` links.
    pub fn is_subclass_of(&self, key: &Key, ancestor: &Key) -> Result<bool> {
        let mut current = *key;
        loop {
            if current == *ancestor {
                return Ok(true);
            }
            let def = self.require_set(&current)?;
            match def.parent {
                Some(parent) => {
                    if !self.sets.contains_key(&parent) {
                        return Err(Error::UnknownParent {
                            child: current,
                            parent,
                        });
                    }
                    current = parent;
                }
                None => return Ok(false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveType;

    fn key(last: u8) -> Key {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&[0x06, 0x0e, 0x2b, 0x34]);
        bytes[15] = last;
        Key::new(bytes)
    }

    #[test]
    fn derive_does_not_mutate_base() {
        let mut base = Registry::new();
        base.register_set(SetDefinition {
            key: key(1),
            name: "Preface",
            parent: None,
            items: vec![],
        })
        .unwrap();

        let mut derived = base.derive();
        derived
            .register_set(SetDefinition {
                key: key(2),
                name: "VendorPrivateSet",
                parent: Some(key(1)),
                items: vec![],
            })
            .unwrap();

        assert!(base.set(&key(2)).is_none());
        assert!(derived.set(&key(2)).is_some());
    }

    #[test]
    fn is_subclass_of_walks_parent_chain() {
        let mut reg = Registry::new();
        reg.register_set(SetDefinition {
            key: key(1),
            name: "StructuralComponent",
            parent: None,
            items: vec![],
        })
        .unwrap();
        reg.register_set(SetDefinition {
            key: key(2),
            name: "SourceClip",
            parent: Some(key(1)),
            items: vec![],
        })
        .unwrap();

        assert!(reg.is_subclass_of(&key(2), &key(1)).unwrap());
        assert!(!reg.is_subclass_of(&key(1), &key(2)).unwrap());
    }

    #[test]
    fn duplicate_registration_errors() {
        let mut reg = Registry::new();
        reg.register_item(ItemDefinition {
            key: key(1),
            name: "InstanceUID",
            value_type: PrimitiveType::Uuid,
            mandatory: true,
        })
        .unwrap();
        let err = reg.register_item(ItemDefinition {
            key: key(1),
            name: "InstanceUID",
            value_type: PrimitiveType::Uuid,
            mandatory: true,
        });
        assert!(err.is_err());
    }
}
