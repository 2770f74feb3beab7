//! Instance dictionaries.
//!
//! An instance `__dict__` is either *split* or *combined*:
//!
//! - **Split**: the key array is a [`KeysObject`] shared with the instance's
//!   type and every sibling instance; only the values are private. Two split
//!   dicts with the same keys object have the same name→index mapping, so a
//!   cache guarded on the keys object can read a value by index.
//! - **Combined**: private keys. Every add or delete draws a fresh
//!   [`KeysId`], so a guard on `keys_of` never survives a key-set change.
//!
//! Keys objects are immutable; growth builds a new one with a new identity.

use cinder_core::{InternedString, Value};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Keys Identity
// =============================================================================

static NEXT_KEYS_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a dictionary's key set, as returned by `keys_of`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct KeysId(u64);

impl KeysId {
    /// Draw a fresh, never-reused identity.
    #[inline]
    pub fn fresh() -> Self {
        Self(NEXT_KEYS_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

// =============================================================================
// Keys Object
// =============================================================================

/// Shared, immutable key array of split dictionaries.
#[derive(Debug)]
pub struct KeysObject {
    id: KeysId,
    names: Vec<InternedString>,
    index: FxHashMap<InternedString, usize>,
}

impl KeysObject {
    /// Create an empty keys object.
    #[must_use]
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            id: KeysId::fresh(),
            names: Vec::new(),
            index: FxHashMap::default(),
        })
    }

    /// Build a new keys object with `name` appended.
    #[must_use]
    pub fn extended(&self, name: InternedString) -> Arc<Self> {
        let mut names = self.names.clone();
        let mut index = self.index.clone();
        index.insert(name.clone(), names.len());
        names.push(name);
        Arc::new(Self {
            id: KeysId::fresh(),
            names,
            index,
        })
    }

    /// Identity of this key array.
    #[inline]
    pub fn id(&self) -> KeysId {
        self.id
    }

    /// Position of `name`, if present.
    #[inline]
    pub fn index_of(&self, name: &InternedString) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Names in insertion order.
    #[inline]
    pub fn names(&self) -> &[InternedString] {
        &self.names
    }

    /// Number of keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check for no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// =============================================================================
// Instance Dict
// =============================================================================

/// An instance attribute dictionary.
#[derive(Debug, Clone)]
pub enum InstanceDict {
    /// Keys shared with the type; `values[i]` is `None` when this instance
    /// has no value for `keys.names()[i]`.
    Split {
        /// Shared key array.
        keys: Arc<KeysObject>,
        /// Per-instance values, parallel to `keys`.
        values: Vec<Option<Value>>,
    },
    /// Private keys.
    Combined {
        /// Name → value mapping.
        map: FxHashMap<InternedString, Value>,
        /// Identity of the current key set.
        keys_id: KeysId,
    },
}

impl InstanceDict {
    /// Create an empty split dict over `keys`.
    #[must_use]
    pub fn split(keys: Arc<KeysObject>) -> Self {
        let values = vec![None; keys.len()];
        Self::Split { keys, values }
    }

    /// Create a combined dict from pairs.
    #[must_use]
    pub fn combined<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (InternedString, Value)>,
    {
        Self::Combined {
            map: pairs.into_iter().collect(),
            keys_id: KeysId::fresh(),
        }
    }

    /// `keys_of(dict)`: stable while the key set is unchanged.
    #[inline]
    pub fn keys_id(&self) -> KeysId {
        match self {
            Self::Split { keys, .. } => keys.id(),
            Self::Combined { keys_id, .. } => *keys_id,
        }
    }

    /// Shared keys, for split dicts.
    #[inline]
    pub fn split_keys(&self) -> Option<&Arc<KeysObject>> {
        match self {
            Self::Split { keys, .. } => Some(keys),
            Self::Combined { .. } => None,
        }
    }

    /// Check for split storage.
    #[inline]
    pub fn is_split(&self) -> bool {
        matches!(self, Self::Split { .. })
    }

    /// Look up by name.
    pub fn get(&self, name: &InternedString) -> Option<Value> {
        match self {
            Self::Split { keys, values } => keys
                .index_of(name)
                .and_then(|i| values.get(i).cloned().flatten()),
            Self::Combined { map, .. } => map.get(name).cloned(),
        }
    }

    /// Read split storage by index. `None` for combined dicts.
    #[inline]
    pub fn get_split(&self, index: usize) -> Option<Value> {
        match self {
            Self::Split { values, .. } => values.get(index).cloned().flatten(),
            Self::Combined { .. } => None,
        }
    }

    /// Write split storage by index. Returns false if the dict is not split
    /// or the index is outside its keys.
    pub fn set_split(&mut self, index: usize, value: Value) -> bool {
        match self {
            Self::Split { keys, values } if index < keys.len() => {
                if values.len() < keys.len() {
                    values.resize(keys.len(), None);
                }
                values[index] = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Check whether `name` has a value.
    #[inline]
    pub fn contains(&self, name: &InternedString) -> bool {
        self.get(name).is_some()
    }

    /// Names that currently have values.
    pub fn names(&self) -> Vec<InternedString> {
        match self {
            Self::Split { keys, values } => keys
                .names()
                .iter()
                .zip(values.iter())
                .filter(|(_, v)| v.is_some())
                .map(|(n, _)| n.clone())
                .collect(),
            Self::Combined { map, .. } => map.keys().cloned().collect(),
        }
    }

    /// Number of names with values.
    pub fn len(&self) -> usize {
        match self {
            Self::Split { values, .. } => values.iter().filter(|v| v.is_some()).count(),
            Self::Combined { map, .. } => map.len(),
        }
    }

    /// Check for no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store into a combined dict, regenerating the key identity when the
    /// name is new. Returns false for split dicts, whose key growth is
    /// decided by the owning type.
    pub fn set_combined(&mut self, name: InternedString, value: Value) -> bool {
        match self {
            Self::Combined { map, keys_id } => {
                if map.insert(name, value).is_none() {
                    *keys_id = KeysId::fresh();
                }
                true
            }
            Self::Split { .. } => false,
        }
    }

    /// Append a value under grown keys. `new_keys` must be `keys` plus one
    /// name at the end.
    pub fn grow_split(&mut self, new_keys: Arc<KeysObject>, value: Value) -> bool {
        match self {
            Self::Split { keys, values } if new_keys.len() == keys.len() + 1 => {
                values.resize(keys.len(), None);
                values.push(Some(value));
                *keys = new_keys;
                true
            }
            _ => false,
        }
    }

    /// Convert to a combined dict holding the same values.
    pub fn make_combined(&mut self) {
        if let Self::Split { keys, values } = self {
            let map = keys
                .names()
                .iter()
                .zip(values.iter())
                .filter_map(|(n, v)| v.clone().map(|v| (n.clone(), v)))
                .collect();
            *self = Self::Combined {
                map,
                keys_id: KeysId::fresh(),
            };
        }
    }

    /// Remove `name`. A split dict keeps its keys and clears the value; a
    /// combined dict draws a fresh key identity.
    pub fn remove(&mut self, name: &InternedString) -> Option<Value> {
        match self {
            Self::Split { keys, values } => {
                let i = keys.index_of(name)?;
                values.get_mut(i).and_then(Option::take)
            }
            Self::Combined { map, keys_id } => {
                let old = map.remove(name);
                if old.is_some() {
                    *keys_id = KeysId::fresh();
                }
                old
            }
        }
    }
}
