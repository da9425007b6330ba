//! In-memory index structures.
//!
//! [`PkIndex`] is the durable primary map from record key to data-file byte
//! offset; the store serializes it as one blob through its codec at close.
//! [`SecondaryIndex`] holds session-lifetime derived-key indexes, rebuilt by
//! full scan after every open. Derived keys are codec-encoded to bytes at
//! registration and query time, so one registry can hold indexes over
//! different derived-key types while variant dispatch stays a closed tag.

use std::collections::hash_map::Entry;
use std::hash::Hash;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{LarderError, Result};

/// Primary key index: record key to byte offset in the data file.
///
/// Keys are unique; inserting a key that is already present fails rather
/// than overwriting. The whole structure serializes as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: serde::Serialize",
    deserialize = "K: serde::de::Deserialize<'de> + Eq + std::hash::Hash"
))]
pub struct PkIndex<K> {
    map: FxHashMap<K, u64>,
}

impl<K: Eq + Hash> PkIndex<K> {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            map: FxHashMap::default(),
        }
    }

    /// Records `key` at `offset`. Fails with `DuplicateKey` when the key is
    /// already present.
    pub fn insert(&mut self, key: K, offset: u64) -> Result<()> {
        match self.map.entry(key) {
            Entry::Occupied(_) => Err(LarderError::DuplicateKey(
                "primary key already present".into(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(offset);
                Ok(())
            }
        }
    }

    /// Drops `key`, returning its offset if it was present.
    pub fn remove(&mut self, key: &K) -> Option<u64> {
        self.map.remove(key)
    }

    /// Offset stored for `key`.
    pub fn get(&self, key: &K) -> Option<u64> {
        self.map.get(key).copied()
    }

    /// True when `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// All keys, in the index's own iteration order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.map.keys()
    }

    /// All stored offsets, in the index's own iteration order.
    pub fn offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.map.values().copied()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when the index holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K: Eq + Hash> Default for PkIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Derived-key extractor: record to codec-encoded key bytes.
pub(crate) type ExtractFn<D> = Box<dyn Fn(&D) -> Result<Vec<u8>>>;

/// Bucket storage for the two index variants. A closed set: query dispatch
/// happens on this tag, never on runtime type inspection.
enum IndexSlots<D> {
    Unique(FxHashMap<Vec<u8>, D>),
    Multi(FxHashMap<Vec<u8>, Vec<D>>),
}

/// Session-lifetime secondary index over a derived key.
///
/// Unique indexes map a derived key to exactly one record and reject
/// colliding adds; non-unique indexes keep an insertion-ordered bucket per
/// derived key. Never persisted.
pub struct SecondaryIndex<D> {
    extract: ExtractFn<D>,
    slots: IndexSlots<D>,
}

impl<D: Clone + PartialEq> SecondaryIndex<D> {
    pub(crate) fn new(extract: ExtractFn<D>, unique: bool) -> Self {
        let slots = if unique {
            IndexSlots::Unique(FxHashMap::default())
        } else {
            IndexSlots::Multi(FxHashMap::default())
        };
        Self { extract, slots }
    }

    /// True for the unique variant.
    pub fn is_unique(&self) -> bool {
        matches!(self.slots, IndexSlots::Unique(_))
    }

    /// Number of distinct derived keys currently indexed.
    pub fn len(&self) -> usize {
        match &self.slots {
            IndexSlots::Unique(map) => map.len(),
            IndexSlots::Multi(map) => map.len(),
        }
    }

    /// True when no derived keys are indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn add(&mut self, record: &D) -> Result<()> {
        let derived = (self.extract)(record)?;
        match &mut self.slots {
            IndexSlots::Unique(map) => match map.entry(derived) {
                Entry::Occupied(_) => Err(LarderError::DuplicateKey(
                    "derived key already present in unique index".into(),
                )),
                Entry::Vacant(slot) => {
                    slot.insert(record.clone());
                    Ok(())
                }
            },
            IndexSlots::Multi(map) => {
                map.entry(derived).or_default().push(record.clone());
                Ok(())
            }
        }
    }

    /// Unlinks `record`. In a non-unique bucket the first structurally
    /// equal entry goes; absence is not an error.
    pub(crate) fn remove(&mut self, record: &D) -> Result<()> {
        let derived = (self.extract)(record)?;
        match &mut self.slots {
            IndexSlots::Unique(map) => {
                map.remove(&derived);
            }
            IndexSlots::Multi(map) => {
                if let Some(bucket) = map.get_mut(&derived) {
                    if let Some(pos) = bucket.iter().position(|held| held == record) {
                        bucket.remove(pos);
                    }
                    if bucket.is_empty() {
                        map.remove(&derived);
                    }
                }
            }
        }
        Ok(())
    }

    /// Records stored under the encoded derived key. Unique: exactly one
    /// record, or `NotFound`. Non-unique: the possibly empty bucket.
    pub(crate) fn lookup(&self, derived: &[u8]) -> Result<Vec<D>> {
        match &self.slots {
            IndexSlots::Unique(map) => map
                .get(derived)
                .map(|record| vec![record.clone()])
                .ok_or_else(|| LarderError::NotFound("indexed value".into())),
            IndexSlots::Multi(map) => Ok(map.get(derived).cloned().unwrap_or_default()),
        }
    }
}
