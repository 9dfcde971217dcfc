//! Last known values per `(channel, address)`.
//!
//! Owned by the worker. Received values go through [`AddressCache::update`],
//! which reports whether anything changed so unchanged values are not
//! forwarded to the application.

use std::collections::HashMap;
use std::hash::Hash;

use crate::traits::TriState;

/// Map of `(channel, address)` to the last known value.
#[derive(Debug, Clone)]
pub struct AddressCache<C, V = TriState> {
    values: HashMap<(C, u32), V>,
}

impl<C, V> AddressCache<C, V>
where
    C: Copy + Eq + Hash,
    V: Copy + PartialEq + Default,
{
    /// Creates an empty cache; every address reads as `V::default()`.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Last known value.
    pub fn get(&self, channel: C, address: u32) -> V {
        self.values
            .get(&(channel, address))
            .copied()
            .unwrap_or_default()
    }

    /// Store `value`. Returns true if it differs from the cached one.
    pub fn update(&mut self, channel: C, address: u32, value: V) -> bool {
        let slot = self.values.entry((channel, address)).or_default();
        if *slot == value {
            false
        } else {
            *slot = value;
            true
        }
    }

    /// Forget `address`.
    pub fn forget(&mut self, channel: C, address: u32) {
        self.values.remove(&(channel, address));
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Number of known addresses.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<C, V> Default for AddressCache<C, V>
where
    C: Copy + Eq + Hash,
    V: Copy + PartialEq + Default,
{
    fn default() -> Self {
        Self::new()
    }
}
