//! Execution contexts and the per-function state table.
//!
//! A context is an opaque key naming one independent simulation thread. The
//! table maps each key to a dense slot so batched execution can hand out
//! disjoint `&mut` borrows of several contexts at once.

use core::fmt;

use hashbrown::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque key identifying one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ContextId(pub u64);

impl ContextId {
    /// Stable id derived from a human-readable name (FNV-1a).
    pub fn named(name: &str) -> Self {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in name.as_bytes() {
            h ^= u64::from(*b);
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        Self(h)
    }
}

impl From<u64> for ContextId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:016x}", self.0)
    }
}

/// Whether a call is the one-off initialization pass or a live step.
///
/// Initializing calls compute a value but never touch stored state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ExecutionPhase {
    Initializing,
    #[default]
    Executing,
}

/// Dense per-context slots with an id index.
///
/// Removal swaps the last slot into the hole, so positions are only stable
/// between removals.
#[derive(Debug, Clone)]
pub struct ContextTable<S> {
    index: HashMap<ContextId, usize>,
    slots: Vec<(ContextId, S)>,
}

impl<S> Default for ContextTable<S> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
        }
    }
}

impl<S> ContextTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.index.contains_key(&id)
    }

    /// Dense slot position of `id`, if present.
    pub fn slot_of(&self, id: ContextId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn get(&self, id: ContextId) -> Option<&S> {
        let slot = *self.index.get(&id)?;
        Some(&self.slots[slot].1)
    }

    pub fn get_mut(&mut self, id: ContextId) -> Option<&mut S> {
        let slot = *self.index.get(&id)?;
        Some(&mut self.slots[slot].1)
    }

    /// Returns the slot for `id`, creating it with `make` on first access.
    pub fn get_or_insert_with(&mut self, id: ContextId, make: impl FnOnce() -> S) -> &mut S {
        let slot = match self.slot_of(id) {
            Some(slot) => slot,
            None => {
                self.slots.push((id, make()));
                let slot = self.slots.len() - 1;
                self.index.insert(id, slot);
                slot
            }
        };
        &mut self.slots[slot].1
    }

    pub fn insert(&mut self, id: ContextId, value: S) -> Option<S> {
        if let Some(existing) = self.get_mut(id) {
            return Some(core::mem::replace(existing, value));
        }
        self.get_or_insert_with(id, || value);
        None
    }

    pub fn remove(&mut self, id: ContextId) -> Option<S> {
        let slot = self.index.remove(&id)?;
        let (_, value) = self.slots.swap_remove(slot);
        if let Some((moved, _)) = self.slots.get(slot) {
            self.index.insert(*moved, slot);
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
    }

    /// Context ids in ascending order.
    pub fn ids(&self) -> Vec<ContextId> {
        let mut ids: Vec<ContextId> = self.slots.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContextId, &S)> {
        self.slots.iter().map(|(id, s)| (*id, s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ContextId, &mut S)> {
        self.slots.iter_mut().map(|(id, s)| (*id, s))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_ids_are_stable_and_distinct() {
        assert_eq!(ContextId::named("a"), ContextId::named("a"));
        assert_ne!(ContextId::named("a"), ContextId::named("b"));
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let mut t: ContextTable<u32> = ContextTable::new();
        t.get_or_insert_with(ContextId(1), || 10);
        t.get_or_insert_with(ContextId(2), || 20);
        t.get_or_insert_with(ContextId(3), || 30);
        assert_eq!(t.remove(ContextId(1)), Some(10));
        assert!(!t.contains(ContextId(1)));
        assert_eq!(t.get(ContextId(3)), Some(&30));
        assert_eq!(t.get(ContextId(2)), Some(&20));
        assert_eq!(t.len(), 2);
        assert_eq!(t.ids(), vec![ContextId(2), ContextId(3)]);
        assert_eq!(t.remove(ContextId(1)), None);
    }

    #[test]
    fn get_or_insert_keeps_existing_value() {
        let mut t: ContextTable<u32> = ContextTable::new();
        *t.get_or_insert_with(ContextId(5), || 1) += 1;
        assert_eq!(*t.get_or_insert_with(ContextId(5), || 100), 2);
        assert_eq!(t.insert(ContextId(5), 7), Some(2));
        assert_eq!(t.get(ContextId(5)), Some(&7));
    }
}
