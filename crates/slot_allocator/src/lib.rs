//! Reference-counted slot tracking.
//!
//! A `SlotAllocator` maps keys to small dense indices in `[0, max_size)`.
//! Adding a tracked key bumps its reference count; the slot is only released
//! after a matching number of removals. Released slots are reused lowest
//! first so the high-water mark stays as small as possible.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SlotAllocatorError {
    #[error("slot allocator is at capacity ({max_size} slots)")]
    CapacityExhausted { max_size: usize },
    #[error("key is not tracked by the slot allocator")]
    UnknownKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRelease {
    Retained { slot: usize, reference_count: usize },
    Released { slot: usize },
}

#[derive(Debug, Clone, Copy)]
struct ActiveEntry {
    reference_count: usize,
    slot: usize,
}

#[derive(Debug)]
struct SlotTable<T> {
    active: HashMap<T, ActiveEntry>,
    active_as_nodes: Vec<Option<T>>,
    free_slots: BTreeSet<usize>,
}

impl<T> SlotTable<T>
where
    T: Clone + Eq + Hash,
{
    fn new() -> Self {
        Self {
            active: HashMap::new(),
            active_as_nodes: Vec::new(),
            free_slots: BTreeSet::new(),
        }
    }

    fn next_free_slot(&self, max_size: usize) -> Option<usize> {
        if let Some(slot) = self.free_slots.first() {
            return Some(*slot);
        }
        if self.active_as_nodes.len() < max_size {
            return Some(self.active_as_nodes.len());
        }
        None
    }

    fn occupy(&mut self, slot: usize, key: T) {
        if slot == self.active_as_nodes.len() {
            self.active_as_nodes.push(Some(key));
            return;
        }
        let removed = self.free_slots.remove(&slot);
        assert!(removed, "occupied slot {slot} was not recorded as free");
        let previous = self.active_as_nodes[slot].replace(key);
        assert!(previous.is_none(), "slot {slot} was free but still held a key");
    }

    fn vacate(&mut self, slot: usize) {
        self.active_as_nodes[slot] = None;
        if slot + 1 != self.active_as_nodes.len() {
            self.free_slots.insert(slot);
            return;
        }
        self.active_as_nodes.pop();
        while matches!(self.active_as_nodes.last(), Some(None)) {
            let trailing = self.active_as_nodes.len() - 1;
            self.active_as_nodes.pop();
            self.free_slots.remove(&trailing);
        }
    }
}

#[derive(Debug)]
pub struct SlotAllocator<T> {
    max_size: usize,
    table: Mutex<SlotTable<T>>,
}

impl<T> SlotAllocator<T>
where
    T: Clone + Eq + Hash,
{
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            table: Mutex::new(SlotTable::new()),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn accepts(&self, key: &T) -> bool {
        let table = self.lock_table();
        table.active.contains_key(key) || table.next_free_slot(self.max_size).is_some()
    }

    pub fn add(&self, key: T) -> Result<usize, SlotAllocatorError> {
        let mut table = self.lock_table();
        if let Some(entry) = table.active.get_mut(&key) {
            entry.reference_count += 1;
            return Ok(entry.slot);
        }
        let slot = table
            .next_free_slot(self.max_size)
            .ok_or(SlotAllocatorError::CapacityExhausted {
                max_size: self.max_size,
            })?;
        table.occupy(slot, key.clone());
        table.active.insert(
            key,
            ActiveEntry {
                reference_count: 1,
                slot,
            },
        );
        Ok(slot)
    }

    pub fn remove(&self, key: &T) -> Result<SlotRelease, SlotAllocatorError> {
        let mut table = self.lock_table();
        let entry = table
            .active
            .get_mut(key)
            .ok_or(SlotAllocatorError::UnknownKey)?;
        entry.reference_count -= 1;
        if entry.reference_count > 0 {
            return Ok(SlotRelease::Retained {
                slot: entry.slot,
                reference_count: entry.reference_count,
            });
        }
        let slot = entry.slot;
        table.active.remove(key);
        table.vacate(slot);
        Ok(SlotRelease::Released { slot })
    }

    pub fn slot_of(&self, key: &T) -> Option<usize> {
        self.lock_table().active.get(key).map(|entry| entry.slot)
    }

    pub fn reference_count(&self, key: &T) -> usize {
        self.lock_table()
            .active
            .get(key)
            .map_or(0, |entry| entry.reference_count)
    }

    pub fn element_at(&self, slot: usize) -> Option<T> {
        self.lock_table()
            .active_as_nodes
            .get(slot)
            .and_then(|element| element.clone())
    }

    /// Highest occupied slot, or `None` when nothing is tracked.
    pub fn highest_slot_allocated(&self) -> Option<usize> {
        self.lock_table().active_as_nodes.len().checked_sub(1)
    }

    pub fn number_active(&self) -> usize {
        self.lock_table().active.len()
    }

    pub fn has_free_slots(&self) -> bool {
        self.lock_table().next_free_slot(self.max_size).is_some()
    }

    /// Dense copy of the slot table up to the high-water mark, taken under one lock.
    pub fn snapshot(&self) -> Vec<Option<T>> {
        self.lock_table().active_as_nodes.clone()
    }

    pub fn clear(&self) {
        *self.lock_table() = SlotTable::new();
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, SlotTable<T>> {
        self.table.lock().expect("slot allocator table lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_add_returns_same_slot_and_counts_references() {
        let allocator = SlotAllocator::new(4);
        assert_eq!(allocator.add("a"), Ok(0));
        assert_eq!(allocator.add("b"), Ok(1));
        assert_eq!(allocator.add("a"), Ok(0));
        assert_eq!(allocator.add("a"), Ok(0));
        assert_eq!(allocator.reference_count(&"a"), 3);
        assert_eq!(allocator.number_active(), 2);
    }

    #[test]
    fn slot_released_only_after_matching_removals() {
        let allocator = SlotAllocator::new(4);
        allocator.add(7u32).expect("add first reference");
        allocator.add(7u32).expect("add second reference");

        assert_eq!(
            allocator.remove(&7),
            Ok(SlotRelease::Retained {
                slot: 0,
                reference_count: 1
            })
        );
        assert_eq!(allocator.slot_of(&7), Some(0));
        assert_eq!(allocator.remove(&7), Ok(SlotRelease::Released { slot: 0 }));
        assert_eq!(allocator.slot_of(&7), None);
        assert_eq!(allocator.remove(&7), Err(SlotAllocatorError::UnknownKey));
    }

    #[test]
    fn full_allocator_reuses_freed_slot() {
        let allocator = SlotAllocator::new(8);
        for node in 1..=8u32 {
            let slot = allocator.add(node).expect("capacity available");
            assert_eq!(slot, (node - 1) as usize);
        }
        assert!(!allocator.accepts(&9));
        assert_eq!(
            allocator.add(9),
            Err(SlotAllocatorError::CapacityExhausted { max_size: 8 })
        );

        allocator.remove(&3).expect("node 3 is tracked");
        assert!(allocator.accepts(&9));
        assert_eq!(allocator.add(9), Ok(2));
        assert_eq!(allocator.element_at(2), Some(9));
        assert_eq!(allocator.highest_slot_allocated(), Some(7));
    }

    #[test]
    fn reuse_prefers_lowest_freed_slot() {
        let allocator = SlotAllocator::new(16);
        for node in 0..6u32 {
            allocator.add(node).expect("capacity available");
        }
        allocator.remove(&4).expect("tracked");
        allocator.remove(&1).expect("tracked");
        allocator.remove(&2).expect("tracked");

        assert_eq!(allocator.add(100), Ok(1));
        assert_eq!(allocator.add(101), Ok(2));
        assert_eq!(allocator.add(102), Ok(4));
        assert_eq!(allocator.add(103), Ok(6));
    }

    #[test]
    fn releasing_last_slot_truncates_trailing_holes() {
        let allocator = SlotAllocator::new(8);
        for node in 0..4u32 {
            allocator.add(node).expect("capacity available");
        }
        allocator.remove(&1).expect("tracked");
        allocator.remove(&2).expect("tracked");
        assert_eq!(allocator.highest_slot_allocated(), Some(3));

        allocator.remove(&3).expect("tracked");
        assert_eq!(allocator.highest_slot_allocated(), Some(0));
        assert_eq!(allocator.snapshot(), vec![Some(0)]);
        assert_eq!(allocator.add(50), Ok(1));

        allocator.remove(&0).expect("tracked");
        allocator.remove(&50).expect("tracked");
        assert_eq!(allocator.highest_slot_allocated(), None);
    }

    #[test]
    fn zero_capacity_allocator_accepts_nothing() {
        let allocator = SlotAllocator::<u8>::new(0);
        assert!(!allocator.accepts(&1));
        assert!(!allocator.has_free_slots());
        assert!(allocator.add(1).is_err());
    }

    #[test]
    fn clear_forgets_every_key() {
        let allocator = SlotAllocator::new(2);
        allocator.add('x').expect("capacity available");
        allocator.add('y').expect("capacity available");
        allocator.clear();
        assert_eq!(allocator.number_active(), 0);
        assert_eq!(allocator.slot_of(&'x'), None);
        assert_eq!(allocator.add('z'), Ok(0));
    }
}
