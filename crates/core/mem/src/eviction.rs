//! Fixed-capacity table of resident pages with last-seen timestamps
//!
//! Each pool owns one. The clock sampler refreshes stamps of recently used
//! pages; the victim is the entry with the smallest stamp.

use crate::error::{MemError, MemResult};
use crate::layout::MAX_PAGES;

/// One tracked page: its index within the pool and when it was last seen used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionEntry {
    pub page: usize,
    pub stamp: u64,
}

pub struct EvictionTable {
    slots: [Option<EvictionEntry>; MAX_PAGES],
}

impl EvictionTable {
    pub const fn new() -> Self {
        EvictionTable {
            slots: [None; MAX_PAGES],
        }
    }

    pub fn clear(&mut self) {
        self.slots = [None; MAX_PAGES];
    }

    /// Record `page` in the first free slot
    pub fn insert(&mut self, page: usize, stamp: u64) -> MemResult<usize> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(MemError::TrackingExhausted)?;
        self.slots[slot] = Some(EvictionEntry { page, stamp });
        Ok(slot)
    }

    pub fn position(&self, page: usize) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(entry) if entry.page == page))
    }

    pub fn contains(&self, page: usize) -> bool {
        self.position(page).is_some()
    }

    pub fn get(&self, page: usize) -> Option<&EvictionEntry> {
        self.position(page).and_then(|slot| self.slots[slot].as_ref())
    }

    /// Drop the entry for `page`, returning it if it was tracked
    pub fn remove(&mut self, page: usize) -> Option<EvictionEntry> {
        let slot = self.position(page)?;
        self.slots[slot].take()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvictionEntry> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EvictionEntry> {
        self.slots.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Entry with the smallest stamp among those accepted by `accept`
    ///
    /// Ties go to the lowest table slot.
    pub fn oldest_matching<F>(&self, mut accept: F) -> Option<EvictionEntry>
    where
        F: FnMut(&EvictionEntry) -> bool,
    {
        let mut oldest: Option<EvictionEntry> = None;
        for entry in self.iter() {
            if !accept(entry) {
                continue;
            }
            match oldest {
                Some(current) if current.stamp <= entry.stamp => {}
                _ => oldest = Some(*entry),
            }
        }
        oldest
    }

    pub fn oldest(&self) -> Option<EvictionEntry> {
        self.oldest_matching(|_| true)
    }
}

impl Default for EvictionTable {
    fn default() -> Self {
        Self::new()
    }
}
