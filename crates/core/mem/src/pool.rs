//! Address Pool
//!
//! A range of page-sized virtual addresses with a bitmap of which pages are
//! in use, an [`EvictionTable`] of the resident ones and a logical clock that
//! the timer tick advances; the page with the oldest stamp is the eviction
//! victim. Physical frames live in a [`FramePool`]: a bitmap and nothing else,
//! so the amount of installed memory is not bounded by the table.

use log::trace;

use crate::bitmap::Bitmap;
use crate::error::{MemError, MemResult};
use crate::eviction::{EvictionEntry, EvictionTable};
use crate::layout::{PAGE_SHIFT, PAGE_SIZE_U32};
use crate::paging::{pte_address, table_present, EntryFlags, Mmu};

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub start_addr: u32,
    pub total_pages: usize,
    pub free_pages: usize,
    pub used_pages: usize,
    pub tracked_pages: usize,
    pub clock: u64,
}

pub struct AddressPool<'a> {
    resources: Bitmap<'a>,
    start: u32,
    table: EvictionTable,
    clock: u64,
}

impl<'a> AddressPool<'a> {
    /// Bind a pool of `page_count` pages starting at `start`
    ///
    /// All pages start free, the eviction table empty and the clock at 0.
    pub fn new(storage: &'a mut [u8], page_count: usize, start: u32) -> Self {
        AddressPool {
            resources: Bitmap::new(storage, page_count),
            start,
            table: EvictionTable::new(),
            clock: 0,
        }
    }

    #[inline]
    pub fn start_address(&self) -> u32 {
        self.start
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Does `addr` fall inside this pool's range?
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && (((addr - self.start) >> PAGE_SHIFT) as usize) < self.page_count()
    }

    /// Page index of `addr` within the pool
    pub fn page_index(&self, addr: u32) -> Option<usize> {
        if self.contains(addr) {
            Some(((addr - self.start) >> PAGE_SHIFT) as usize)
        } else {
            None
        }
    }

    #[inline]
    pub fn address_of(&self, page: usize) -> u32 {
        self.start + (page as u32) * PAGE_SIZE_U32
    }

    /// Is the page holding `addr` allocated?
    pub fn is_allocated(&self, addr: u32) -> bool {
        self.page_index(addr)
            .map_or(false, |page| self.resources.get(page))
    }

    pub fn allocated_pages(&self) -> usize {
        self.resources.used()
    }

    pub fn tracked_pages(&self) -> usize {
        self.table.len()
    }

    pub fn stats(&self) -> PoolStats {
        let used = self.allocated_pages();
        PoolStats {
            start_addr: self.start,
            total_pages: self.page_count(),
            free_pages: self.page_count() - used,
            used_pages: used,
            tracked_pages: self.tracked_pages(),
            clock: self.clock,
        }
    }

    /// Address of the lowest allocated page
    pub fn first_allocated(&self) -> Option<u32> {
        self.resources.first_used().map(|page| self.address_of(page))
    }

    /// Reserve `count` contiguous pages and track each one as resident
    ///
    /// The lowest fitting run wins. If the eviction table cannot take every
    /// page the reservation is rolled back and the pool is left unchanged.
    pub fn allocate(&mut self, count: usize) -> MemResult<u32> {
        let first = self.resources.allocate(count).ok_or(MemError::PoolExhausted)?;

        for page in first..first + count {
            if let Err(err) = self.table.insert(page, self.clock) {
                for tracked in first..page {
                    self.table.remove(tracked);
                }
                self.resources.release(first, count)?;
                return Err(err);
            }
        }

        Ok(self.address_of(first))
    }

    /// Reserve `count` contiguous pages without tracking any of them
    ///
    /// The pages are not resident yet; each is tracked once it gets a frame.
    pub fn reserve(&mut self, count: usize) -> MemResult<u32> {
        let first = self.resources.allocate(count).ok_or(MemError::PoolExhausted)?;
        Ok(self.address_of(first))
    }

    /// Return `count` pages starting at `addr`
    ///
    /// The whole range must be allocated; otherwise nothing changes.
    pub fn release(&mut self, addr: u32, count: usize) -> MemResult<()> {
        let first = self
            .page_index(addr)
            .ok_or(MemError::NotAllocated { address: addr })?;
        if !self.resources.is_range_used(first, count) {
            return Err(MemError::NotAllocated { address: addr });
        }

        for page in first..first + count {
            self.table.remove(page);
        }
        self.resources.release(first, count)
    }

    /// Start tracking the page at `addr` as resident, stamped with the current clock
    pub fn track(&mut self, addr: u32) -> MemResult<()> {
        let page = self
            .page_index(addr)
            .ok_or(MemError::NotAllocated { address: addr })?;
        if self.table.contains(page) {
            return Ok(());
        }
        self.table.insert(page, self.clock).map(|_| ())
    }

    /// Stop tracking the page at `addr`; false if it was not tracked
    pub fn untrack(&mut self, addr: u32) -> bool {
        match self.page_index(addr) {
            Some(page) => self.table.remove(page).is_some(),
            None => false,
        }
    }

    pub fn is_tracked(&self, addr: u32) -> bool {
        self.page_index(addr)
            .map_or(false, |page| self.table.contains(page))
    }

    /// Stamp of the tracked page at `addr`
    pub fn stamp_of(&self, addr: u32) -> Option<u64> {
        let page = self.page_index(addr)?;
        self.table.get(page).map(|entry| entry.stamp)
    }

    /// One clock tick
    ///
    /// Advances the clock, then every tracked page whose table entry shows
    /// ACCESSED takes the new clock value and has ACCESSED and DIRTY cleared.
    /// Pages whose page table is not present are skipped.
    pub fn sample_accessed<M: Mmu + ?Sized>(&mut self, mmu: &mut M) {
        self.clock += 1;
        let clock = self.clock;
        let start = self.start;

        for entry in self.table.iter_mut() {
            let vaddr = start + (entry.page as u32) * PAGE_SIZE_U32;
            if !table_present(&*mmu, vaddr) {
                continue;
            }

            let pte = pte_address(vaddr);
            let value = mmu.read_word(pte);
            if value & EntryFlags::ACCESSED.bits() == 0 {
                continue;
            }

            entry.stamp = clock;
            mmu.write_word(pte, value & !EntryFlags::USAGE.bits());
            trace!("page {:#x} seen at tick {}", vaddr, clock);
        }
    }

    /// Tracked page with the smallest stamp
    pub fn select_victim(&self) -> Option<u32> {
        self.table.oldest().map(|entry| self.address_of(entry.page))
    }

    /// Like [`select_victim`](Self::select_victim), considering only pages
    /// whose address passes `accept`
    pub fn select_victim_where<F>(&self, mut accept: F) -> Option<u32>
    where
        F: FnMut(u32) -> bool,
    {
        let start = self.start;
        self.table
            .oldest_matching(|entry: &EvictionEntry| accept(start + (entry.page as u32) * PAGE_SIZE_U32))
            .map(|entry| self.address_of(entry.page))
    }
}

/// Physical frames: allocation state only
pub struct FramePool<'a> {
    frames: Bitmap<'a>,
    start: u32,
}

impl<'a> FramePool<'a> {
    pub fn new(storage: &'a mut [u8], frame_count: usize, start: u32) -> Self {
        FramePool {
            frames: Bitmap::new(storage, frame_count),
            start,
        }
    }

    #[inline]
    pub fn start_address(&self) -> u32 {
        self.start
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn contains(&self, paddr: u32) -> bool {
        paddr >= self.start && (((paddr - self.start) >> PAGE_SHIFT) as usize) < self.frame_count()
    }

    /// `count` contiguous frames, lowest first
    pub fn allocate(&mut self, count: usize) -> MemResult<u32> {
        let first = self.frames.allocate(count).ok_or(MemError::PoolExhausted)?;
        Ok(self.start + (first as u32) * PAGE_SIZE_U32)
    }

    pub fn release(&mut self, paddr: u32, count: usize) -> MemResult<()> {
        if !self.contains(paddr) {
            return Err(MemError::NotAllocated { address: paddr });
        }
        let first = ((paddr - self.start) >> PAGE_SHIFT) as usize;
        self.frames
            .release(first, count)
            .map_err(|_| MemError::NotAllocated { address: paddr })
    }

    pub fn stats(&self) -> PoolStats {
        let used = self.frames.used();
        PoolStats {
            start_addr: self.start,
            total_pages: self.frame_count(),
            free_pages: self.frame_count() - used,
            used_pages: used,
            tracked_pages: 0,
            clock: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::MAX_PAGES;

    const BASE: u32 = 0x0040_0000;

    #[test]
    fn test_first_fit_scenario() {
        let mut storage = [0u8; 1];
        let mut pool = AddressPool::new(&mut storage, 8, BASE);

        assert_eq!(pool.allocate(3), Ok(BASE));
        assert_eq!(pool.allocate(3), Ok(BASE + 3 * PAGE_SIZE_U32));
        pool.release(BASE, 3).unwrap();
        assert_eq!(pool.allocate(2), Ok(BASE));

        assert!(pool.is_allocated(BASE + PAGE_SIZE_U32));
        assert!(!pool.is_allocated(BASE + 2 * PAGE_SIZE_U32));
        assert_eq!(pool.tracked_pages(), 5);
    }

    #[test]
    fn test_exhausted_pool_is_unchanged() {
        let mut storage = [0u8; 1];
        let mut pool = AddressPool::new(&mut storage, 4, BASE);
        pool.allocate(3).unwrap();

        assert_eq!(pool.allocate(2), Err(MemError::PoolExhausted));
        assert_eq!(pool.allocated_pages(), 3);
        assert_eq!(pool.tracked_pages(), 3);
    }

    #[test]
    fn test_tracking_limit_rolls_back() {
        let mut storage = [0u8; 32];
        let mut pool = AddressPool::new(&mut storage, 256, BASE);

        assert_eq!(pool.allocate(MAX_PAGES), Ok(BASE));
        assert_eq!(pool.allocate(1), Err(MemError::TrackingExhausted));
        assert_eq!(pool.allocated_pages(), MAX_PAGES);
        assert_eq!(pool.tracked_pages(), MAX_PAGES);

        // Freeing one makes room again
        pool.release(BASE, 1).unwrap();
        assert_eq!(pool.allocate(1), Ok(BASE));
    }

    #[test]
    fn test_release_validates_whole_range() {
        let mut storage = [0u8; 1];
        let mut pool = AddressPool::new(&mut storage, 8, BASE);
        pool.allocate(2).unwrap();

        assert_eq!(
            pool.release(BASE, 3),
            Err(MemError::NotAllocated { address: BASE })
        );
        assert_eq!(
            pool.release(BASE - PAGE_SIZE_U32, 1),
            Err(MemError::NotAllocated { address: BASE - PAGE_SIZE_U32 })
        );
        assert_eq!(pool.allocated_pages(), 2);
        assert_eq!(pool.tracked_pages(), 2);
    }

    #[test]
    fn test_release_round_trip_restores_state() {
        let mut storage = [0u8; 2];
        let mut pool = AddressPool::new(&mut storage, 16, BASE);
        pool.allocate(4).unwrap();

        let addr = pool.allocate(5).unwrap();
        pool.release(addr, 5).unwrap();

        assert_eq!(pool.allocated_pages(), 4);
        assert_eq!(pool.tracked_pages(), 4);
        assert_eq!(pool.allocate(5), Ok(addr));
    }

    #[test]
    fn test_untracked_page_is_never_a_victim() {
        let mut storage = [0u8; 1];
        let mut pool = AddressPool::new(&mut storage, 8, BASE);
        pool.allocate(2).unwrap();

        assert!(pool.untrack(BASE));
        assert!(!pool.untrack(BASE));
        assert_eq!(pool.select_victim(), Some(BASE + PAGE_SIZE_U32));

        pool.track(BASE).unwrap();
        assert!(pool.is_tracked(BASE));
        assert_eq!(pool.stamp_of(BASE), Some(0));
    }

    #[test]
    fn test_victim_filter() {
        let mut storage = [0u8; 1];
        let mut pool = AddressPool::new(&mut storage, 8, BASE);
        pool.allocate(3).unwrap();

        assert_eq!(pool.select_victim_where(|addr| addr != BASE), Some(BASE + PAGE_SIZE_U32));
        assert_eq!(pool.select_victim_where(|_| false), None);
    }

    #[test]
    fn test_contains_bounds() {
        let mut storage = [0u8; 1];
        let pool = AddressPool::new(&mut storage, 8, BASE);
        assert!(pool.contains(BASE));
        assert!(pool.contains(BASE + 8 * PAGE_SIZE_U32 - 1));
        assert!(!pool.contains(BASE + 8 * PAGE_SIZE_U32));
        assert!(!pool.contains(BASE - 1));
        assert_eq!(pool.first_allocated(), None);
    }

    #[test]
    fn test_stats() {
        let mut storage = [0u8; 2];
        let mut pool = AddressPool::new(&mut storage, 10, BASE);
        pool.allocate(4).unwrap();
        pool.untrack(BASE);

        let stats = pool.stats();
        assert_eq!(stats.total_pages, 10);
        assert_eq!(stats.used_pages, 4);
        assert_eq!(stats.free_pages, 6);
        assert_eq!(stats.tracked_pages, 3);
        assert_eq!(stats.start_addr, BASE);
    }

    #[test]
    fn test_reserve_leaves_pages_untracked() {
        let mut storage = [0u8; 1];
        let mut pool = AddressPool::new(&mut storage, 8, BASE);

        assert_eq!(pool.reserve(2), Ok(BASE));
        assert!(pool.is_allocated(BASE + PAGE_SIZE_U32));
        assert_eq!(pool.tracked_pages(), 0);
        assert_eq!(pool.select_victim(), None);

        pool.track(BASE).unwrap();
        assert_eq!(pool.select_victim(), Some(BASE));
        assert_eq!(pool.allocate(1), Ok(BASE + 2 * PAGE_SIZE_U32));
        assert_eq!(pool.tracked_pages(), 2);
    }

    #[test]
    fn test_frame_pool_is_not_bounded_by_tracking() {
        let frames = MAX_PAGES + 56;
        let mut storage = [0u8; 32];
        let mut pool = FramePool::new(&mut storage, frames, 0x0020_0000);

        for i in 0..frames {
            assert_eq!(pool.allocate(1), Ok(0x0020_0000 + (i as u32) * PAGE_SIZE_U32));
        }
        assert_eq!(pool.allocate(1), Err(MemError::PoolExhausted));

        let stats = pool.stats();
        assert_eq!(stats.used_pages, frames);
        assert_eq!(stats.tracked_pages, 0);
    }

    #[test]
    fn test_frame_pool_release_checks_ownership() {
        let mut storage = [0u8; 1];
        let mut pool = FramePool::new(&mut storage, 4, 0x0030_0000);
        let frame = pool.allocate(2).unwrap();

        assert_eq!(pool.release(0x0010_0000, 1), Err(MemError::NotAllocated { address: 0x0010_0000 }));
        assert_eq!(
            pool.release(frame + PAGE_SIZE_U32, 2),
            Err(MemError::NotAllocated { address: frame + PAGE_SIZE_U32 })
        );
        pool.release(frame, 2).unwrap();
        assert_eq!(pool.stats().free_pages, 4);
    }
}
