//! Swap area
//!
//! A bitmap of page-sized slots on the swap disk. Slot `s` covers sectors
//! `base + 8s .. base + 8s + 7`. Transfers go one sector at a time through the
//! block device; a failed sector is logged and the transfer carries on, so a
//! swap operation never aborts halfway.

use log::error;
use pagekern_driver_traits::{BlockDevice, BlockDeviceExt};

use crate::bitmap::Bitmap;
use crate::error::{MemError, MemResult};
use crate::layout::{PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE};

pub struct SwapArea<'a> {
    slots: Bitmap<'a>,
    base_sector: u64,
}

impl<'a> SwapArea<'a> {
    pub fn new(storage: &'a mut [u8], slot_count: usize, base_sector: u64) -> Self {
        SwapArea {
            slots: Bitmap::new(storage, slot_count),
            base_sector,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn used_slots(&self) -> usize {
        self.slots.used()
    }

    pub fn free_slots(&self) -> usize {
        self.slot_count() - self.used_slots()
    }

    pub fn is_used(&self, slot: usize) -> bool {
        self.slots.get(slot)
    }

    /// Claim the lowest free slot
    pub fn allocate_slot(&mut self) -> MemResult<usize> {
        self.slots.allocate(1).ok_or(MemError::SwapExhausted)
    }

    pub fn release_slot(&mut self, slot: usize) -> MemResult<()> {
        self.slots.release(slot, 1)
    }

    /// First sector backing `slot`
    #[inline]
    pub fn first_sector(&self, slot: usize) -> u64 {
        self.base_sector + (slot * SECTORS_PER_PAGE) as u64
    }

    /// Write one page into `slot`
    ///
    /// Returns how many sectors failed; each failure has been logged.
    pub fn write_page<D: BlockDevice + ?Sized>(&self, disk: &mut D, slot: usize, page: &[u8]) -> usize {
        debug_assert!(page.len() >= PAGE_SIZE);
        let first = self.first_sector(slot);
        let mut failed = 0;

        for (i, sector) in page.chunks_exact(SECTOR_SIZE).take(SECTORS_PER_PAGE).enumerate() {
            let lba = first + i as u64;
            if let Err(err) = disk.write_sector(lba, sector) {
                error!("swap: write of sector {} (slot {}) failed: {}", lba, slot, err);
                failed += 1;
            }
        }
        failed
    }

    /// Read `slot` back into one page
    ///
    /// Returns how many sectors failed; each failure has been logged.
    pub fn read_page<D: BlockDevice + ?Sized>(&self, disk: &mut D, slot: usize, page: &mut [u8]) -> usize {
        debug_assert!(page.len() >= PAGE_SIZE);
        let first = self.first_sector(slot);
        let mut failed = 0;

        for (i, sector) in page.chunks_exact_mut(SECTOR_SIZE).take(SECTORS_PER_PAGE).enumerate() {
            let lba = first + i as u64;
            if let Err(err) = disk.read_sector(lba, sector) {
                error!("swap: read of sector {} (slot {}) failed: {}", lba, slot, err);
                failed += 1;
            }
        }
        failed
    }
}
