//! x86 Two-Level Paging
//!
//! Provides the page directory / page table view used by the memory manager:
//! - 1024-entry directory, 1024-entry tables, 4KB pages
//! - Directory slot 1023 maps the directory onto itself, so every table is
//!   reachable at `0xFFC00000 + dir_index * 4096` and the directory at
//!   `0xFFFFF000`
//! - A non-present entry with `SWAPPED` set carries a swap slot number
//!
//! Memory access goes through the [`Mmu`] trait so the same code runs on
//! real hardware ([`SelfMappedMmu`]) and in host tests (`sim::SimulatedMachine`).

use bitflags::bitflags;

use crate::layout::{PAGE_SHIFT, PAGE_SIZE, SELF_MAP_DIRECTORY, SELF_MAP_TABLES};

bitflags! {
    /// Page directory / page table entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        /// Page is present in memory
        const PRESENT = 1 << 0;
        /// Page is writable
        const WRITABLE = 1 << 1;
        /// Page is accessible from user mode (Ring 3)
        const USER = 1 << 2;
        /// Write-through caching
        const WRITE_THROUGH = 1 << 3;
        /// Disable caching
        const NO_CACHE = 1 << 4;
        /// Page has been accessed
        const ACCESSED = 1 << 5;
        /// Page has been written to
        const DIRTY = 1 << 6;
        /// 4MB page (directory entries only)
        const HUGE_PAGE = 1 << 7;
        /// Page is global (not flushed on CR3 switch)
        const GLOBAL = 1 << 8;
        /// Not present, contents live in the swap slot in bits 12..32
        const SWAPPED = 1 << 9;
    }
}

impl EntryFlags {
    /// Flags written for every directory and table entry we create
    pub const MAPPED: EntryFlags = EntryFlags::PRESENT
        .union(EntryFlags::WRITABLE)
        .union(EntryFlags::USER);

    /// Bits the clock sampler clears after observing a page
    pub const USAGE: EntryFlags = EntryFlags::ACCESSED.union(EntryFlags::DIRTY);
}

/// Mask for extracting the frame address from an entry
pub const ADDR_MASK: u32 = 0xFFFF_F000;

/// Entries per directory or table
pub const ENTRY_COUNT: usize = 1024;

/// What a page table entry says about its page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// No frame and no swap slot
    Unmapped,
    /// Backed by physical frame `frame`
    Resident { frame: u32 },
    /// Contents stored in swap slot `slot`
    SwappedOut { slot: usize },
}

impl PageState {
    pub fn decode(entry: u32) -> Self {
        let flags = EntryFlags::from_bits_truncate(entry);
        if flags.contains(EntryFlags::PRESENT) {
            PageState::Resident { frame: entry & ADDR_MASK }
        } else if flags.contains(EntryFlags::SWAPPED) {
            PageState::SwappedOut { slot: (entry >> PAGE_SHIFT) as usize }
        } else {
            PageState::Unmapped
        }
    }

    pub fn encode(self) -> u32 {
        match self {
            PageState::Unmapped => 0,
            PageState::Resident { frame } => (frame & ADDR_MASK) | EntryFlags::MAPPED.bits(),
            PageState::SwappedOut { slot } => {
                ((slot as u32) << PAGE_SHIFT) | EntryFlags::SWAPPED.bits()
            }
        }
    }
}

// =============================================================================
// Self-map translation
// =============================================================================

#[inline]
pub const fn directory_index(vaddr: u32) -> u32 {
    vaddr >> 22
}

#[inline]
pub const fn table_index(vaddr: u32) -> u32 {
    (vaddr >> PAGE_SHIFT) & 0x3FF
}

/// Virtual address of the directory entry covering `vaddr`
#[inline]
pub const fn pde_address(vaddr: u32) -> u32 {
    SELF_MAP_DIRECTORY + directory_index(vaddr) * 4
}

/// Virtual address of the table entry covering `vaddr`
#[inline]
pub const fn pte_address(vaddr: u32) -> u32 {
    SELF_MAP_TABLES + ((vaddr & 0xFFC0_0000) >> 10) + ((vaddr & 0x003F_F000) >> 12) * 4
}

// =============================================================================
// MMU access
// =============================================================================

/// Word and page access to the currently active address space
///
/// Addresses are virtual. Entry reads and writes go through the self-map
/// windows computed by [`pde_address`] and [`pte_address`].
pub trait Mmu {
    /// Read a 32-bit word
    fn read_word(&self, addr: u32) -> u32;

    /// Write a 32-bit word
    fn write_word(&mut self, addr: u32, value: u32);

    /// The 4KB page starting at `page`
    fn page_mut(&mut self, page: u32) -> &mut [u8];

    /// Drop any cached translation for `addr`
    fn invalidate(&mut self, addr: u32);
}

/// Is the directory entry covering `vaddr` present?
pub fn table_present<M: Mmu + ?Sized>(mmu: &M, vaddr: u32) -> bool {
    EntryFlags::from_bits_truncate(mmu.read_word(pde_address(vaddr))).contains(EntryFlags::PRESENT)
}

/// Decode the table entry for `vaddr`, treating a missing table as unmapped
pub fn page_state<M: Mmu + ?Sized>(mmu: &M, vaddr: u32) -> PageState {
    if !table_present(mmu, vaddr) {
        return PageState::Unmapped;
    }
    PageState::decode(mmu.read_word(pte_address(vaddr)))
}

/// MMU backed by the live x86 page tables
///
/// Requires paging to be on with the directory mapped at slot 1023.
pub struct SelfMappedMmu {
    _private: (),
}

impl SelfMappedMmu {
    /// # Safety
    /// Paging must be enabled with the self-map installed, and only one
    /// instance may exist.
    pub const unsafe fn new() -> Self {
        SelfMappedMmu { _private: () }
    }
}

impl Mmu for SelfMappedMmu {
    fn read_word(&self, addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) }
    }

    fn page_mut(&mut self, page: u32) -> &mut [u8] {
        let base = (page & ADDR_MASK) as usize as *mut u8;
        unsafe { core::slice::from_raw_parts_mut(base, PAGE_SIZE) }
    }

    #[inline]
    fn invalidate(&mut self, addr: u32) {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        unsafe {
            core::arch::asm!(
                "invlpg [{}]",
                in(reg) addr as usize,
                options(nostack, preserves_flags)
            );
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        let _ = addr;
    }
}
