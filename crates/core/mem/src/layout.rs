//! pagekern Memory Layout - Single Source of Truth
//!
//! ALL memory addresses and sizes are defined here.
//! NO magic numbers anywhere else in the codebase.
//!
//! # Physical Memory Layout
//!
//! ```text
//! 0x000000 - 0x0FFFFF   Kernel image + BIOS (1MB)
//! 0x100000 - 0x1FFFFF   Page directory, kernel page tables (256 pages)
//! 0x200000 - ...        Kernel physical pool (half of the free pages)
//! ...      - top        User physical pool (the other half)
//! ```
//!
//! # Virtual Address Layout
//!
//! ```text
//! 0x08048000 - 0xBFFFFFFF   User pool (one per process)
//! 0xC0100000 - ...          Kernel virtual pool
//! 0xFFC00000 - 0xFFFFFFFF   Self-mapped page tables (directory slot 1023)
//! ```

use static_assertions::const_assert_eq;

use crate::error::{MemError, MemResult};

// =============================================================================
// Page and Sector Sizes
// =============================================================================

/// Standard page size (4 KiB)
pub const PAGE_SIZE: usize = 0x1000;
pub const PAGE_SIZE_U32: u32 = PAGE_SIZE as u32;

/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: u32 = 12;

/// Disk sector size
pub const SECTOR_SIZE: usize = 512;

/// Sectors backing one swapped page
pub const SECTORS_PER_PAGE: usize = 8;

const_assert_eq!(SECTOR_SIZE * SECTORS_PER_PAGE, PAGE_SIZE);

/// Capacity of each pool's eviction table
pub const MAX_PAGES: usize = 200;

// =============================================================================
// Physical Memory Regions
// =============================================================================

/// Kernel image and BIOS area (0 - 1MB)
pub const PHYS_KERNEL_IMAGE_SIZE: u32 = 0x100000;

/// Pages set aside above 1MB for the page directory and kernel page tables
pub const KERNEL_RESERVED_PAGES: u32 = 256;

/// Everything below this is never handed out by a pool
pub const RESERVED_MEMORY: u32 = KERNEL_RESERVED_PAGES * PAGE_SIZE_U32 + PHYS_KERNEL_IMAGE_SIZE;

/// Boot page directory
pub const PAGE_DIRECTORY_PHYS: u32 = 0x100000;

/// Where the boot loader leaves the probed memory size word
pub const MEMORY_SIZE_ADDRESS: u32 = 0x7C00;

// =============================================================================
// Virtual Address Layout
// =============================================================================

/// Kernel virtual pool base
pub const KERNEL_VIRTUAL_START: u32 = 0xC010_0000;

/// User virtual pool base (classic ELF load address)
pub const USER_VIRTUAL_START: u32 = 0x0804_8000;

/// End of user space
pub const USER_VIRTUAL_END: u32 = 0xC000_0000;

/// Largest user pool a process can have
pub const USER_VIRTUAL_PAGES: usize = ((USER_VIRTUAL_END - USER_VIRTUAL_START) / PAGE_SIZE_U32) as usize;

/// Directory slot that maps the directory onto itself
pub const SELF_MAP_SLOT: u32 = 1023;

/// Virtual window exposing all page tables
pub const SELF_MAP_TABLES: u32 = 0xFFC0_0000;

/// Virtual address of the page directory through the self-map
pub const SELF_MAP_DIRECTORY: u32 = 0xFFFF_F000;

// =============================================================================
// Swap Area
// =============================================================================

/// First disk sector used for swap
pub const SWAP_BASE_SECTOR: u64 = 200;

/// Number of page-sized swap slots (400 sectors)
pub const SWAP_SLOTS: usize = 50;

// =============================================================================
// Boot-time Configuration
// =============================================================================

/// Tunables fixed at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    /// First sector of the swap area
    pub swap_base_sector: u64,
    /// Number of swap slots
    pub swap_slots: usize,
    /// Cap on the user physical pool (small values force swapping)
    pub user_frame_limit: Option<usize>,
    /// Cap on the kernel physical pool; page tables come out of it too
    pub kernel_frame_limit: Option<usize>,
}

impl MemoryConfig {
    pub const fn new() -> Self {
        MemoryConfig {
            swap_base_sector: SWAP_BASE_SECTOR,
            swap_slots: SWAP_SLOTS,
            user_frame_limit: None,
            kernel_frame_limit: None,
        }
    }

    pub const fn with_user_frame_limit(mut self, frames: usize) -> Self {
        self.user_frame_limit = Some(frames);
        self
    }

    pub const fn with_kernel_frame_limit(mut self, frames: usize) -> Self {
        self.kernel_frame_limit = Some(frames);
        self
    }

    pub const fn with_swap_slots(mut self, slots: usize) -> Self {
        self.swap_slots = slots;
        self
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool geometry derived from installed memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPlan {
    pub total_memory: u32,
    /// Kernel physical frames
    pub kernel_pages: usize,
    pub user_pages: usize,
    /// Kernel virtual pages: the kernel half, whatever the frame cap
    pub kernel_virtual_pages: usize,
    pub kernel_physical_start: u32,
    pub user_physical_start: u32,
    pub kernel_virtual_start: u32,
    pub swap_slots: usize,
    pub swap_base_sector: u64,
}

impl MemoryPlan {
    /// Split free memory between the kernel and user pools
    ///
    /// Fails when installed memory does not even cover the reserved area.
    pub fn new(total_memory: u32, config: &MemoryConfig) -> MemResult<Self> {
        if total_memory < RESERVED_MEMORY {
            return Err(MemError::MemoryTooSmall {
                total: total_memory,
                required: RESERVED_MEMORY,
            });
        }

        let free_pages = ((total_memory - RESERVED_MEMORY) / PAGE_SIZE_U32) as usize;
        let kernel_half = free_pages / 2;
        let mut kernel_pages = kernel_half;
        if let Some(limit) = config.kernel_frame_limit {
            kernel_pages = kernel_pages.min(limit);
        }
        let mut user_pages = free_pages - kernel_half;
        if let Some(limit) = config.user_frame_limit {
            user_pages = user_pages.min(limit);
        }

        Ok(MemoryPlan {
            total_memory,
            kernel_pages,
            user_pages,
            kernel_virtual_pages: kernel_half,
            kernel_physical_start: RESERVED_MEMORY,
            user_physical_start: RESERVED_MEMORY + (kernel_half as u32) * PAGE_SIZE_U32,
            kernel_virtual_start: KERNEL_VIRTUAL_START,
            swap_slots: config.swap_slots,
            swap_base_sector: config.swap_base_sector,
        })
    }

    /// Bitmap bytes for kernel-phys, user-phys, kernel-virt and swap, in order
    pub const fn bitmap_sizes(&self) -> [usize; 4] {
        [
            bitmap_bytes(self.kernel_pages),
            bitmap_bytes(self.user_pages),
            bitmap_bytes(self.kernel_virtual_pages),
            bitmap_bytes(self.swap_slots),
        ]
    }

    /// Total bitmap storage the memory manager needs
    pub const fn bitmap_bytes(&self) -> usize {
        let sizes = self.bitmap_sizes();
        sizes[0] + sizes[1] + sizes[2] + sizes[3]
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Bytes needed to hold one bit per item
#[inline]
pub const fn bitmap_bytes(bits: usize) -> usize {
    (bits + 7) / 8
}

/// Align address down to page boundary
#[inline]
pub const fn page_align_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE_U32 - 1)
}

/// Align address up to page boundary
#[inline]
pub const fn page_align_up(addr: u32) -> u32 {
    (addr + PAGE_SIZE_U32 - 1) & !(PAGE_SIZE_U32 - 1)
}

/// Calculate number of 4KB pages needed for a byte size
#[inline]
pub const fn pages_needed(size: usize) -> usize {
    (size + PAGE_SIZE - 1) / PAGE_SIZE
}

/// Decode the memory size word left by the boot loader
///
/// Low half counts KiB below 16MB, high half counts 64KiB blocks above it.
#[inline]
pub const fn decode_memory_size(raw: u32) -> u32 {
    let low = raw & 0xFFFF;
    let high = (raw >> 16) & 0xFFFF;
    low * 1024 + high * 64 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_memory_is_two_megabytes() {
        assert_eq!(RESERVED_MEMORY, 0x200000);
    }

    #[test]
    fn test_plan_splits_free_pages() {
        let plan = MemoryPlan::new(0x400000, &MemoryConfig::new()).unwrap();
        assert_eq!(plan.kernel_pages, 256);
        assert_eq!(plan.user_pages, 256);
        assert_eq!(plan.kernel_physical_start, 0x200000);
        assert_eq!(plan.user_physical_start, 0x300000);
        assert_eq!(plan.bitmap_sizes(), [32, 32, 32, 7]);
    }

    #[test]
    fn test_plan_odd_page_count_gives_user_the_extra_page() {
        let plan = MemoryPlan::new(RESERVED_MEMORY + 3 * PAGE_SIZE_U32, &MemoryConfig::new()).unwrap();
        assert_eq!(plan.kernel_pages, 1);
        assert_eq!(plan.user_pages, 2);
    }

    #[test]
    fn test_plan_respects_user_frame_limit() {
        let config = MemoryConfig::new().with_user_frame_limit(4);
        let plan = MemoryPlan::new(0x400000, &config).unwrap();
        assert_eq!(plan.user_pages, 4);
        assert_eq!(plan.bitmap_bytes(), 32 + 1 + 32 + 7);
    }

    #[test]
    fn test_plan_respects_kernel_frame_limit() {
        let config = MemoryConfig::new().with_kernel_frame_limit(4);
        let plan = MemoryPlan::new(0x400000, &config).unwrap();
        assert_eq!(plan.kernel_pages, 4);
        assert_eq!(plan.kernel_virtual_pages, 256);
        // User frames stay where the uncapped split puts them
        assert_eq!(plan.user_physical_start, 0x300000);
        assert_eq!(plan.bitmap_sizes(), [1, 32, 32, 7]);
    }

    #[test]
    fn test_plan_rejects_small_memory() {
        let err = MemoryPlan::new(RESERVED_MEMORY - 1, &MemoryConfig::new()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(
            err,
            MemError::MemoryTooSmall { total: RESERVED_MEMORY - 1, required: RESERVED_MEMORY }
        );
    }

    #[test]
    fn test_decode_memory_size() {
        // 15MB below 16MB plus 16 * 64KB above it
        assert_eq!(decode_memory_size(0x0010_3C00), 15 * 1024 * 1024 + 1024 * 1024);
        assert_eq!(decode_memory_size(0), 0);
    }

    #[test]
    fn test_alignment_helpers() {
        assert_eq!(page_align_down(0x1234), 0x1000);
        assert_eq!(page_align_up(0x1234), 0x2000);
        assert_eq!(page_align_up(0x2000), 0x2000);
        assert_eq!(pages_needed(1), 1);
        assert_eq!(pages_needed(PAGE_SIZE + 1), 2);
        assert_eq!(USER_VIRTUAL_PAGES, 0xB7FB8);
    }
}
