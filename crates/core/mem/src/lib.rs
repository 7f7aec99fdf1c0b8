//! pagekern Memory Management
//!
//! Paged virtual memory for a 32-bit x86 kernel:
//! - `layout` - Single source of truth for all memory addresses and sizes
//! - `bitmap` - Bit-per-resource allocator over caller-supplied storage
//! - `eviction` - Fixed-capacity table of resident pages and their stamps
//! - `pool` - Address pools (physical frames or virtual pages) with clock sampling
//! - `paging` - Two-level page table entries, self-map translation, the `Mmu` trait
//! - `swap` - Page-sized swap slots on a block device
//! - `manager` - Page faults, frame acquisition with eviction, swap in/out
//!
//! # Architecture
//!
//! ```text
//! layout.rs  ─── Defines all memory addresses (NO magic numbers elsewhere)
//!    │
//!    ├── bitmap.rs ─── free/used bits
//!    │      └── pool.rs ─── AddressPool = bitmap + eviction.rs table + clock
//!    │
//!    ├── paging.rs ─── PDE/PTE codec, self-map windows, Mmu
//!    │
//!    ├── swap.rs ─── swap slots over a BlockDevice
//!    │
//!    └── manager.rs ─── MemoryManager (pools + paging + swap)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use pagekern_mem::{layout, KernelOnly, MemoryConfig, MemoryManager, Mode};
//!
//! let mut mm = MemoryManager::boot(total_memory, &MemoryConfig::new(), storage, mmu, disk)?;
//! let buffer = mm.allocate_pages(&mut KernelOnly, Mode::Kernel, 4)?;
//!
//! // From the page fault handler
//! mm.handle_page_fault(&mut running, fault_address, Mode::User)?;
//! ```

#![cfg_attr(not(any(test, feature = "sim")), no_std)]

pub mod layout;
pub mod error;
pub mod bitmap;
pub mod eviction;
pub mod pool;
pub mod paging;
pub mod swap;
pub mod context;
pub mod manager;

#[cfg(any(test, feature = "sim"))]
pub mod sim;


// Re-export commonly used items
pub use layout::{MemoryConfig, MemoryPlan, PAGE_SIZE, MAX_PAGES};
pub use error::{MemError, MemResult};
pub use pool::{AddressPool, FramePool, PoolStats};
pub use paging::{EntryFlags, Mmu, PageState, SelfMappedMmu};
pub use swap::SwapArea;
pub use context::{ExecutionContext, KernelOnly, Mode};
pub use manager::{FaultResolution, MemoryManager, MemoryStats};
