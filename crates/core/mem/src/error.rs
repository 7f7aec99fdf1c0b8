//! Memory management errors

use core::fmt;

/// Failures reported by pools, the swap area and the memory manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// Installed memory does not cover the reserved area
    MemoryTooSmall { total: u32, required: u32 },
    /// Caller supplied less bitmap storage than the plan needs
    BitmapStorageTooSmall { required: usize, provided: usize },
    /// Eviction table full: a resident page could not be tracked
    TrackingExhausted,
    /// No free frame and nothing left to evict
    FrameExhausted,
    /// No contiguous run of free pages (pool unchanged)
    PoolExhausted,
    /// No free swap slot
    SwapExhausted,
    /// Range is not (fully) allocated in its pool
    NotAllocated { address: u32 },
    /// Fault outside every allocated range of the owning pool
    InvalidAddress { address: u32 },
    /// Page has no frame to swap out
    NotResident { address: u32 },
    /// Page has no swap slot to read back
    NotSwapped { address: u32 },
    /// User-mode request from a context without a user pool
    NoUserSpace,
}

pub type MemResult<T> = Result<T, MemError>;

impl MemError {
    /// Errors the system cannot continue from
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            MemError::MemoryTooSmall { .. }
                | MemError::BitmapStorageTooSmall { .. }
                | MemError::TrackingExhausted
                | MemError::FrameExhausted
        )
    }
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemError::MemoryTooSmall { total, required } => write!(
                f,
                "memory is too small: {} bytes installed, {} required",
                total, required
            ),
            MemError::BitmapStorageTooSmall { required, provided } => write!(
                f,
                "bitmap storage too small: {} bytes provided, {} required",
                provided, required
            ),
            MemError::TrackingExhausted => write!(f, "eviction table exhausted"),
            MemError::FrameExhausted => write!(f, "no physical frame and no victim to evict"),
            MemError::PoolExhausted => write!(f, "no contiguous free pages"),
            MemError::SwapExhausted => write!(f, "swap space exhausted"),
            MemError::NotAllocated { address } => write!(f, "pages at {:#x} are not allocated", address),
            MemError::InvalidAddress { address } => write!(f, "invalid address {:#x}", address),
            MemError::NotResident { address } => write!(f, "page {:#x} is not resident", address),
            MemError::NotSwapped { address } => write!(f, "page {:#x} is not swapped out", address),
            MemError::NoUserSpace => write!(f, "context has no user address space"),
        }
    }
}
