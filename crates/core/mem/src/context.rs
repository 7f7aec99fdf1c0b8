//! Execution contexts
//!
//! The memory manager owns the kernel pools; each user context owns its own
//! virtual pool. The running context is handed to the manager on every call
//! that may touch user memory.

use crate::pool::AddressPool;

/// Privilege level a request or fault comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Kernel,
    User,
}

impl Mode {
    /// Mode of the code segment selector that was running (RPL 0 is kernel)
    pub const fn from_selector(cs: u16) -> Self {
        if cs & 3 == 0 {
            Mode::Kernel
        } else {
            Mode::User
        }
    }
}

/// The currently running context, as seen by the memory manager
pub trait ExecutionContext<'a> {
    /// This context's user virtual pool, if it has one
    fn user_virtual(&mut self) -> Option<&mut AddressPool<'a>>;
}

/// Context for kernel threads and early boot: no user address space
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelOnly;

impl<'a> ExecutionContext<'a> for KernelOnly {
    fn user_virtual(&mut self) -> Option<&mut AddressPool<'a>> {
        None
    }
}
