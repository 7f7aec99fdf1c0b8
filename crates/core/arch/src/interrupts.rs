//! Timer and page fault hooks
//!
//! The kernel registers one [`InterruptHooks`] object at boot. The low-level
//! interrupt stubs call [`pagekern_timer_tick`] and [`pagekern_page_fault`],
//! which forward to it. Nothing here knows about memory management.

use core::sync::atomic::{AtomicUsize, Ordering};

use log::error;
use spin::Mutex;

use crate::cpu::{halt_forever, read_cr2};
use crate::port::outb;

/// Master PIC command port and end-of-interrupt command
const PIC1_COMMAND: u16 = 0x20;
const PIC_EOI: u8 = 0x20;

/// Page fault error code bits
pub mod error_code {
    /// Fault on a present page (protection violation)
    pub const PRESENT: u32 = 1 << 0;
    /// Fault caused by a write
    pub const WRITE: u32 = 1 << 1;
    /// Fault raised in ring 3
    pub const USER: u32 = 1 << 2;
}

/// A page fault as delivered by the CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// Faulting linear address (CR2)
    pub address: u32,
    pub error_code: u32,
    /// The interrupted code ran in user mode
    pub user: bool,
}

impl PageFault {
    /// Decode the exception frame; the mode comes from the interrupted CS
    pub const fn from_frame(address: u32, error_code: u32, cs: u32) -> Self {
        PageFault {
            address,
            error_code,
            user: cs & 3 != 0,
        }
    }

    pub const fn is_write(&self) -> bool {
        self.error_code & error_code::WRITE != 0
    }

    pub const fn is_protection_violation(&self) -> bool {
        self.error_code & error_code::PRESENT != 0
    }
}

/// What the fault hook made of a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// Retry the faulting instruction
    Resolved,
    /// The fault could not be handled; the faulting context cannot continue
    Unresolved,
    /// The system cannot continue
    Fatal,
}

/// Callbacks the interrupt layer drives
pub trait InterruptHooks {
    fn on_tick(&mut self);
    fn on_page_fault(&mut self, fault: &PageFault) -> FaultOutcome;
}

static HOOKS: Mutex<Option<&'static mut (dyn InterruptHooks + Send)>> = Mutex::new(None);
static TICKS: AtomicUsize = AtomicUsize::new(0);

/// Install the hooks; false if some were already installed
pub fn register(hooks: &'static mut (dyn InterruptHooks + Send)) -> bool {
    let mut slot = HOOKS.lock();
    if slot.is_some() {
        return false;
    }
    *slot = Some(hooks);
    true
}

/// Timer ticks seen since boot
pub fn ticks() -> usize {
    TICKS.load(Ordering::Relaxed)
}

/// Forward one tick
///
/// Skipped (but counted) if the hooks are busy.
pub fn dispatch_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    if let Some(mut slot) = HOOKS.try_lock() {
        if let Some(hooks) = slot.as_mut() {
            hooks.on_tick();
        }
    }
}

/// Forward one page fault
pub fn dispatch_page_fault(fault: &PageFault) -> FaultOutcome {
    match HOOKS.try_lock() {
        Some(mut slot) => match slot.as_mut() {
            Some(hooks) => hooks.on_page_fault(fault),
            None => FaultOutcome::Fatal,
        },
        // Faulted inside a hook
        None => FaultOutcome::Fatal,
    }
}

/// Called by the IRQ0 stub
#[no_mangle]
pub extern "C" fn pagekern_timer_tick() {
    dispatch_tick();
    unsafe { outb(PIC1_COMMAND, PIC_EOI) };
}

/// Called by the #PF stub with the error code and interrupted CS
#[no_mangle]
pub extern "C" fn pagekern_page_fault(error_code: u32, cs: u32) {
    let fault = PageFault::from_frame(read_cr2(), error_code, cs);
    match dispatch_page_fault(&fault) {
        FaultOutcome::Resolved => {}
        outcome => {
            error!("page fault at {:#x} (error {:#x}): {:?}, halting", fault.address, fault.error_code, outcome);
            halt_forever();
        }
    }
}
