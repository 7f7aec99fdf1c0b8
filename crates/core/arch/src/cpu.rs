//! CPU control and boot-time probes

use core::arch::asm;

/// Enable interrupts
#[inline]
pub fn enable_interrupts() {
    unsafe {
        asm!("sti", options(nostack, preserves_flags));
    }
}

/// Disable interrupts
#[inline]
pub fn disable_interrupts() {
    unsafe {
        asm!("cli", options(nostack, preserves_flags));
    }
}

/// Stop the machine: interrupts off, halt forever
pub fn halt_forever() -> ! {
    loop {
        unsafe {
            asm!("cli; hlt", options(nostack, preserves_flags));
        }
    }
}

/// Faulting linear address of the last page fault
#[inline]
pub fn read_cr2() -> u32 {
    let value: usize;
    unsafe {
        asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value as u32
}

/// Read the memory size word the boot loader left at `addr`
///
/// # Safety
/// `addr` must be mapped and hold the probed size.
#[inline]
pub unsafe fn read_memory_size_word(addr: u32) -> u32 {
    core::ptr::read_volatile(addr as usize as *const u32)
}
