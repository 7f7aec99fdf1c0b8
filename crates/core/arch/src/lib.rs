//! pagekern x86 Architecture Support
//!
//! This crate provides the low-level pieces the memory subsystem needs from
//! the CPU and the board:
//! - Port I/O primitives
//! - Interrupt control, halt, CR2 and the boot-time memory size probe
//! - A `log` backend on the COM1 serial port
//! - The timer / page fault hook registry the interrupt stubs call into

#![cfg_attr(not(test), no_std)]

pub mod port;
pub mod cpu;
pub mod logger;
pub mod interrupts;

pub use cpu::{disable_interrupts, enable_interrupts, halt_forever, read_cr2};
pub use interrupts::{FaultOutcome, InterruptHooks, PageFault};
pub use logger::SerialLogger;
