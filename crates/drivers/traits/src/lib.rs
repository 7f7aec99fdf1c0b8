//! Hardware Driver Traits for pagekern
//!
//! This crate defines the trait interfaces that hardware drivers implement.
//! The memory manager talks to its swap disk through [`BlockDevice`] without
//! knowing which controller sits behind it.

#![cfg_attr(not(test), no_std)]

pub mod block;

pub use block::*;

use core::fmt;

/// Why a driver call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// No drive answered on the channel
    DeviceNotFound,
    /// Status never settled within the poll budget
    Timeout,
    /// Buffer length is not a whole number of sectors
    InvalidParameter,
    /// Call not allowed in the current lifecycle state
    InvalidState,
    BufferTooSmall,
    /// Sector beyond the end of the device
    OutOfRange(u64),
    /// Controller error register contents
    DeviceError(u32),
}

pub type DriverResult<T> = Result<T, DriverError>;

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::DeviceNotFound => write!(f, "device not found"),
            DriverError::Timeout => write!(f, "operation timed out"),
            DriverError::InvalidParameter => write!(f, "invalid parameter"),
            DriverError::InvalidState => write!(f, "invalid driver state"),
            DriverError::BufferTooSmall => write!(f, "buffer too small"),
            DriverError::OutOfRange(lba) => write!(f, "sector {} out of range", lba),
            DriverError::DeviceError(code) => write!(f, "device error {:#x}", code),
        }
    }
}

/// Driver lifecycle: `Loaded` -init-> `Ready` -start-> `Active` -stop-> `Ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Loaded,
    Ready,
    /// Accepting I/O
    Active,
}

#[derive(Debug, Clone, Copy)]
pub struct DriverInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
}

/// Lifecycle every driver goes through before it serves requests
pub trait Driver {
    fn info(&self) -> DriverInfo;

    fn state(&self) -> DriverState;

    /// Put the hardware into a known state
    fn init(&mut self) -> DriverResult<()>;

    /// Probe the device and begin accepting I/O
    fn start(&mut self) -> DriverResult<()>;

    fn stop(&mut self) -> DriverResult<()>;
}
