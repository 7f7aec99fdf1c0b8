//! Block Device Trait
//!
//! Implemented by storage drivers (ATA PIO, RAM disks in tests).
//! Used by the swap area to move pages to and from disk one sector at a time.

use crate::{DriverError, DriverResult};

/// Bytes per sector on every device we drive
pub const SECTOR_SIZE: usize = 512;

/// Block device geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGeometry {
    /// Sector size in bytes
    pub sector_size: u32,
    /// Total number of sectors
    pub total_sectors: u64,
}

impl BlockGeometry {
    pub const fn new(total_sectors: u64) -> Self {
        BlockGeometry {
            sector_size: SECTOR_SIZE as u32,
            total_sectors,
        }
    }
}

/// Block device interface for storage drivers
pub trait BlockDevice {
    /// Get device geometry
    fn geometry(&self) -> BlockGeometry;

    /// Read sectors starting at `start`
    ///
    /// The buffer length determines the sector count. Returns bytes read.
    fn read_sectors(&mut self, start: u64, buffer: &mut [u8]) -> DriverResult<usize>;

    /// Write sectors starting at `start`
    ///
    /// The buffer length determines the sector count. Returns bytes written.
    fn write_sectors(&mut self, start: u64, buffer: &[u8]) -> DriverResult<usize>;

    /// Flush any cached writes to the device
    fn flush(&mut self) -> DriverResult<()> {
        Ok(())
    }
}

/// Convenience methods for BlockDevice
pub trait BlockDeviceExt: BlockDevice {
    fn sector_size(&self) -> usize {
        self.geometry().sector_size as usize
    }

    fn total_sectors(&self) -> u64 {
        self.geometry().total_sectors
    }

    /// Fails with `OutOfRange` when `count` sectors from `lba` run past the end
    fn check_range(&self, lba: u64, count: u64) -> DriverResult<()> {
        match lba.checked_add(count) {
            Some(end) if end <= self.total_sectors() => Ok(()),
            _ => Err(DriverError::OutOfRange(lba)),
        }
    }

    /// Read a single sector into the front of `buf`
    fn read_sector(&mut self, lba: u64, buf: &mut [u8]) -> DriverResult<usize> {
        let sector_size = self.sector_size();
        if buf.len() < sector_size {
            return Err(DriverError::BufferTooSmall);
        }
        self.check_range(lba, 1)?;
        self.read_sectors(lba, &mut buf[..sector_size])
    }

    /// Write a single sector from the front of `buf`
    fn write_sector(&mut self, lba: u64, buf: &[u8]) -> DriverResult<usize> {
        let sector_size = self.sector_size();
        if buf.len() < sector_size {
            return Err(DriverError::BufferTooSmall);
        }
        self.check_range(lba, 1)?;
        self.write_sectors(lba, &buf[..sector_size])
    }
}

impl<T: BlockDevice + ?Sized> BlockDeviceExt for T {}
