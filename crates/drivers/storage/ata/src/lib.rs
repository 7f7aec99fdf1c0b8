//! pagekern ATA PIO Driver
//!
//! Implements the BlockDevice trait for the primary ATA channel using
//! programmed I/O and LBA28 addressing. Every transfer moves one 512-byte
//! sector and busy-polls the status register; there is no interrupt-driven
//! completion.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pagekern_driver_ata::AtaPioDriver;
//! use pagekern_driver_traits::{BlockDevice, Driver};
//!
//! let mut disk = AtaPioDriver::primary();
//! disk.init()?;
//! disk.start()?;
//!
//! let mut buffer = [0u8; 512];
//! disk.read_sectors(200, &mut buffer)?;
//! ```

#![cfg_attr(not(test), no_std)]

use log::{debug, warn};
use pagekern_arch::port::Port;
use pagekern_driver_traits::{BlockDevice, BlockGeometry, Driver, DriverError, DriverInfo, DriverResult, DriverState, SECTOR_SIZE};

/// Primary channel command block
pub const ATA_PRIMARY_BASE: u16 = 0x1F0;

// Register offsets from the command block base
const REG_DATA: u16 = 0;
const REG_ERROR: u16 = 1;
const REG_SECTOR_COUNT: u16 = 2;
const REG_LBA_LOW: u16 = 3;
const REG_LBA_MID: u16 = 4;
const REG_LBA_HIGH: u16 = 5;
const REG_DEVICE: u16 = 6;
const REG_STATUS: u16 = 7;
const REG_COMMAND: u16 = 7;

/// Status register bits
pub mod status {
    pub const ERR: u8 = 1 << 0;
    pub const DRQ: u8 = 1 << 3;
    pub const DRDY: u8 = 1 << 6;
    pub const BSY: u8 = 1 << 7;
}

// Commands
const ATA_CMD_READ_SECTORS: u8 = 0x20;
const ATA_CMD_WRITE_SECTORS: u8 = 0x30;
const ATA_CMD_CACHE_FLUSH: u8 = 0xE7;
const ATA_CMD_IDENTIFY: u8 = 0xEC;

/// First sector LBA28 cannot address
pub const LBA28_LIMIT: u64 = 1 << 28;

/// Master drive, LBA mode
const DEVICE_LBA_MASTER: u8 = 0xE0;

/// Status polls before a command is declared timed out
const MAX_POLLS: u32 = 1_000_000;

/// Spins after each sector so the drive can settle
const SETTLE_SPINS: u32 = 0xFFFFF;

/// Words per sector on the data port
const WORDS_PER_SECTOR: usize = SECTOR_SIZE / 2;

/// Task file values for an LBA28 transfer of one sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFile {
    pub lba_low: u8,
    pub lba_mid: u8,
    pub lba_high: u8,
    pub device: u8,
}

impl TaskFile {
    pub fn lba28(lba: u64) -> DriverResult<Self> {
        if lba >= LBA28_LIMIT {
            return Err(DriverError::OutOfRange(lba));
        }
        Ok(TaskFile {
            lba_low: lba as u8,
            lba_mid: (lba >> 8) as u8,
            lba_high: (lba >> 16) as u8,
            device: DEVICE_LBA_MASTER | ((lba >> 24) as u8 & 0x0F),
        })
    }
}

/// What one status read says about a pending command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Still working
    Busy,
    /// Not busy and the data port is ready
    Ready,
    /// Error bit set; the error register has the code
    Failed,
}

impl Poll {
    pub const fn from_status(value: u8) -> Self {
        if value & (status::BSY | status::DRQ) == status::DRQ {
            Poll::Ready
        } else if value & status::ERR != 0 {
            Poll::Failed
        } else {
            Poll::Busy
        }
    }
}

/// LBA28 sector count from IDENTIFY words 60-61
pub fn identify_sectors(words: &[u16; WORDS_PER_SECTOR]) -> u64 {
    (words[60] as u64) | ((words[61] as u64) << 16)
}

/// ATA PIO Driver
pub struct AtaPioDriver {
    state: DriverState,
    base: Port,
    total_sectors: u64,
}

impl AtaPioDriver {
    /// Driver for the master drive on the primary channel
    pub const fn primary() -> Self {
        Self::with_base(ATA_PRIMARY_BASE)
    }

    pub const fn with_base(base: u16) -> Self {
        AtaPioDriver {
            state: DriverState::Loaded,
            base: Port(base),
            total_sectors: LBA28_LIMIT,
        }
    }

    fn reg(&self, offset: u16) -> Port {
        self.base.offset(offset)
    }

    /// Poll status until the data port is ready
    fn wait_for_data(&self) -> DriverResult<()> {
        for _ in 0..MAX_POLLS {
            let value = unsafe { self.reg(REG_STATUS).read_u8() };
            match Poll::from_status(value) {
                Poll::Ready => return Ok(()),
                Poll::Failed => return Err(self.device_error()),
                Poll::Busy => core::hint::spin_loop(),
            }
        }
        Err(DriverError::Timeout)
    }

    fn device_error(&self) -> DriverError {
        let code = unsafe { self.reg(REG_ERROR).read_u8() };
        DriverError::DeviceError(code as u32)
    }

    fn check_error(&self) -> DriverResult<()> {
        let value = unsafe { self.reg(REG_STATUS).read_u8() };
        if value & status::ERR != 0 {
            return Err(self.device_error());
        }
        Ok(())
    }

    fn settle(&self) {
        for _ in 0..SETTLE_SPINS {
            core::hint::spin_loop();
        }
    }

    /// Program the task file for one sector and issue `command`
    fn issue(&mut self, lba: u64, command: u8) -> DriverResult<()> {
        let task = TaskFile::lba28(lba)?;
        unsafe {
            self.reg(REG_SECTOR_COUNT).write_u8(1);
            self.reg(REG_LBA_LOW).write_u8(task.lba_low);
            self.reg(REG_LBA_MID).write_u8(task.lba_mid);
            self.reg(REG_LBA_HIGH).write_u8(task.lba_high);
            self.reg(REG_DEVICE).write_u8(task.device);
            self.reg(REG_COMMAND).write_u8(command);
        }
        self.wait_for_data()
    }

    fn read_one(&mut self, lba: u64, sector: &mut [u8]) -> DriverResult<()> {
        self.issue(lba, ATA_CMD_READ_SECTORS)?;
        let data = self.reg(REG_DATA);
        for pair in sector.chunks_exact_mut(2) {
            let word = unsafe { data.read_u16() };
            pair.copy_from_slice(&word.to_le_bytes());
        }
        self.check_error()?;
        self.settle();
        Ok(())
    }

    fn write_one(&mut self, lba: u64, sector: &[u8]) -> DriverResult<()> {
        self.issue(lba, ATA_CMD_WRITE_SECTORS)?;
        let data = self.reg(REG_DATA);
        for pair in sector.chunks_exact(2) {
            unsafe { data.write_u16(u16::from_le_bytes([pair[0], pair[1]])) };
        }
        self.check_error()?;
        self.settle();
        Ok(())
    }

    /// Ask the drive for its size
    pub fn identify(&mut self) -> DriverResult<u64> {
        unsafe {
            self.reg(REG_DEVICE).write_u8(DEVICE_LBA_MASTER);
            self.reg(REG_SECTOR_COUNT).write_u8(0);
            self.reg(REG_LBA_LOW).write_u8(0);
            self.reg(REG_LBA_MID).write_u8(0);
            self.reg(REG_LBA_HIGH).write_u8(0);
            self.reg(REG_COMMAND).write_u8(ATA_CMD_IDENTIFY);
            if self.reg(REG_STATUS).read_u8() == 0 {
                return Err(DriverError::DeviceNotFound);
            }
        }
        self.wait_for_data()?;

        let mut words = [0u16; WORDS_PER_SECTOR];
        let data = self.reg(REG_DATA);
        for word in words.iter_mut() {
            *word = unsafe { data.read_u16() };
        }
        Ok(identify_sectors(&words))
    }

    fn check_request(&self, start: u64, len: usize) -> DriverResult<u64> {
        if self.state != DriverState::Active {
            return Err(DriverError::InvalidState);
        }
        if len % SECTOR_SIZE != 0 {
            return Err(DriverError::InvalidParameter);
        }
        let count = (len / SECTOR_SIZE) as u64;
        match start.checked_add(count) {
            Some(end) if end <= self.total_sectors => Ok(count),
            _ => Err(DriverError::OutOfRange(start)),
        }
    }
}

impl Driver for AtaPioDriver {
    fn info(&self) -> DriverInfo {
        DriverInfo {
            name: "ata-pio",
            version: "0.1.0",
            description: "ATA PIO disk driver (LBA28, polled)",
        }
    }

    fn state(&self) -> DriverState {
        self.state
    }

    fn init(&mut self) -> DriverResult<()> {
        if self.state != DriverState::Loaded {
            return Err(DriverError::InvalidState);
        }
        self.state = DriverState::Ready;
        Ok(())
    }

    fn start(&mut self) -> DriverResult<()> {
        if self.state != DriverState::Ready {
            return Err(DriverError::InvalidState);
        }

        match self.identify() {
            Ok(sectors) if sectors > 0 => {
                self.total_sectors = sectors.min(LBA28_LIMIT);
                debug!("ata: {} sectors", self.total_sectors);
            }
            Ok(_) => {}
            Err(err) => warn!("ata: identify failed ({}), assuming LBA28 size", err),
        }

        self.state = DriverState::Active;
        Ok(())
    }

    fn stop(&mut self) -> DriverResult<()> {
        if self.state != DriverState::Active {
            return Err(DriverError::InvalidState);
        }
        self.state = DriverState::Ready;
        Ok(())
    }
}

impl BlockDevice for AtaPioDriver {
    fn geometry(&self) -> BlockGeometry {
        BlockGeometry::new(self.total_sectors)
    }

    fn read_sectors(&mut self, start: u64, buffer: &mut [u8]) -> DriverResult<usize> {
        self.check_request(start, buffer.len())?;
        for (i, sector) in buffer.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.read_one(start + i as u64, sector)?;
        }
        Ok(buffer.len())
    }

    fn write_sectors(&mut self, start: u64, buffer: &[u8]) -> DriverResult<usize> {
        self.check_request(start, buffer.len())?;
        for (i, sector) in buffer.chunks_exact(SECTOR_SIZE).enumerate() {
            self.write_one(start + i as u64, sector)?;
        }
        Ok(buffer.len())
    }

    fn flush(&mut self) -> DriverResult<()> {
        if self.state != DriverState::Active {
            return Err(DriverError::InvalidState);
        }
        unsafe {
            self.reg(REG_DEVICE).write_u8(DEVICE_LBA_MASTER);
            self.reg(REG_COMMAND).write_u8(ATA_CMD_CACHE_FLUSH);
        }
        for _ in 0..MAX_POLLS {
            let value = unsafe { self.reg(REG_STATUS).read_u8() };
            if value & status::BSY == 0 {
                if value & status::ERR != 0 {
                    return Err(self.device_error());
                }
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(DriverError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_file_splits_lba() {
        let task = TaskFile::lba28(0x0ABC_DEF1).unwrap();
        assert_eq!(task.lba_low, 0xF1);
        assert_eq!(task.lba_mid, 0xDE);
        assert_eq!(task.lba_high, 0xBC);
        assert_eq!(task.device, 0xEA);
    }

    #[test]
    fn test_task_file_rejects_lba48() {
        assert_eq!(TaskFile::lba28(LBA28_LIMIT), Err(DriverError::OutOfRange(LBA28_LIMIT)));
        assert_eq!(TaskFile::lba28(200).unwrap().device, 0xE0);
    }

    #[test]
    fn test_status_polling() {
        assert_eq!(Poll::from_status(status::DRDY | status::DRQ), Poll::Ready);
        assert_eq!(Poll::from_status(status::BSY | status::DRQ), Poll::Busy);
        assert_eq!(Poll::from_status(status::BSY), Poll::Busy);
        assert_eq!(Poll::from_status(status::DRDY | status::ERR), Poll::Failed);
        assert_eq!(Poll::from_status(status::DRDY), Poll::Busy);
    }

    #[test]
    fn test_identify_sector_count() {
        let mut words = [0u16; WORDS_PER_SECTOR];
        words[60] = 0x4000;
        words[61] = 0x0001;
        assert_eq!(identify_sectors(&words), 0x0001_4000);
    }

    #[test]
    fn test_lifecycle_guards_io() {
        let mut disk = AtaPioDriver::primary();
        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(disk.state(), DriverState::Loaded);
        assert_eq!(disk.read_sectors(0, &mut buf), Err(DriverError::InvalidState));
        assert_eq!(disk.start(), Err(DriverError::InvalidState));
        disk.init().unwrap();
        assert_eq!(disk.state(), DriverState::Ready);
        assert_eq!(disk.stop(), Err(DriverError::InvalidState));
    }
}
