//! Host-side machine model for tests
//!
//! [`SimulatedMachine`] keeps a flat physical memory and walks real x86
//! two-level tables in it, starting from a self-mapped directory at
//! `PAGE_DIRECTORY_PHYS`. CPU accesses set ACCESSED/DIRTY the way hardware
//! does and report a [`SimFault`] where the hardware would raise #PF.
//! [`MemDisk`] is a RAM-backed block device with an optional bad sector.

use pagekern_driver_traits::{BlockDevice, BlockGeometry, DriverError, DriverResult, SECTOR_SIZE};

use crate::layout::{PAGE_DIRECTORY_PHYS, PAGE_SIZE, SELF_MAP_SLOT};
use crate::paging::{directory_index, table_index, EntryFlags, Mmu, ADDR_MASK};

/// A page fault the simulated CPU would have raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFault {
    pub address: u32,
    pub write: bool,
}

pub struct SimulatedMachine {
    memory: Vec<u8>,
    directory: u32,
    invalidations: Vec<u32>,
}

impl SimulatedMachine {
    /// Zeroed memory of `total_memory` bytes with the directory self-mapped
    pub fn new(total_memory: u32) -> Self {
        let mut machine = SimulatedMachine {
            memory: vec![0; total_memory as usize],
            directory: PAGE_DIRECTORY_PHYS,
            invalidations: Vec::new(),
        };
        let slot = machine.directory + SELF_MAP_SLOT * 4;
        machine.write_phys(slot, machine.directory | (EntryFlags::PRESENT | EntryFlags::WRITABLE).bits());
        machine
    }

    pub fn directory(&self) -> u32 {
        self.directory
    }

    pub fn read_phys(&self, paddr: u32) -> u32 {
        let at = paddr as usize;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.memory[at..at + 4]);
        u32::from_le_bytes(word)
    }

    pub fn write_phys(&mut self, paddr: u32, value: u32) {
        let at = paddr as usize;
        self.memory[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Physical address of the table entry for `vaddr`, if its table exists
    fn pte_phys(&self, vaddr: u32) -> Option<u32> {
        let pde = self.read_phys(self.directory + directory_index(vaddr) * 4);
        if pde & EntryFlags::PRESENT.bits() == 0 {
            return None;
        }
        Some((pde & ADDR_MASK) + table_index(vaddr) * 4)
    }

    /// Walk the tables without touching any flag
    pub fn translate(&self, vaddr: u32) -> Option<u32> {
        let pte = self.read_phys(self.pte_phys(vaddr)?);
        if pte & EntryFlags::PRESENT.bits() == 0 {
            return None;
        }
        Some((pte & ADDR_MASK) | (vaddr & !ADDR_MASK))
    }

    fn translate_or_panic(&self, vaddr: u32) -> u32 {
        match self.translate(vaddr) {
            Some(paddr) => paddr,
            None => panic!("simulated kernel page fault at {:#x}", vaddr),
        }
    }

    /// One CPU access to `vaddr`, updating ACCESSED (and DIRTY on writes)
    pub fn access(&mut self, vaddr: u32, write: bool) -> Result<u32, SimFault> {
        let fault = SimFault { address: vaddr, write };
        let pte_at = self.pte_phys(vaddr).ok_or(fault)?;
        let mut pte = self.read_phys(pte_at);
        if pte & EntryFlags::PRESENT.bits() == 0 {
            return Err(fault);
        }

        pte |= EntryFlags::ACCESSED.bits();
        if write {
            pte |= EntryFlags::DIRTY.bits();
        }
        self.write_phys(pte_at, pte);
        Ok((pte & ADDR_MASK) | (vaddr & !ADDR_MASK))
    }

    /// Store `data` at `vaddr`, stopping at the first fault
    pub fn write_bytes(&mut self, vaddr: u32, data: &[u8]) -> Result<(), SimFault> {
        for (i, byte) in data.iter().enumerate() {
            let paddr = self.access(vaddr + i as u32, true)?;
            self.memory[paddr as usize] = *byte;
        }
        Ok(())
    }

    /// Load `buf.len()` bytes from `vaddr`, stopping at the first fault
    pub fn read_bytes(&mut self, vaddr: u32, buf: &mut [u8]) -> Result<(), SimFault> {
        for (i, byte) in buf.iter_mut().enumerate() {
            let paddr = self.access(vaddr + i as u32, false)?;
            *byte = self.memory[paddr as usize];
        }
        Ok(())
    }

    /// Every address passed to `invalidate` so far
    pub fn invalidations(&self) -> &[u32] {
        &self.invalidations
    }

    pub fn clear_invalidations(&mut self) {
        self.invalidations.clear();
    }
}

impl Mmu for SimulatedMachine {
    fn read_word(&self, addr: u32) -> u32 {
        let paddr = self.translate_or_panic(addr);
        self.read_phys(paddr)
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        let paddr = self.translate_or_panic(addr);
        self.write_phys(paddr, value);
    }

    fn page_mut(&mut self, page: u32) -> &mut [u8] {
        let base = self.translate_or_panic(page & ADDR_MASK) as usize;
        &mut self.memory[base..base + PAGE_SIZE]
    }

    fn invalidate(&mut self, addr: u32) {
        self.invalidations.push(addr);
    }
}

/// RAM-backed disk
pub struct MemDisk {
    sectors: Vec<[u8; SECTOR_SIZE]>,
    failing_sector: Option<u64>,
    reads: usize,
    writes: usize,
}

impl MemDisk {
    pub fn new(total_sectors: u64) -> Self {
        MemDisk {
            sectors: vec![[0; SECTOR_SIZE]; total_sectors as usize],
            failing_sector: None,
            reads: 0,
            writes: 0,
        }
    }

    /// Make every transfer touching `lba` fail with a device error
    pub fn fail_sector(&mut self, lba: Option<u64>) {
        self.failing_sector = lba;
    }

    pub fn sector(&self, lba: u64) -> &[u8; SECTOR_SIZE] {
        &self.sectors[lba as usize]
    }

    /// Sectors read successfully
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Sectors written successfully
    pub fn writes(&self) -> usize {
        self.writes
    }

    fn check(&self, start: u64, len: usize) -> DriverResult<()> {
        if len % SECTOR_SIZE != 0 {
            return Err(DriverError::InvalidParameter);
        }
        let count = (len / SECTOR_SIZE) as u64;
        if start + count > self.sectors.len() as u64 {
            return Err(DriverError::OutOfRange(start));
        }
        match self.failing_sector {
            Some(bad) if bad >= start && bad < start + count => Err(DriverError::DeviceError(0x40)),
            _ => Ok(()),
        }
    }
}

impl BlockDevice for MemDisk {
    fn geometry(&self) -> BlockGeometry {
        BlockGeometry::new(self.sectors.len() as u64)
    }

    fn read_sectors(&mut self, start: u64, buffer: &mut [u8]) -> DriverResult<usize> {
        self.check(start, buffer.len())?;
        for (i, chunk) in buffer.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            chunk.copy_from_slice(&self.sectors[start as usize + i]);
            self.reads += 1;
        }
        Ok(buffer.len())
    }

    fn write_sectors(&mut self, start: u64, buffer: &[u8]) -> DriverResult<usize> {
        self.check(start, buffer.len())?;
        for (i, chunk) in buffer.chunks_exact(SECTOR_SIZE).enumerate() {
            self.sectors[start as usize + i].copy_from_slice(chunk);
            self.writes += 1;
        }
        Ok(buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::{pde_address, pte_address};

    #[test]
    fn test_directory_is_reachable_through_self_map() {
        let machine = SimulatedMachine::new(0x400000);
        assert_eq!(machine.translate(0xFFFF_F000), Some(PAGE_DIRECTORY_PHYS));
        assert_eq!(machine.read_word(pde_address(0xFFC0_0000)), PAGE_DIRECTORY_PHYS | 0x3);
    }

    #[test]
    fn test_access_sets_usage_bits_and_faults_when_unmapped() {
        let mut machine = SimulatedMachine::new(0x400000);
        let vaddr = 0x0804_8000;
        assert_eq!(machine.access(vaddr, false), Err(SimFault { address: vaddr, write: false }));

        // Hand-build a table at 0x200000 and map vaddr to 0x300000
        machine.write_word(pde_address(vaddr), 0x0020_0007);
        machine.write_word(pte_address(vaddr), 0x0030_0007);
        assert_eq!(machine.access(vaddr + 4, true), Ok(0x0030_0004));

        let pte = machine.read_word(pte_address(vaddr));
        assert_eq!(pte & 0x60, 0x60);
    }

    #[test]
    fn test_mem_disk_bad_sector() {
        let mut disk = MemDisk::new(4);
        disk.fail_sector(Some(2));
        let buf = [1u8; SECTOR_SIZE];
        assert!(disk.write_sectors(1, &buf).is_ok());
        assert_eq!(disk.write_sectors(2, &buf), Err(DriverError::DeviceError(0x40)));
        assert_eq!(disk.writes(), 1);
    }
}
