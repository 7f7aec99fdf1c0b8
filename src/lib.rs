//! pagekern kernel glue
//!
//! [`Kernel`] owns the memory manager and the process table and is the one
//! object the interrupt layer calls back into. Every memory operation it
//! forwards gets the running process (or [`KernelOnly`] when none runs)
//! passed in explicitly.

#![cfg_attr(not(test), no_std)]

use log::{error, warn};
use pagekern_arch::interrupts::{FaultOutcome, InterruptHooks, PageFault};
use pagekern_driver_traits::BlockDevice;
use pagekern_mem::{FaultResolution, KernelOnly, MemResult, MemoryManager, Mmu, Mode};
use pagekern_process::{Pid, ProcessError, ProcessTable};

pub struct Kernel<'a, M: Mmu, D: BlockDevice> {
    memory: MemoryManager<'a, M, D>,
    processes: ProcessTable<'a>,
}

impl<'a, M: Mmu, D: BlockDevice> Kernel<'a, M, D> {
    pub fn new(memory: MemoryManager<'a, M, D>) -> Self {
        Kernel {
            memory,
            processes: ProcessTable::new(),
        }
    }

    pub fn memory(&self) -> &MemoryManager<'a, M, D> {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryManager<'a, M, D> {
        &mut self.memory
    }

    pub fn processes(&self) -> &ProcessTable<'a> {
        &self.processes
    }

    pub fn processes_mut(&mut self) -> &mut ProcessTable<'a> {
        &mut self.processes
    }

    /// Create a process and make it the running one
    pub fn spawn(&mut self, name: &'static str, pool_storage: &'a mut [u8]) -> Result<Pid, ProcessError> {
        let pid = self.processes.spawn(name, pool_storage)?;
        self.processes.set_running(pid)?;
        Ok(pid)
    }

    /// Tear down `pid`, returning its pages to the pools
    pub fn exit(&mut self, pid: Pid) -> Result<usize, ProcessError> {
        self.processes.exit(pid, &mut self.memory)
    }

    /// `allocate_pages` on behalf of whatever runs now
    pub fn allocate_pages(&mut self, mode: Mode, count: usize) -> MemResult<u32> {
        match self.processes.running_mut() {
            Some(process) => self.memory.allocate_pages(process, mode, count),
            None => self.memory.allocate_pages(&mut KernelOnly, mode, count),
        }
    }

    /// `release_pages` on behalf of whatever runs now
    pub fn release_pages(&mut self, mode: Mode, vaddr: u32, count: usize) -> MemResult<()> {
        match self.processes.running_mut() {
            Some(process) => self.memory.release_pages(process, mode, vaddr, count),
            None => self.memory.release_pages(&mut KernelOnly, mode, vaddr, count),
        }
    }

    fn resolve_fault(&mut self, address: u32, mode: Mode) -> MemResult<FaultResolution> {
        match self.processes.running_mut() {
            Some(process) => self.memory.handle_page_fault(process, address, mode),
            None => self.memory.handle_page_fault(&mut KernelOnly, address, mode),
        }
    }
}

impl<'a, M: Mmu, D: BlockDevice> InterruptHooks for Kernel<'a, M, D> {
    fn on_tick(&mut self) {
        match self.processes.running_mut() {
            Some(process) => self.memory.tick(process),
            None => self.memory.tick(&mut KernelOnly),
        }
    }

    fn on_page_fault(&mut self, fault: &PageFault) -> FaultOutcome {
        let mode = if fault.user { Mode::User } else { Mode::Kernel };
        match self.resolve_fault(fault.address, mode) {
            Ok(_) => FaultOutcome::Resolved,
            Err(err) if err.is_fatal() => {
                error!("page fault at {:#x}: {}", fault.address, err);
                FaultOutcome::Fatal
            }
            Err(err) => {
                warn!("page fault at {:#x} unresolved: {}", fault.address, err);
                FaultOutcome::Unresolved
            }
        }
    }
}
