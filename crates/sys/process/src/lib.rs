//! Process Management for pagekern
//!
//! A process is an execution context that owns its user virtual pool. All
//! processes share the one self-mapped page directory, so each table slot
//! owns its own slice of the user range and no two live pools overlap.

#![cfg_attr(not(test), no_std)]

use core::fmt;

use log::info;
use pagekern_driver_traits::BlockDevice;
use pagekern_mem::layout::{page_align_down, PAGE_SIZE_U32, USER_VIRTUAL_END, USER_VIRTUAL_START};
use pagekern_mem::{AddressPool, ExecutionContext, MemError, MemoryManager, Mmu, Mode};

/// Process identifier
pub type Pid = u32;

pub const MAX_PROCESSES: usize = 16;

/// User address space owned by one table slot
pub const USER_REGION_SIZE: u32 = page_align_down((USER_VIRTUAL_END - USER_VIRTUAL_START) / MAX_PROCESSES as u32);

pub const USER_REGION_PAGES: usize = (USER_REGION_SIZE / PAGE_SIZE_U32) as usize;

/// First user address of table slot `slot`
pub const fn user_region_start(slot: usize) -> u32 {
    USER_VIRTUAL_START + (slot as u32) * USER_REGION_SIZE
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// Every slot of the table is taken
    TableFull,
    NoSuchProcess(Pid),
    Memory(MemError),
}

impl From<MemError> for ProcessError {
    fn from(err: MemError) -> Self {
        ProcessError::Memory(err)
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::TableFull => write!(f, "process table full"),
            ProcessError::NoSuchProcess(pid) => write!(f, "no process {}", pid),
            ProcessError::Memory(err) => write!(f, "{}", err),
        }
    }
}

/// Process control block
pub struct Process<'a> {
    pub id: Pid,
    pub name: &'static str,
    pub state: ProcessState,
    user_virtual: AddressPool<'a>,
}

impl<'a> Process<'a> {
    /// A process whose user pool starts at `base`, tracked in `storage` (one bit per page)
    ///
    /// The pool never grows past one region.
    pub fn new(id: Pid, name: &'static str, base: u32, storage: &'a mut [u8]) -> Self {
        let pages = (storage.len() * 8).min(USER_REGION_PAGES);
        Process {
            id,
            name,
            state: ProcessState::Ready,
            user_virtual: AddressPool::new(storage, pages, base),
        }
    }

    pub fn user_pool(&self) -> &AddressPool<'a> {
        &self.user_virtual
    }

    /// Give back every page still allocated in the user pool
    ///
    /// Resident frames return to the user physical pool and swapped-out
    /// pages free their slots. Returns the number of pages released.
    pub fn release_address_space<M, D>(&mut self, mm: &mut MemoryManager<'a, M, D>) -> Result<usize, MemError>
    where
        M: Mmu,
        D: BlockDevice,
    {
        let mut released = 0;
        while let Some(page) = self.user_virtual.first_allocated() {
            mm.release_pages(self, Mode::User, page, 1)?;
            released += 1;
        }
        Ok(released)
    }
}

impl<'a> ExecutionContext<'a> for Process<'a> {
    fn user_virtual(&mut self) -> Option<&mut AddressPool<'a>> {
        Some(&mut self.user_virtual)
    }
}

/// Fixed-capacity table of live processes
pub struct ProcessTable<'a> {
    slots: [Option<Process<'a>>; MAX_PROCESSES],
    next_pid: Pid,
    running: Option<Pid>,
}

impl<'a> ProcessTable<'a> {
    pub fn new() -> Self {
        ProcessTable {
            slots: core::array::from_fn(|_| None),
            next_pid: 1,
            running: None,
        }
    }

    /// Create a ready process with a user pool backed by `storage`
    ///
    /// The pool sits in the user region of the free slot the process takes.
    pub fn spawn(&mut self, name: &'static str, storage: &'a mut [u8]) -> Result<Pid, ProcessError> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(ProcessError::TableFull)?;

        let pid = self.next_pid;
        self.next_pid += 1;
        let base = user_region_start(index);
        let process = Process::new(pid, name, base, storage);
        info!(
            "process {} '{}': {} user pages at {:#x}",
            pid,
            name,
            process.user_virtual.page_count(),
            base
        );
        *slot = Some(process);
        Ok(pid)
    }

    pub fn lookup(&self, pid: Pid) -> Option<&Process<'a>> {
        self.slots.iter().flatten().find(|p| p.id == pid)
    }

    pub fn lookup_mut(&mut self, pid: Pid) -> Option<&mut Process<'a>> {
        self.slots.iter_mut().flatten().find(|p| p.id == pid)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make `pid` the running process; the previous one goes back to ready
    pub fn set_running(&mut self, pid: Pid) -> Result<(), ProcessError> {
        if self.lookup(pid).is_none() {
            return Err(ProcessError::NoSuchProcess(pid));
        }
        if let Some(previous) = self.running {
            if let Some(process) = self.lookup_mut(previous) {
                process.state = ProcessState::Ready;
            }
        }
        if let Some(process) = self.lookup_mut(pid) {
            process.state = ProcessState::Running;
        }
        self.running = Some(pid);
        Ok(())
    }

    pub fn running_pid(&self) -> Option<Pid> {
        self.running
    }

    /// The context the memory manager should see right now
    pub fn running_mut(&mut self) -> Option<&mut Process<'a>> {
        let pid = self.running?;
        self.lookup_mut(pid)
    }

    /// Tear down `pid`'s address space and free its slot
    pub fn exit<M, D>(&mut self, pid: Pid, mm: &mut MemoryManager<'a, M, D>) -> Result<usize, ProcessError>
    where
        M: Mmu,
        D: BlockDevice,
    {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(p) if p.id == pid))
            .ok_or(ProcessError::NoSuchProcess(pid))?;

        let released = match slot.as_mut() {
            Some(process) => process.release_address_space(mm)?,
            None => 0,
        };
        *slot = None;
        if self.running == Some(pid) {
            self.running = None;
        }

        info!("process {} exited, {} pages released", pid, released);
        Ok(released)
    }
}

impl<'a> Default for ProcessTable<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagekern_mem::layout::PAGE_SIZE_U32;
    use pagekern_mem::sim::{MemDisk, SimulatedMachine};
    use pagekern_mem::{MemoryConfig, PageState};

    const MEMORY: u32 = 0x400000;

    fn boot<'a>(storage: &'a mut [u8], config: &MemoryConfig) -> MemoryManager<'a, SimulatedMachine, MemDisk> {
        let _ = env_logger::builder().is_test(true).try_init();
        MemoryManager::boot(MEMORY, config, storage, SimulatedMachine::new(MEMORY), MemDisk::new(1024)).unwrap()
    }

    #[test]
    fn test_spawn_assigns_increasing_pids() {
        let mut a = [0u8; 2];
        let mut b = [0u8; 2];
        let mut table = ProcessTable::new();
        assert!(table.is_empty());

        let first = table.spawn("init", &mut a).unwrap();
        let second = table.spawn("shell", &mut b).unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(table.len(), 2);

        let shell = table.lookup(second).unwrap();
        assert_eq!(shell.name, "shell");
        assert_eq!(shell.state, ProcessState::Ready);
        assert_eq!(shell.user_pool().page_count(), 16);
        assert_eq!(shell.user_pool().start_address(), USER_VIRTUAL_START + USER_REGION_SIZE);
        assert_eq!(table.lookup(first).unwrap().user_pool().start_address(), USER_VIRTUAL_START);
    }

    #[test]
    fn test_user_regions_are_disjoint() {
        assert_eq!(USER_REGION_SIZE % PAGE_SIZE_U32, 0);
        assert!(user_region_start(MAX_PROCESSES - 1) + USER_REGION_SIZE <= USER_VIRTUAL_END);

        // Even a pool with bits to spare stops at its region
        let mut storage = vec![0u8; USER_REGION_PAGES / 8 + 64];
        let process = Process::new(1, "big", user_region_start(0), &mut storage);
        assert_eq!(process.user_pool().page_count(), USER_REGION_PAGES);
        assert!(!process.user_pool().contains(user_region_start(1)));
    }

    #[test]
    fn test_exit_keeps_other_process_pages() {
        let mut mm_storage = [0u8; 128];
        let mut mm = boot(&mut mm_storage, &MemoryConfig::new());

        let mut a = [0u8; 1];
        let mut b = [0u8; 1];
        let mut c = [0u8; 1];
        let mut table = ProcessTable::new();
        let first = table.spawn("a", &mut a).unwrap();
        let second = table.spawn("b", &mut b).unwrap();

        let a_page = mm.allocate_pages(table.lookup_mut(first).unwrap(), Mode::User, 1).unwrap();
        let b_page = mm.allocate_pages(table.lookup_mut(second).unwrap(), Mode::User, 1).unwrap();
        assert_ne!(a_page, b_page);
        let b_frame = mm.vaddr_to_paddr(b_page).unwrap();

        assert_eq!(table.exit(first, &mut mm), Ok(1));
        assert_eq!(mm.page_state(a_page), PageState::Unmapped);
        assert_eq!(mm.page_state(b_page), PageState::Resident { frame: b_frame });
        assert_eq!(mm.stats().user_physical.used_pages, 1);

        // The freed slot hands its region to the next process
        let third = table.spawn("c", &mut c).unwrap();
        assert_eq!(table.lookup(third).unwrap().user_pool().start_address(), USER_VIRTUAL_START);
    }

    #[test]
    fn test_table_full() {
        let mut storage = [[0u8; 1]; MAX_PROCESSES + 1];
        let (workers, extra) = storage.split_at_mut(MAX_PROCESSES);
        let mut table = ProcessTable::new();
        for chunk in workers.iter_mut() {
            table.spawn("worker", chunk).unwrap();
        }
        assert_eq!(table.spawn("extra", &mut extra[0]), Err(ProcessError::TableFull));
        assert_eq!(table.len(), MAX_PROCESSES);
    }

    #[test]
    fn test_set_running_switches_state() {
        let mut a = [0u8; 1];
        let mut b = [0u8; 1];
        let mut table = ProcessTable::new();
        let first = table.spawn("a", &mut a).unwrap();
        let second = table.spawn("b", &mut b).unwrap();

        assert!(table.running_mut().is_none());
        assert_eq!(table.set_running(99), Err(ProcessError::NoSuchProcess(99)));

        table.set_running(first).unwrap();
        table.set_running(second).unwrap();
        assert_eq!(table.running_pid(), Some(second));
        assert_eq!(table.lookup(first).unwrap().state, ProcessState::Ready);
        assert_eq!(table.running_mut().unwrap().state, ProcessState::Running);
    }

    #[test]
    fn test_exit_returns_frames() {
        let mut mm_storage = [0u8; 128];
        let mut mm = boot(&mut mm_storage, &MemoryConfig::new());
        let free_before = mm.stats().user_physical.free_pages;

        let mut pool = [0u8; 1];
        let mut table = ProcessTable::new();
        let pid = table.spawn("app", &mut pool).unwrap();
        table.set_running(pid).unwrap();

        let process = table.running_mut().unwrap();
        let start = mm.allocate_pages(process, Mode::User, 3).unwrap();
        assert_eq!(start, USER_VIRTUAL_START);
        assert_eq!(mm.stats().user_physical.free_pages, free_before - 3);

        assert_eq!(table.exit(pid, &mut mm), Ok(3));
        assert_eq!(mm.stats().user_physical.free_pages, free_before);
        assert_eq!(mm.page_state(start), PageState::Unmapped);
        assert!(table.running_mut().is_none());
        assert_eq!(table.exit(pid, &mut mm), Err(ProcessError::NoSuchProcess(pid)));
    }

    #[test]
    fn test_exit_frees_swap_slots() {
        let mut mm_storage = [0u8; 128];
        let config = MemoryConfig::new().with_user_frame_limit(4);
        let mut mm = boot(&mut mm_storage, &config);

        let mut pool = [0u8; 1];
        let mut table = ProcessTable::new();
        let pid = table.spawn("hog", &mut pool).unwrap();
        table.set_running(pid).unwrap();

        // Six pages on four frames: the two oldest end up on disk
        let process = table.running_mut().unwrap();
        let start = mm.allocate_pages(process, Mode::User, 6).unwrap();
        assert!(matches!(mm.page_state(start), PageState::SwappedOut { .. }));
        assert!(matches!(mm.page_state(start + PAGE_SIZE_U32), PageState::SwappedOut { .. }));
        assert_eq!(mm.stats().free_swap_slots, 48);
        assert_eq!(mm.stats().user_physical.free_pages, 0);

        assert_eq!(table.exit(pid, &mut mm), Ok(6));
        assert_eq!(mm.stats().free_swap_slots, 50);
        assert_eq!(mm.stats().user_physical.free_pages, 4);
    }
}
