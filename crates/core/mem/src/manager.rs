//! Memory Manager
//!
//! Owns the kernel and user frame pools, the kernel virtual pool, the swap
//! area, the MMU and the swap disk. User virtual pools belong to execution
//! contexts and are passed in with every call that can touch them.
//!
//! Page fault handling:
//! - page not allocated in the faulting mode's pool: unresolved
//! - swapped-out page: read it back from swap
//! - unmapped page: bind a fresh frame
//! - resident page: stale translation, invalidate and return
//!
//! When a frame pool is empty, the owning virtual pool's oldest resident page
//! is swapped out and the allocation retried exactly once.

use log::{debug, info, warn};
use pagekern_driver_traits::BlockDevice;

use crate::context::{ExecutionContext, Mode};
use crate::error::{MemError, MemResult};
use crate::layout::{page_align_down, MemoryConfig, MemoryPlan, PAGE_SIZE_U32, RESERVED_MEMORY};
use crate::paging::{page_state, pde_address, pte_address, table_present, Mmu, PageState};
use crate::pool::{AddressPool, FramePool, PoolStats};
use crate::swap::SwapArea;

/// How a page fault was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// Fresh frame bound to an allocated page
    Mapped { frame: u32 },
    /// Page read back from swap into `frame`
    SwappedIn { frame: u32 },
    /// Page was already resident; its translation was flushed
    Spurious,
}

/// Snapshot of every pool the manager owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub kernel_physical: PoolStats,
    pub user_physical: PoolStats,
    pub kernel_virtual: PoolStats,
    pub swap_slots: usize,
    pub free_swap_slots: usize,
}

struct FramePools<'a> {
    kernel: FramePool<'a>,
    user: FramePool<'a>,
}

impl<'a> FramePools<'a> {
    fn for_mode(&mut self, mode: Mode) -> &mut FramePool<'a> {
        match mode {
            Mode::Kernel => &mut self.kernel,
            Mode::User => &mut self.user,
        }
    }

    /// Return `frame` to whichever pool it came from
    fn release(&mut self, frame: u32) -> MemResult<()> {
        if self.kernel.contains(frame) {
            self.kernel.release(frame, 1)
        } else if self.user.contains(frame) {
            self.user.release(frame, 1)
        } else {
            Err(MemError::NotAllocated { address: frame })
        }
    }

    /// Frame for a new page table; never evicts
    fn page_table(&mut self) -> MemResult<u32> {
        self.kernel.allocate(1).map_err(out_of_frames)
    }
}

fn out_of_frames(err: MemError) -> MemError {
    match err {
        MemError::PoolExhausted => MemError::FrameExhausted,
        other => other,
    }
}

pub struct MemoryManager<'a, M: Mmu, D: BlockDevice> {
    plan: MemoryPlan,
    frames: FramePools<'a>,
    kernel_virtual: AddressPool<'a>,
    swap: SwapArea<'a>,
    mmu: M,
    disk: D,
}

/// Disjoint borrows of the manager for one operation on one virtual pool
struct Pager<'p, 'a, M: Mmu, D: BlockDevice> {
    frames: &'p mut FramePools<'a>,
    swap: &'p mut SwapArea<'a>,
    mmu: &'p mut M,
    disk: &'p mut D,
}

impl<'p, 'a, M: Mmu, D: BlockDevice> Pager<'p, 'a, M, D> {
    /// Point `vaddr` at `frame`, creating the page table on first use
    fn connect(&mut self, vaddr: u32, frame: u32) -> MemResult<()> {
        if !table_present(&*self.mmu, vaddr) {
            let table = self.frames.page_table()?;
            self.mmu
                .write_word(pde_address(vaddr), PageState::Resident { frame: table }.encode());

            let window = page_align_down(pte_address(vaddr));
            self.mmu.invalidate(window);
            self.mmu.page_mut(window).fill(0);
            debug!("page table {:#x} covers {:#x}", table, vaddr & 0xFFC0_0000);
        }

        self.mmu
            .write_word(pte_address(vaddr), PageState::Resident { frame }.encode());
        self.mmu.invalidate(vaddr);
        debug!("mapped {:#x} -> {:#x}", vaddr, frame);
        Ok(())
    }

    /// A free frame for `mode`, evicting one page of `virt` if needed
    fn acquire_frame(&mut self, virt: &mut AddressPool<'a>, mode: Mode) -> MemResult<u32> {
        match self.frames.for_mode(mode).allocate(1) {
            Err(MemError::PoolExhausted) => {}
            result => return result,
        }

        let mmu = &*self.mmu;
        let victim = virt
            .select_victim_where(|page| matches!(page_state(mmu, page), PageState::Resident { .. }))
            .ok_or(MemError::FrameExhausted)?;

        self.swap_out(virt, victim)?;
        self.frames.for_mode(mode).allocate(1).map_err(out_of_frames)
    }

    /// Acquire a frame and map it at `vaddr`
    fn bind(&mut self, virt: &mut AddressPool<'a>, mode: Mode, vaddr: u32) -> MemResult<u32> {
        let frame = self.acquire_frame(virt, mode)?;
        if let Err(err) = self.connect(vaddr, frame) {
            self.frames.release(frame)?;
            return Err(err);
        }
        Ok(frame)
    }

    /// Drop whatever backs `vaddr` and clear its entry
    fn unbind(&mut self, vaddr: u32) -> MemResult<()> {
        if table_present(&*self.mmu, vaddr) {
            match page_state(&*self.mmu, vaddr) {
                PageState::Resident { frame } => self.frames.release(frame)?,
                PageState::SwappedOut { slot } => self.swap.release_slot(slot)?,
                PageState::Unmapped => {}
            }
            self.mmu.write_word(pte_address(vaddr), 0);
        }
        self.mmu.invalidate(vaddr);
        Ok(())
    }

    fn swap_out(&mut self, virt: &mut AddressPool<'a>, vaddr: u32) -> MemResult<usize> {
        let frame = match page_state(&*self.mmu, vaddr) {
            PageState::Resident { frame } => frame,
            _ => return Err(MemError::NotResident { address: vaddr }),
        };

        let slot = self.swap.allocate_slot().map_err(|err| {
            warn!("swap: no free slot for {:#x}", vaddr);
            err
        })?;

        let failed = self.swap.write_page(&mut *self.disk, slot, self.mmu.page_mut(vaddr));
        if failed > 0 {
            warn!("swap: {} sectors of {:#x} lost on the way out", failed, vaddr);
        }

        self.frames.release(frame)?;
        virt.untrack(vaddr);
        self.mmu
            .write_word(pte_address(vaddr), PageState::SwappedOut { slot }.encode());
        self.mmu.invalidate(vaddr);

        info!("swap: {:#x} (frame {:#x}) -> slot {}", vaddr, frame, slot);
        Ok(slot)
    }

    fn swap_in(&mut self, virt: &mut AddressPool<'a>, mode: Mode, vaddr: u32) -> MemResult<u32> {
        let slot = match page_state(&*self.mmu, vaddr) {
            PageState::SwappedOut { slot } => slot,
            _ => return Err(MemError::NotSwapped { address: vaddr }),
        };

        let frame = self.bind(virt, mode, vaddr)?;

        let failed = self.swap.read_page(&mut *self.disk, slot, self.mmu.page_mut(vaddr));
        if failed > 0 {
            warn!("swap: {} sectors of {:#x} lost on the way in", failed, vaddr);
        }

        self.swap.release_slot(slot)?;
        virt.track(vaddr)?;
        self.mmu.invalidate(vaddr);

        info!("swap: slot {} -> {:#x} (frame {:#x})", slot, vaddr, frame);
        Ok(frame)
    }
}

impl<'a, M: Mmu, D: BlockDevice> MemoryManager<'a, M, D> {
    /// Carve `storage` into the four bitmaps the plan needs and set up the pools
    pub fn new(plan: MemoryPlan, storage: &'a mut [u8], mmu: M, disk: D) -> MemResult<Self> {
        let required = plan.bitmap_bytes();
        if storage.len() < required {
            return Err(MemError::BitmapStorageTooSmall {
                required,
                provided: storage.len(),
            });
        }

        let [kernel_bytes, user_bytes, virtual_bytes, swap_bytes] = plan.bitmap_sizes();
        let (kernel_bits, rest) = storage.split_at_mut(kernel_bytes);
        let (user_bits, rest) = rest.split_at_mut(user_bytes);
        let (virtual_bits, rest) = rest.split_at_mut(virtual_bytes);
        let (swap_bits, _) = rest.split_at_mut(swap_bytes);

        Ok(MemoryManager {
            plan,
            frames: FramePools {
                kernel: FramePool::new(kernel_bits, plan.kernel_pages, plan.kernel_physical_start),
                user: FramePool::new(user_bits, plan.user_pages, plan.user_physical_start),
            },
            kernel_virtual: AddressPool::new(virtual_bits, plan.kernel_virtual_pages, plan.kernel_virtual_start),
            swap: SwapArea::new(swap_bits, plan.swap_slots, plan.swap_base_sector),
            mmu,
            disk,
        })
    }

    /// Plan the pools for `total_memory`, build the manager and log the layout
    pub fn boot(
        total_memory: u32,
        config: &MemoryConfig,
        storage: &'a mut [u8],
        mmu: M,
        disk: D,
    ) -> MemResult<Self> {
        let plan = MemoryPlan::new(total_memory, config)?;
        let manager = Self::new(plan, storage, mmu, disk)?;

        info!(
            "memory: {} KB installed, {} KB reserved",
            total_memory / 1024,
            RESERVED_MEMORY / 1024
        );
        for (name, pool) in [
            ("kernel physical", manager.frames.kernel.stats()),
            ("user physical", manager.frames.user.stats()),
            ("kernel virtual", manager.kernel_virtual.stats()),
        ] {
            info!(
                "{}: {} pages at {:#x} ({} KB)",
                name,
                pool.total_pages,
                pool.start_addr,
                pool.total_pages * 4
            );
        }
        info!(
            "swap: {} slots from sector {}",
            plan.swap_slots, plan.swap_base_sector
        );

        Ok(manager)
    }

    pub fn plan(&self) -> &MemoryPlan {
        &self.plan
    }

    pub fn mmu(&self) -> &M {
        &self.mmu
    }

    pub fn mmu_mut(&mut self) -> &mut M {
        &mut self.mmu
    }

    pub fn disk(&self) -> &D {
        &self.disk
    }

    pub fn disk_mut(&mut self) -> &mut D {
        &mut self.disk
    }

    pub fn kernel_virtual(&self) -> &AddressPool<'a> {
        &self.kernel_virtual
    }

    pub fn swap_area(&self) -> &SwapArea<'a> {
        &self.swap
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            kernel_physical: self.frames.kernel.stats(),
            user_physical: self.frames.user.stats(),
            kernel_virtual: self.kernel_virtual.stats(),
            swap_slots: self.swap.slot_count(),
            free_swap_slots: self.swap.free_slots(),
        }
    }

    /// The virtual pool owning `mode`'s pages, plus the rest of the manager
    fn parts<'p, C>(
        &'p mut self,
        ctx: &'p mut C,
        mode: Mode,
    ) -> MemResult<(&'p mut AddressPool<'a>, Pager<'p, 'a, M, D>)>
    where
        C: ExecutionContext<'a> + ?Sized,
    {
        let virt = match mode {
            Mode::Kernel => &mut self.kernel_virtual,
            Mode::User => ctx.user_virtual().ok_or(MemError::NoUserSpace)?,
        };
        let pager = Pager {
            frames: &mut self.frames,
            swap: &mut self.swap,
            mmu: &mut self.mmu,
            disk: &mut self.disk,
        };
        Ok((virt, pager))
    }

    // =========================================================================
    // Page primitives
    // =========================================================================

    /// Contiguous frames from `mode`'s physical pool (no eviction)
    pub fn allocate_physical_pages(&mut self, mode: Mode, count: usize) -> MemResult<u32> {
        self.frames.for_mode(mode).allocate(count)
    }

    pub fn release_physical_pages(&mut self, mode: Mode, paddr: u32, count: usize) -> MemResult<()> {
        self.frames.for_mode(mode).release(paddr, count)
    }

    /// Reserve a virtual run without binding any frame
    ///
    /// The pages are untracked until their first fault binds them.
    pub fn allocate_virtual_pages<C>(&mut self, ctx: &mut C, mode: Mode, count: usize) -> MemResult<u32>
    where
        C: ExecutionContext<'a> + ?Sized,
    {
        let (virt, _) = self.parts(ctx, mode)?;
        virt.reserve(count)
    }

    /// Return a virtual run; its pages must already be unbound
    pub fn release_virtual_pages<C>(
        &mut self,
        ctx: &mut C,
        mode: Mode,
        vaddr: u32,
        count: usize,
    ) -> MemResult<()>
    where
        C: ExecutionContext<'a> + ?Sized,
    {
        let (virt, _) = self.parts(ctx, mode)?;
        virt.release(vaddr, count)
    }

    /// Map `vaddr` to `paddr` in the active directory
    pub fn connect(&mut self, vaddr: u32, paddr: u32) -> MemResult<()> {
        let mut pager = Pager {
            frames: &mut self.frames,
            swap: &mut self.swap,
            mmu: &mut self.mmu,
            disk: &mut self.disk,
        };
        pager.connect(vaddr, paddr)
    }

    pub fn page_state(&self, vaddr: u32) -> PageState {
        page_state(&self.mmu, vaddr)
    }

    /// Physical address behind `vaddr`, if its page is resident
    pub fn vaddr_to_paddr(&self, vaddr: u32) -> Option<u32> {
        match self.page_state(vaddr) {
            PageState::Resident { frame } => Some(frame | (vaddr & (PAGE_SIZE_U32 - 1))),
            _ => None,
        }
    }

    // =========================================================================
    // Multi-page requests
    // =========================================================================

    /// Reserve `count` virtual pages and bind a frame to each
    ///
    /// A page that cannot get a frame is left unmapped and untracked; it is
    /// bound on its first fault. Only a full eviction table aborts the call.
    pub fn allocate_pages<C>(&mut self, ctx: &mut C, mode: Mode, count: usize) -> MemResult<u32>
    where
        C: ExecutionContext<'a> + ?Sized,
    {
        let (virt, mut pager) = self.parts(ctx, mode)?;
        let start = virt.allocate(count)?;

        for i in 0..count {
            let page = start + (i as u32) * PAGE_SIZE_U32;
            match pager.bind(virt, mode, page) {
                Ok(_) => {}
                Err(MemError::TrackingExhausted) => return Err(MemError::TrackingExhausted),
                Err(err) => {
                    virt.untrack(page);
                    warn!("page {:#x} left unbound: {}", page, err);
                }
            }
        }

        debug!("allocated {} pages at {:#x} ({:?})", count, start, mode);
        Ok(start)
    }

    /// Unbind and release `count` pages starting at `vaddr`
    ///
    /// Frames and swap slots go back to their pools. Nothing changes if any
    /// page in the range is not allocated.
    pub fn release_pages<C>(&mut self, ctx: &mut C, mode: Mode, vaddr: u32, count: usize) -> MemResult<()>
    where
        C: ExecutionContext<'a> + ?Sized,
    {
        let (virt, mut pager) = self.parts(ctx, mode)?;

        for i in 0..count {
            let page = vaddr + (i as u32) * PAGE_SIZE_U32;
            if !virt.is_allocated(page) {
                return Err(MemError::NotAllocated { address: page });
            }
        }

        for i in 0..count {
            pager.unbind(vaddr + (i as u32) * PAGE_SIZE_U32)?;
        }
        virt.release(vaddr, count)
    }

    // =========================================================================
    // Faults and swapping
    // =========================================================================

    /// Resolve a page fault at `addr` raised in `mode`
    ///
    /// An `Err` means the fault is unresolved; fatal errors must stop the system.
    pub fn handle_page_fault<C>(&mut self, ctx: &mut C, addr: u32, mode: Mode) -> MemResult<FaultResolution>
    where
        C: ExecutionContext<'a> + ?Sized,
    {
        let page = page_align_down(addr);
        let (virt, mut pager) = self.parts(ctx, mode)?;
        debug!("page fault at {:#x} ({:?})", addr, mode);

        // Only pages of the faulting mode's own pool can be resolved
        if !virt.is_allocated(page) {
            return Err(MemError::InvalidAddress { address: addr });
        }

        match page_state(&*pager.mmu, page) {
            PageState::SwappedOut { .. } => {
                let frame = pager.swap_in(virt, mode, page)?;
                Ok(FaultResolution::SwappedIn { frame })
            }
            PageState::Resident { .. } => {
                pager.mmu.invalidate(page);
                Ok(FaultResolution::Spurious)
            }
            PageState::Unmapped => {
                virt.track(page)?;
                match pager.bind(virt, mode, page) {
                    Ok(frame) => Ok(FaultResolution::Mapped { frame }),
                    Err(err) => {
                        virt.untrack(page);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Write the resident page at `vaddr` to a free swap slot and free its frame
    pub fn swap_out<C>(&mut self, ctx: &mut C, vaddr: u32, mode: Mode) -> MemResult<usize>
    where
        C: ExecutionContext<'a> + ?Sized,
    {
        let (virt, mut pager) = self.parts(ctx, mode)?;
        pager.swap_out(virt, page_align_down(vaddr))
    }

    /// Bring the swapped-out page at `vaddr` back into a frame
    pub fn swap_in<C>(&mut self, ctx: &mut C, vaddr: u32, mode: Mode) -> MemResult<u32>
    where
        C: ExecutionContext<'a> + ?Sized,
    {
        let (virt, mut pager) = self.parts(ctx, mode)?;
        pager.swap_in(virt, mode, page_align_down(vaddr))
    }

    /// Timer tick: sample access bits of the kernel pool and the running context's pool
    pub fn tick<C>(&mut self, ctx: &mut C)
    where
        C: ExecutionContext<'a> + ?Sized,
    {
        self.kernel_virtual.sample_accessed(&mut self.mmu);
        if let Some(pool) = ctx.user_virtual() {
            pool.sample_accessed(&mut self.mmu);
        }
    }
}
