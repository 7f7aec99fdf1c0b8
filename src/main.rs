//! pagekern bare-metal entry
//!
//! The boot loader enables paging with the directory self-mapped at slot
//! 1023, stores the probed memory size at `MEMORY_SIZE_ADDRESS` and jumps to
//! [`kernel_main`]. The IRQ0 and #PF stubs call into `pagekern_arch`.

#![no_std]
#![no_main]

use core::panic::PanicInfo;
use core::ptr::addr_of_mut;

use log::{error, info, LevelFilter};
use pagekern::Kernel;
use pagekern_arch::{cpu, interrupts, logger};
use pagekern_driver_ata::AtaPioDriver;
use pagekern_driver_traits::Driver;
use pagekern_mem::layout::{decode_memory_size, MEMORY_SIZE_ADDRESS};
use pagekern_mem::{MemoryConfig, MemoryManager, Mode, SelfMappedMmu};

type BootKernel = Kernel<'static, SelfMappedMmu, AtaPioDriver>;

/// Bitmap storage for the pools: enough for 4 GiB of memory
const POOL_BITMAP_BYTES: usize = 3 * 0x10000 + 64;

/// The first process gets 8 MiB of user address space
const INIT_POOL_BYTES: usize = 256;

/// Pages the first process grabs at boot
const INIT_TEST_PAGES: usize = 4;

static mut POOL_BITMAPS: [u8; POOL_BITMAP_BYTES] = [0; POOL_BITMAP_BYTES];
static mut INIT_POOL: [u8; INIT_POOL_BYTES] = [0; INIT_POOL_BYTES];
static mut KERNEL: Option<BootKernel> = None;

#[cfg(feature = "debug-mem")]
const LOG_LEVEL: LevelFilter = LevelFilter::Trace;
#[cfg(not(feature = "debug-mem"))]
const LOG_LEVEL: LevelFilter = LevelFilter::Info;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    error!("panic: {}", info);
    cpu::halt_forever()
}

#[no_mangle]
pub extern "C" fn kernel_main() -> ! {
    let _ = logger::init(LOG_LEVEL);
    info!("pagekern starting");

    let total_memory = decode_memory_size(unsafe { cpu::read_memory_size_word(MEMORY_SIZE_ADDRESS) });

    let mut disk = AtaPioDriver::primary();
    if let Err(err) = disk.init().and_then(|_| disk.start()) {
        error!("swap disk unavailable: {}", err);
        cpu::halt_forever();
    }

    // Four user frames, so init swaps as soon as it outgrows them
    let config = MemoryConfig::new().with_user_frame_limit(INIT_TEST_PAGES);
    let storage = unsafe { &mut *addr_of_mut!(POOL_BITMAPS) };
    let mmu = unsafe { SelfMappedMmu::new() };
    let memory = match MemoryManager::boot(total_memory, &config, storage, mmu, disk) {
        Ok(memory) => memory,
        Err(err) => {
            error!("memory manager: {}", err);
            cpu::halt_forever();
        }
    };

    let kernel: &'static mut BootKernel = unsafe { (*addr_of_mut!(KERNEL)).insert(Kernel::new(memory)) };
    run_init(kernel);

    if !interrupts::register(kernel) {
        error!("interrupt hooks already installed");
        cpu::halt_forever();
    }
    cpu::enable_interrupts();
    info!("pagekern running");

    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}

/// Start the first process and touch a few of its pages
fn run_init(kernel: &mut BootKernel) {
    let pool = unsafe { &mut *addr_of_mut!(INIT_POOL) };
    if let Err(err) = kernel.spawn("init", pool) {
        error!("init: {}", err);
        return;
    }

    let mut last = None;
    for _ in 0..INIT_TEST_PAGES {
        match kernel.allocate_pages(Mode::User, 1) {
            Ok(page) => last = Some(page),
            Err(err) => error!("init: allocate_pages: {}", err),
        }
    }

    if let Some(page) = last {
        let memory = kernel.memory();
        info!("init: last page {:#x} is {:?}", page, memory.page_state(page));
        match memory.vaddr_to_paddr(page) {
            Some(paddr) => info!("init: {:#x} -> {:#x}", page, paddr),
            None => info!("init: {:#x} binds on first touch", page),
        }
        let stats = memory.stats();
        info!(
            "init: {} of {} user frames free, {} swap slots free",
            stats.user_physical.free_pages, stats.user_physical.total_pages, stats.free_swap_slots
        );
    }
}
