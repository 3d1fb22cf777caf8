//! Kernel boot sequence: bring up the architecture, memory management,
//! and the core subsystems in the dependency order `SPEC_FULL.md` §2
//! lays out (frame manager → virtual memory → scheduler), then hand
//! control to the scheduler's main loop.
//!
//! Boot loading, multiboot, and the ELF loader are out of scope (§1) — by
//! the time `run` is called, `bootloader_api` has already placed the
//! kernel in long mode with a memory map and an identity-mapped view of
//! physical memory. There is no user-space automaton to launch from here
//! either, since the loader that would create one is out of scope; `run`
//! brings the kernel up to the point where automata can be created (by
//! later syscalls from whatever does get to run) and idles.

extern crate alloc;

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use bootloader_api::BootInfo;

use crate::mm::PhysicalAddress;
use crate::{arch, irq, log_service, mm, sched};

/// Bring up every kernel subsystem and enter the scheduler. Never
/// returns.
pub fn run(boot_info: &'static mut BootInfo) -> ! {
    arch::init();

    let regions = usable_regions(&boot_info.memory_regions);
    mm::init(&regions);

    mm::vm::bootstrap_first_directory().expect("failed to build the initial page directory");

    log_service::log_init();
    irq::init();
    sched::init();

    crate::println!("[BOOTSTRAP] Lily kernel ready, entering scheduler");
    sched::run();
}

/// Physical address ranges the bootloader reports as ordinary, usable
/// RAM. Bootloader, kernel, and reserved/MMIO regions are excluded —
/// the frame manager must never hand those back out as free frames.
fn usable_regions(regions: &MemoryRegions) -> alloc::vec::Vec<(PhysicalAddress, PhysicalAddress)> {
    regions
        .iter()
        .filter(|r| r.kind == MemoryRegionKind::Usable)
        .map(|r| (PhysicalAddress::new(r.start), PhysicalAddress::new(r.end)))
        .collect()
}
