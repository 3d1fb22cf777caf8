//! Lily kernel library.
//!
//! Lily is an x86_64 microkernel whose only abstraction is the
//! I/O-automaton: an isolated address space that reacts to bound actions.
//! This crate hosts that model end to end — the automaton/action/registry
//! core, the self-mapped two-level paging scheme and copy-on-write frame
//! sharing in `mm`, the page-granular buffer objects built on top of it,
//! the single-CPU cooperative scheduler, and the x86_64 arch glue
//! (GDT/IDT/PIC/traps) that drives it all from hardware.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
// naked_functions is stable since Rust 1.88.0, no feature flag needed
// Custom test runner only for bare-metal; host target uses standard #[test] harness.
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// On bare metal, back `alloc` with a free-list allocator over a static
// heap (see `mm::heap`). On host, delegate to the system allocator so
// that unit tests using Vec/String/alloc compile and run under `cargo
// test`.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
pub(crate) static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;
pub mod serial;

mod intrinsics;

pub mod arch;
pub mod automaton;
pub mod bootstrap;
pub mod error;
pub mod irq;
pub mod log_service;
pub mod mm;
pub mod raii;
pub mod sched;
pub mod sync;
pub mod trap;

mod test_framework;

// Re-exported for tests and the bare-metal integration suite under
// `tests/`.
pub use automaton::AutomatonId;
pub use mm::{FrameNumber, PhysicalAddress, VirtualAddress, FRAME_SIZE};
#[cfg(test)]
pub use test_framework::test_runner;
pub use test_framework::{
    cycles_to_ns, exit_qemu, read_timestamp, test_panic_handler, BenchmarkRunner, QemuExitCode,
    Testable,
};

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler.
///
/// Panic is intentional: heap allocation failure in a no_std kernel is
/// unrecoverable. The alloc_error_handler ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("Allocation error: {:?}", layout);
}
