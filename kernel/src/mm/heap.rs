//! Kernel heap allocator.
//!
//! The distilled spec treats the heap allocator's internals as an
//! ambient concern (`SPEC_FULL.md` §1/§2) — Lily needs one, but it isn't
//! part of the frame/vm/buffer/automaton/scheduler core. A first-fit
//! free-list allocator over a static backing array is enough; there is
//! no per-CPU cache to build since the kernel never runs on more than
//! one.

/// Backing storage for the kernel heap. Static rather than a frame range
/// mapped through `mm::vm` because the allocator has to be usable before
/// any address space exists to map it into.
#[cfg(target_os = "none")]
static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

/// Kernel heap size.
pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Bring up the kernel heap allocator. No-op on host builds, which back
/// `alloc` with `std::alloc::System` instead.
#[cfg(target_os = "none")]
pub fn init() {
    crate::println!("[HEAP] initializing {} KiB kernel heap", HEAP_SIZE / 1024);

    // SAFETY: `HEAP_MEMORY` is a private static only ever touched here,
    // and this runs once during boot before any allocation is attempted.
    unsafe {
        let start = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
        crate::ALLOCATOR.lock().init(start, HEAP_SIZE);
    }
}

#[cfg(not(target_os = "none"))]
pub fn init() {}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::{boxed::Box, vec::Vec};

    #[test]
    fn heap_allocation_works() {
        let x = Box::new(42);
        assert_eq!(*x, 42);

        let mut v = Vec::new();
        for i in 0..100 {
            v.push(i);
        }
        assert_eq!(v.len(), 100);
    }
}
