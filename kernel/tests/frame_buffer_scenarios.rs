//! Bare-metal scenarios over live paging: frame sharing and
//! copy-on-write resolution, heap growth via `sbrk`, and releasing the
//! frames held by a mapped buffer when its owning automaton is
//! destroyed. Each needs a real directory loaded into `cr3`, so these
//! run under QEMU rather than as host unit tests.

#![no_std]
#![no_main]

extern crate alloc;

use bootloader_api::info::MemoryRegionKind;
use bootloader_api::{entry_point, BootInfo};

use lily_kernel::automaton::{registry, AreaKind, Automaton, VmArea};
use lily_kernel::error::KernelError;
use lily_kernel::mm::vm::{self, MapMode, PageFaultErrorCode, Privilege, KERNEL_SPLIT_DI};
use lily_kernel::mm::{frame, PhysicalAddress, VirtualAddress};
use lily_kernel::{arch, exit_qemu, serial_println, test_panic_handler, QemuExitCode};

entry_point!(kernel_main);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    arch::init();
    let regions: alloc::vec::Vec<(PhysicalAddress, PhysicalAddress)> = boot_info
        .memory_regions
        .iter()
        .filter(|r| r.kind == MemoryRegionKind::Usable)
        .map(|r| (PhysicalAddress::new(r.start), PhysicalAddress::new(r.end)))
        .collect();
    lily_kernel::mm::init(&regions);
    vm::bootstrap_first_directory().expect("failed to build the initial page directory");

    serial_println!("Running frame/buffer scenario tests...");

    scenario_frame_share_and_cow();
    scenario_sbrk_growth();
    scenario_destroy_with_mapped_buffers();

    serial_println!("All frame/buffer scenarios passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_panic_handler(info)
}

fn kernel_range_start() -> usize {
    KERNEL_SPLIT_DI << 22
}

/// Two automata map the same frame read-only/copy-on-write; a write
/// fault in one promotes it to a private copy while the other keeps the
/// original, and the refcounts end up split 1/1.
fn scenario_frame_share_and_cow() {
    let dir_a = vm::new_directory(kernel_range_start()).unwrap();
    let dir_b = vm::new_directory(kernel_range_start()).unwrap();

    let shared = frame::manager().alloc().unwrap();
    let va = VirtualAddress::new(0x1000_0000);

    vm::switch_to_directory(dir_a);
    vm::map(va, shared, Privilege::User, MapMode::CopyOnWrite, false, true).unwrap();

    vm::switch_to_directory(dir_b);
    vm::map(va, shared, Privilege::User, MapMode::CopyOnWrite, false, false).unwrap();

    assert_eq!(frame::manager().refcount(shared), Some(2));

    vm::switch_to_directory(dir_a);
    let write_fault = PageFaultErrorCode(0b11);
    let resolved = vm::resolve_cow_fault(va, write_fault).unwrap();
    assert!(resolved, "write fault against a COW page must resolve");

    let promoted = vm::entry(va).unwrap();
    assert!(promoted.writable());
    assert!(!promoted.copy_on_write());
    assert_ne!(promoted.frame(), shared, "a shared frame must not be promoted in place");

    assert_eq!(frame::manager().refcount(shared), Some(1), "B still holds the original frame");
    assert_eq!(frame::manager().refcount(promoted.frame()), Some(1), "A's new frame is private");

    serial_println!("[ok] frame share + COW");
}

/// `sbrk` grows the heap area up to the next area's start and rejects a
/// request that would cross it, leaving the break unchanged.
fn scenario_sbrk_growth() {
    let dir = vm::new_directory(kernel_range_start()).unwrap();
    vm::switch_to_directory(dir);

    let id = registry().create(|id| Automaton::new(id, dir, false, VirtualAddress::new(0x8000_0000)));

    registry()
        .with_mut(id, |au| {
            au.insert_vm_area(VmArea::new(
                AreaKind::Heap,
                VirtualAddress::new(0x1000),
                VirtualAddress::new(0x3000),
                Privilege::User,
            ))
            .unwrap();
            au.insert_vm_area(VmArea::new(
                AreaKind::Reserved,
                VirtualAddress::new(0x5000),
                VirtualAddress::new(0x6000),
                Privilege::User,
            ))
            .unwrap();
        })
        .unwrap();

    let grown = registry().with_mut(id, |au| au.sbrk(0x1000)).unwrap();
    assert_eq!(grown, Ok(0x3000));
    let end_after_grow = registry()
        .with(id, |au| au.area_covering(VirtualAddress::new(0x2000)).unwrap().end)
        .unwrap();
    assert_eq!(end_after_grow, VirtualAddress::new(0x4000));

    let too_far = registry().with_mut(id, |au| au.sbrk(0x2000)).unwrap();
    assert!(matches!(too_far, Err(KernelError::SbrkNoRoom)));
    let end_unchanged = registry()
        .with(id, |au| au.area_covering(VirtualAddress::new(0x2000)).unwrap().end)
        .unwrap();
    assert_eq!(end_unchanged, VirtualAddress::new(0x4000), "a rejected sbrk must not move the break");

    registry().destroy(id).unwrap();
    serial_println!("[ok] sbrk growth");
}

fn heap_and_stack(begin_heap: u64, begin_stack: u64) -> (VmArea, VmArea) {
    (
        VmArea::new(AreaKind::Heap, VirtualAddress::new(begin_heap), VirtualAddress::new(begin_heap + 0x1000), Privilege::User),
        VmArea::new(AreaKind::Stack, VirtualAddress::new(begin_stack), VirtualAddress::new(begin_stack + 0x1000), Privilege::User),
    )
}

/// Destroying an automaton that holds mapped buffers releases every
/// frame those buffers reference. The frames here alias the shared
/// zero page, which both automata separately reference through their
/// own buffers — the same sharing pattern a frame explicitly handed
/// between automata would exhibit: destroying the borrower drops the
/// count back to what the lender alone holds, and only the lender's own
/// destruction frees it for good.
fn scenario_destroy_with_mapped_buffers() {
    let dir_p = vm::new_directory(kernel_range_start()).unwrap();
    let dir_q = vm::new_directory(kernel_range_start()).unwrap();

    vm::switch_to_directory(dir_p);
    let p = registry().create(|id| Automaton::new(id, dir_p, false, VirtualAddress::new(0x8000_0000)));
    let (heap, stack) = heap_and_stack(0x1000, 0x9000);
    registry()
        .with_mut(p, |au| {
            au.insert_vm_area(heap).unwrap();
            au.insert_vm_area(stack).unwrap();
        })
        .unwrap();
    let p_buffer = registry().with_mut(p, |au| au.buffer_create(1)).unwrap().unwrap();
    registry().with_mut(p, |au| au.buffer_map(p_buffer)).unwrap().unwrap();

    let zero = frame::manager().zero_frame();
    let base = frame::manager().refcount(zero).unwrap();

    vm::switch_to_directory(dir_q);
    let q = registry().create(|id| Automaton::new(id, dir_q, false, VirtualAddress::new(0x8000_0000)));
    let (heap, stack) = heap_and_stack(0x1000, 0x9000);
    registry()
        .with_mut(q, |au| {
            au.insert_vm_area(heap).unwrap();
            au.insert_vm_area(stack).unwrap();
        })
        .unwrap();

    let private_buffer = registry().with_mut(q, |au| au.buffer_create(2)).unwrap().unwrap();
    registry().with_mut(q, |au| au.buffer_map(private_buffer)).unwrap().unwrap();

    let shared_buffer = registry().with_mut(q, |au| au.buffer_create(1)).unwrap().unwrap();
    registry().with_mut(q, |au| au.buffer_map(shared_buffer)).unwrap().unwrap();

    assert_eq!(
        frame::manager().refcount(zero),
        Some(base + 3),
        "Q's two buffers hold 2 + 1 = 3 fresh references onto the shared zero frame"
    );

    registry().destroy(q).unwrap();

    assert_eq!(
        frame::manager().refcount(zero),
        Some(base),
        "destroying Q must release every reference its buffers held, back to P's baseline"
    );
    assert!(!registry().exists(q));

    vm::switch_to_directory(dir_p);
    registry().destroy(p).unwrap();
    assert_eq!(
        frame::manager().refcount(zero),
        Some(base - 1),
        "destroying P releases its own buffer's reference too"
    );

    serial_println!("[ok] destroy automaton with mapped buffers");
}
