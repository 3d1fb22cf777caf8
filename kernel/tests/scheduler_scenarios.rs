//! Scheduler bookkeeping scenarios that don't require a live dispatch:
//! an output binding fanning out to every input bound to it, and an IRQ
//! fan-in waking every subscriber. Both [`lily_kernel::sched::finish`]
//! and the real dispatch path end in an `iretq` that never returns, so
//! these exercise the same fan-out/fan-in wiring one layer up, through
//! [`lily_kernel::sched::schedule`] and `pending_count` directly —
//! exactly the seam `pending_count`'s own doc comment calls out as the
//! way to check scheduling landed without running the dispatcher end
//! to end.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::vec::Vec;

use bootloader_api::info::MemoryRegionKind;
use bootloader_api::{entry_point, BootInfo};

use lily_kernel::automaton::{registry, ActionKind, Automaton, Caction, Paction, ParameterMode};
use lily_kernel::mm::vm;
use lily_kernel::mm::{FrameNumber, PhysicalAddress, VirtualAddress};
use lily_kernel::sched;
use lily_kernel::{arch, irq, exit_qemu, serial_println, test_panic_handler, QemuExitCode};

entry_point!(kernel_main);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    arch::init();
    let regions: Vec<(PhysicalAddress, PhysicalAddress)> = boot_info
        .memory_regions
        .iter()
        .filter(|r| r.kind == MemoryRegionKind::Usable)
        .map(|r| (PhysicalAddress::new(r.start), PhysicalAddress::new(r.end)))
        .collect();
    lily_kernel::mm::init(&regions);
    vm::bootstrap_first_directory().expect("failed to build the initial page directory");

    serial_println!("Running scheduler scenario tests...");

    scenario_output_binding_fans_out_to_inputs();
    scenario_irq_fan_in_wakes_every_subscriber();

    serial_println!("All scheduler scenarios passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_panic_handler(info)
}

fn make_automaton() -> lily_kernel::automaton::AutomatonId {
    registry().create(|id| Automaton::new(id, FrameNumber(0), false, VirtualAddress::new(0x8000_0000)))
}

fn paction(kind: ActionKind, entry: usize, name: &str) -> Paction {
    Paction::new(kind, ParameterMode::AutoIdentity, entry, 0, name, "")
}

/// One output bound to two separate automata's inputs schedules both of
/// them, each deduplicated against repeats, exactly as `finish_output`'s
/// fan-out would deliver to every bound input in turn.
fn scenario_output_binding_fans_out_to_inputs() {
    let producer = make_automaton();
    let consumer_a = make_automaton();
    let consumer_b = make_automaton();

    registry().with_mut(producer, |au| au.register_action(paction(ActionKind::Output, 0x1000, "tick"))).unwrap().unwrap();
    registry().with_mut(consumer_a, |au| au.register_action(paction(ActionKind::Input, 0x2000, "on_tick"))).unwrap().unwrap();
    registry().with_mut(consumer_b, |au| au.register_action(paction(ActionKind::Input, 0x2000, "on_tick"))).unwrap().unwrap();

    let out = registry().with(producer, |au| au.action_by_entry(0x1000).cloned()).flatten().unwrap();
    let in_a = registry().with(consumer_a, |au| au.action_by_entry(0x2000).cloned()).flatten().unwrap();
    let in_b = registry().with(consumer_b, |au| au.action_by_entry(0x2000).cloned()).flatten().unwrap();

    registry()
        .bind(producer, Caction::new(producer, out.clone(), 0), Caction::new(consumer_a, in_a.clone(), 0))
        .unwrap();
    registry()
        .bind(producer, Caction::new(producer, out.clone(), 0), Caction::new(consumer_b, in_b, 0))
        .unwrap();

    assert_eq!(sched::pending_count(producer), 0);
    assert_eq!(sched::pending_count(consumer_a), 0);
    assert_eq!(sched::pending_count(consumer_b), 0);

    let output_caction = Caction::new(producer, out, 0);
    let bound = registry().with(producer, |au| au.bound_outputs_for(&output_caction).to_vec()).unwrap();
    assert_eq!(bound.len(), 2, "the output must fan out to both bound inputs");

    for input in bound.iter().cloned() {
        sched::schedule(input);
    }
    assert_eq!(sched::pending_count(consumer_a), 1);
    assert_eq!(sched::pending_count(consumer_b), 1);

    // Redelivering the same fan-out must not double up either consumer's
    // queue; `schedule` dedups by (automaton, entry point, parameter).
    for input in bound {
        sched::schedule(input);
    }
    assert_eq!(sched::pending_count(consumer_a), 1);
    assert_eq!(sched::pending_count(consumer_b), 1);

    registry().destroy(producer).unwrap();
    registry().destroy(consumer_a).unwrap();
    registry().destroy(consumer_b).unwrap();

    serial_println!("[ok] output binding fans out to every bound input");
}

/// Firing an IRQ wakes every automaton subscribed to it, and firing it
/// again without the subscribers having consumed their pending work is
/// a no-op against each one's queue rather than a pile-up.
fn scenario_irq_fan_in_wakes_every_subscriber() {
    let listener_a = make_automaton();
    let listener_b = make_automaton();

    registry().with_mut(listener_a, |au| au.register_action(paction(ActionKind::SystemInput, 0x3000, "irq_a"))).unwrap().unwrap();
    registry().with_mut(listener_b, |au| au.register_action(paction(ActionKind::SystemInput, 0x3000, "irq_b"))).unwrap().unwrap();

    let sub_a = Caction::new(listener_a, registry().with(listener_a, |au| au.action_by_entry(0x3000).cloned()).flatten().unwrap(), 0);
    let sub_b = Caction::new(listener_b, registry().with(listener_b, |au| au.action_by_entry(0x3000).cloned()).flatten().unwrap(), 0);

    irq::subscribe(9, sub_a);
    irq::subscribe(9, sub_b);

    assert_eq!(sched::pending_count(listener_a), 0);
    assert_eq!(sched::pending_count(listener_b), 0);

    irq::fire_irq(9);
    assert_eq!(sched::pending_count(listener_a), 1);
    assert_eq!(sched::pending_count(listener_b), 1);

    // A second assertion of the same line with nothing drained yet must
    // dedup rather than queue a second identical system-input.
    irq::fire_irq(9);
    assert_eq!(sched::pending_count(listener_a), 1);
    assert_eq!(sched::pending_count(listener_b), 1);

    // An unrelated IRQ must not disturb either subscriber's queue.
    irq::fire_irq(10);
    assert_eq!(sched::pending_count(listener_a), 1);
    assert_eq!(sched::pending_count(listener_b), 1);

    registry().destroy(listener_a).unwrap();
    registry().destroy(listener_b).unwrap();

    serial_println!("[ok] IRQ fan-in wakes every subscriber");
}
