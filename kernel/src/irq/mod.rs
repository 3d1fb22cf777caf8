//! IRQ fan-in: the sole source of system-input actions (`SPEC_FULL.md`
//! §4.6). A hardware interrupt has no automaton of its own to address —
//! it wakes every caction subscribed to that IRQ by schedule, exactly as
//! an output wakes its bound inputs, except the "output" here is the PIC
//! rather than another automaton's `finish`.
//!
//! The raw 8259 masking/EOI port sequences reuse the same ports the
//! inline PIC remap in [`crate::arch::x86_64`]'s `init()` programs —
//! only the subscribe/fire glue belongs to this module; PIC programming
//! itself is the ambient mechanism §1 already treats as out of scope.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use spin::Mutex;

use crate::automaton::Caction;
use crate::sync::once_lock::GlobalState;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;
const EOI: u8 = 0x20;

struct IrqManager {
    subscribers: BTreeMap<u32, Vec<Caction>>,
}

impl IrqManager {
    const fn new() -> Self {
        Self {
            subscribers: BTreeMap::new(),
        }
    }

    fn subscribe(&mut self, irq: u32, caction: Caction) {
        self.subscribers.entry(irq).or_default().push(caction);
    }

    /// Subscribers in subscription order, matching the bound-inputs
    /// iteration order a regular output fan-out uses.
    fn subscribers(&self, irq: u32) -> Vec<Caction> {
        self.subscribers.get(&irq).cloned().unwrap_or_default()
    }
}

static IRQ_MANAGER: GlobalState<Mutex<IrqManager>> = GlobalState::new();

pub fn init() {
    let _ = IRQ_MANAGER.init(Mutex::new(IrqManager::new()));
    crate::println!("[IRQ] IRQ manager initialized");
}

/// Register `caction` to be scheduled every time `irq` fires. Called
/// while the boot sequence establishes its initial bindings, the same
/// way an output's bound inputs are wired up out of band.
pub fn subscribe(irq: u32, caction: Caction) {
    IRQ_MANAGER.with(|m| m.lock().subscribe(irq, caction));
}

/// Schedule every caction subscribed to `irq`. Called from the IRQ
/// handlers in [`crate::arch::x86_64::idt`] before they acknowledge the
/// interrupt.
pub fn fire_irq(irq: u32) {
    let Some(subscribers) = IRQ_MANAGER.with(|m| m.lock().subscribers(irq)) else {
        return;
    };
    for caction in subscribers {
        crate::sched::schedule(caction);
    }
}

/// Unmask `irq` at the PIC so it can reach the CPU at all. Boot leaves
/// every line masked; an automaton binding a system-input action to it
/// is what demands the corresponding line be opened.
pub fn unmask(irq: u32) {
    set_mask_bit(irq, false);
}

pub fn mask(irq: u32) {
    set_mask_bit(irq, true);
}

fn set_mask_bit(irq: u32, masked: bool) {
    let (port, bit) = if irq < 8 { (PIC1_DATA, irq) } else { (PIC2_DATA, irq - 8) };
    unsafe {
        let current = crate::arch::inb(port);
        let updated = if masked { current | (1 << bit) } else { current & !(1 << bit) };
        crate::arch::outb(port, updated);
    }
}

/// Acknowledge `irq` at the PIC. Lines 8..16 cascade through the master,
/// so the slave must be acknowledged first when `irq >= 8`.
pub fn eoi(irq: u32) {
    unsafe {
        if irq >= 8 {
            crate::arch::outb(PIC2_COMMAND, EOI);
        }
        crate::arch::outb(PIC1_COMMAND, EOI);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::{ActionKind, AutomatonId, Paction, ParameterMode};

    fn system_input(entry: usize) -> Caction {
        let paction = Paction::new(ActionKind::SystemInput, ParameterMode::None, entry, 0, "tick", "");
        Caction::new(AutomatonId(1), paction, 0)
    }

    #[test]
    fn subscribers_are_returned_in_subscription_order() {
        let mut mgr = IrqManager::new();
        mgr.subscribe(0, system_input(0x1000));
        mgr.subscribe(0, system_input(0x2000));
        let subs = mgr.subscribers(0);
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].paction.entry_point, 0x1000);
        assert_eq!(subs[1].paction.entry_point, 0x2000);
    }

    #[test]
    fn unsubscribed_irq_yields_no_subscribers() {
        let mgr = IrqManager::new();
        assert!(mgr.subscribers(3).is_empty());
    }
}
