//! Hardware context switch: load an automaton's page directory, build
//! the action's argument frame on its user stack, and `iretq` into it.
//!
//! Grounded on the trap-return path in `scheduler.cpp`'s `finish_action`,
//! translated from the 32-bit `iret` frame the original pushes into the
//! equivalent long-mode `iretq` frame, using the selectors
//! [`crate::arch::x86_64::gdt`] built at boot.

use super::super::automaton::{registry, ActionKind, Caction};
use crate::arch::x86_64::gdt;
use crate::mm::vm;

/// Switch to `caction`'s automaton and run it. Never returns in the Rust
/// sense: control leaves via `iretq` and only re-enters the kernel
/// through a later trap, which lands in [`crate::trap`] and calls back
/// into [`super::finish`] or [`super::schedule`].
#[cfg(target_os = "none")]
pub fn dispatch(caction: Caction) -> ! {
    let aid = caction.automaton;
    let (directory_frame, stack_top) = registry()
        .with(aid, |au| (au.directory_frame(), au.user_stack_pointer()))
        .expect("dispatch target automaton must exist");
    let entry = caction.paction.entry_point;

    vm::switch_to_directory(directory_frame);

    let mut sp = stack_top.as_u64();
    let mut push = |value: u64| {
        sp -= 8;
        // SAFETY: `sp` walks downward from the automaton's own mapped
        // user stack; the registry hands out a stack area with enough
        // headroom for the handful of argument words pushed here, and
        // nothing else touches this range before `iretq` below hands
        // control to the automaton.
        unsafe {
            core::ptr::write(sp as *mut u64, value);
        }
    };

    // Per-kind argument convention (§4.5): inputs and system-inputs carry
    // up to two buffer ids ahead of their parameter; outputs and
    // internal actions carry only the parameter. Every action gets a
    // dummy return address underneath since none of them ever `ret`.
    match caction.paction.kind {
        ActionKind::Input | ActionKind::SystemInput => {
            push(caction.buffers[1].map(u64::from).unwrap_or(u64::MAX));
            push(caction.buffers[0].map(u64::from).unwrap_or(u64::MAX));
            push(u64::from(caction.parameter));
            push(0);
        }
        ActionKind::Output | ActionKind::Internal => {
            push(u64::from(caction.parameter));
            push(0);
        }
    }

    let selectors = gdt::selectors();
    let user_data = u64::from(selectors.user_data_selector.0);
    let user_code = u64::from(selectors.user_code_selector.0);
    const RFLAGS_IF: u64 = 1 << 9;

    // SAFETY: pushes the five-word frame `iretq` requires in order
    // {ss, rsp, rflags, cs, rip}. The selectors come from the GDT built
    // at boot and carry RPL 3; rflags sets only the interrupt-enable
    // bit. This never returns.
    unsafe {
        core::arch::asm!(
            "push {ss}",
            "push {sp}",
            "push {flags}",
            "push {cs}",
            "push {entry}",
            "iretq",
            ss = in(reg) user_data,
            sp = in(reg) sp,
            flags = in(reg) RFLAGS_IF,
            cs = in(reg) user_code,
            entry = in(reg) entry as u64,
            options(noreturn),
        );
    }
}

#[cfg(not(target_os = "none"))]
pub fn dispatch(_caction: Caction) -> ! {
    panic!("dispatch requires live paging");
}
