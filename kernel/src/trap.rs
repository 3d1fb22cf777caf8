//! Software-interrupt trap dispatch: the three vectors through which
//! automata ever re-enter the kernel (`SPEC_FULL.md` §6).
//!
//! `0x80` is `finish`, the sole way an action returns control; `0x81` is
//! the general syscall table (memory and buffer operations); `0x82` is
//! reserved for the automaton the boot sequence designates as
//! privileged (TLB invalidation today). All three are registered at
//! DPL 3 in [`crate::arch::x86_64::idt`] so `int 0x80`/`0x81`/`0x82` from
//! ring 3 reaches them; the naked entry stubs here save the registers
//! the original kernel's `trap.S` pushed by hand before calling into
//! the ordinary Rust dispatch functions below, and never return through
//! the usual `iretq` epilogue — `finish` always ends by handing control
//! to a different automaton via [`crate::sched`].

use crate::automaton::{registry, AutomatonId};
use crate::error::KernelError;
use crate::mm::vm;

/// Opcodes for the `int 0x81` general syscall vector, in the order
/// `SPEC_FULL.md` §6 lists them.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    GetPageSize = 0,
    Sbrk = 1,
    BindingCount = 2,
    BufferCreate = 3,
    BufferCopy = 4,
    BufferGrow = 5,
    BufferAppend = 6,
    BufferAssign = 7,
    BufferMap = 8,
    BufferDestroy = 9,
    BufferSize = 10,
}

impl Syscall {
    fn from_u64(n: u64) -> Option<Self> {
        Some(match n {
            0 => Self::GetPageSize,
            1 => Self::Sbrk,
            2 => Self::BindingCount,
            3 => Self::BufferCreate,
            4 => Self::BufferCopy,
            5 => Self::BufferGrow,
            6 => Self::BufferAppend,
            7 => Self::BufferAssign,
            8 => Self::BufferMap,
            9 => Self::BufferDestroy,
            10 => Self::BufferSize,
            _ => return None,
        })
    }
}

/// Opcodes for the `int 0x82` privileged vector.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privileged {
    InvalidateTlb = 0,
}

/// `int 0x80` (finish) dispatch, in the five registers a raw entry gate
/// hands a function (`rdi, rsi, rdx, rcx, r8`): a missing continuation is
/// `continuation_entry == u64::MAX`, a missing copy value is `copy_len ==
/// 0`, a missing buffer is `buffer_id == u32::MAX` — sentinels rather
/// than a sixth/seventh flag register, since x86-64's System V integer
/// argument registers run out at six and `caller` (unlike `syscall_trap`'s)
/// has nowhere else to go that still fits alongside these five.
///
/// Never returns: always ends in [`crate::sched::finish`], which ends in
/// either a fan-out delivery or the ready-queue loop, both of which
/// `iretq` into some automaton.
pub extern "C" fn finish_trap(continuation_entry: u64, continuation_param: u64, copy_ptr: u64, copy_len: u64, buffer_id: u64) -> ! {
    let continuation = if continuation_entry != u64::MAX {
        Some((continuation_entry as usize, continuation_param as u32))
    } else {
        None
    };
    let copy_span = if copy_len != 0 { Some((copy_ptr as usize, copy_len as usize)) } else { None };
    let buffer = if buffer_id != u32::MAX { Some(buffer_id as u32) } else { None };

    crate::sched::finish(continuation, copy_span, buffer)
}

/// `int 0x81` (general syscall) dispatch for the calling automaton
/// `caller`. Memory and buffer operations only; bindings themselves are
/// established out of band, by whichever automaton the boot sequence
/// designates to build the initial wiring (`SPEC_FULL.md` §4.4).
pub fn syscall_trap(caller: AutomatonId, opcode: u64, a0: u64, a1: u64, a2: u64, a3: u64, a4: u64) -> u64 {
    let Some(op) = Syscall::from_u64(opcode) else {
        return error_code(KernelError::BindingRejected);
    };

    let result = match op {
        Syscall::GetPageSize => return vm::PAGE_SIZE as u64,
        Syscall::Sbrk => registry()
            .with_mut(caller, |au| au.sbrk(a0 as i32))
            .unwrap_or(Err(KernelError::AutomatonNotFound { id: caller.0 }))
            .map(|v| v as u64),
        Syscall::BindingCount => {
            return registry().with(caller, |au| au.binding_count() as u64).unwrap_or(0);
        }
        Syscall::BufferCreate => registry()
            .with_mut(caller, |au| au.buffer_create(a0 as usize))
            .unwrap_or(Err(KernelError::AutomatonNotFound { id: caller.0 }))
            .map(u64::from),
        Syscall::BufferCopy => registry()
            .with_mut(caller, |au| au.buffer_copy(a0 as u32, a1 as usize, a2 as usize))
            .unwrap_or(Err(KernelError::AutomatonNotFound { id: caller.0 }))
            .map(u64::from),
        Syscall::BufferGrow => registry()
            .with_mut(caller, |au| au.buffer_grow(a0 as u32, a1 as usize))
            .unwrap_or(Err(KernelError::AutomatonNotFound { id: caller.0 }))
            .map(|v| v as u64),
        Syscall::BufferAppend => registry()
            .with_mut(caller, |au| au.buffer_append(a0 as u32, a1 as u32, a2 as usize, a3 as usize))
            .unwrap_or(Err(KernelError::AutomatonNotFound { id: caller.0 }))
            .map(|v| v as u64),
        Syscall::BufferAssign => registry()
            .with_mut(caller, |au| au.buffer_assign(a0 as u32, a1 as usize, a2 as u32, a3 as usize, a4 as usize))
            .unwrap_or(Err(KernelError::AutomatonNotFound { id: caller.0 }))
            .map(|_| 0u64),
        Syscall::BufferMap => registry()
            .with_mut(caller, |au| au.buffer_map(a0 as u32))
            .unwrap_or(Err(KernelError::AutomatonNotFound { id: caller.0 }))
            .map(|va| va.as_u64()),
        Syscall::BufferDestroy => registry()
            .with_mut(caller, |au| au.buffer_destroy(a0 as u32))
            .unwrap_or(Err(KernelError::AutomatonNotFound { id: caller.0 }))
            .map(|_| 0u64),
        Syscall::BufferSize => registry()
            .with(caller, |au| au.buffer_size(a0 as u32))
            .unwrap_or(Err(KernelError::AutomatonNotFound { id: caller.0 }))
            .map(|v| v as u64),
    };

    match result {
        Ok(v) => v,
        Err(e) => error_code(e),
    }
}

/// `int 0x82` (privileged) dispatch. Rejected outright unless `caller`
/// is the automaton the boot sequence marked privileged.
pub fn privileged_trap(caller: AutomatonId, opcode: u64, addr: u64) -> u64 {
    let is_privileged = registry().with(caller, |au| au.is_privileged()).unwrap_or(false);
    if !is_privileged {
        return error_code(KernelError::BindingRejected);
    }
    match opcode {
        x if x == Privileged::InvalidateTlb as u64 => {
            vm::invalidate(crate::mm::VirtualAddress::new(addr));
            0
        }
        _ => error_code(KernelError::BindingRejected),
    }
}

/// `int 0x81` entry point as a raw gate hands it: `caller` has no
/// register of its own left (opcode plus five arguments already fill
/// `rdi..r9`), so it is derived from the scheduler's own notion of which
/// automaton is currently dispatched rather than passed in.
pub extern "C" fn syscall_entry(opcode: u64, a0: u64, a1: u64, a2: u64, a3: u64, a4: u64) -> u64 {
    match crate::sched::current_automaton() {
        Some(caller) => syscall_trap(caller, opcode, a0, a1, a2, a3, a4),
        None => error_code(KernelError::AutomatonNotFound { id: 0 }),
    }
}

/// `int 0x82` entry point; same caller-derivation as [`syscall_entry`].
pub extern "C" fn privileged_entry(opcode: u64, addr: u64) -> u64 {
    match crate::sched::current_automaton() {
        Some(caller) => privileged_trap(caller, opcode, addr),
        None => error_code(KernelError::AutomatonNotFound { id: 0 }),
    }
}

/// Recoverable-taxon errors are returned to the caller as a negative
/// sentinel rather than delivered any other way — there is no user-space
/// exception mechanism in this design (§7).
fn error_code(e: KernelError) -> u64 {
    debug_assert_ne!(e.taxon(), crate::error::Taxon::Fatal, "fatal errors must halt, not return to a caller");
    (-(1i64 + e.code() as i64)) as u64
}
