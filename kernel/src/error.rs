//! Kernel error taxonomy.
//!
//! Lily's error handling design recognizes three distinct taxa (see
//! `SPEC_FULL.md` §7), and every fallible core operation returns one of
//! them through [`KernelError`]:
//!
//! 1. **Fatal** — a kernel invariant has been violated (frame manager
//!    corruption, registry inconsistency). The only correct response is to
//!    halt; see [`crate::arch::halt`].
//! 2. **Fault** — the currently-running automaton violated its contract
//!    with the kernel (bad continuation, bad buffer id, out-of-bounds
//!    span). The correct response is to terminate that automaton, never
//!    the kernel.
//! 3. **Recoverable** — an ordinary operation failed for an ordinary reason
//!    (resource exhaustion, invariant-preserving rejection). The correct
//!    response is to propagate an error sentinel to user code; no partial
//!    state change has occurred.
//!
//! [`KernelError::taxon`] tells a caller which of the three applies so
//! dispatch code (`trap.rs`, `sched/scheduler.rs`) can route accordingly
//! without re-deriving the classification at every call site.

use core::fmt;

/// Which of the three error taxa (SPEC_FULL.md §7) an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Taxon {
    /// Kernel invariant violated. Halt.
    Fatal,
    /// Automaton contract violated. Terminate the automaton.
    Fault,
    /// Ordinary, expected failure. Return a sentinel.
    Recoverable,
}

/// The kernel's single error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    // --- Fatal: frame manager / registry invariants ---
    /// No region allocator had a free frame.
    FramesExhausted,
    /// A region allocator could not locate a frame that is known to be live
    /// (the frame-table invariant "free ⇔ refcount 0" has been violated).
    FrameTableCorrupt { frame: u32 },
    /// Attempted to unmap a virtual address with no PTE present.
    DoubleUnmap { va: usize },
    /// The automaton or binding registry is in an inconsistent state.
    RegistryCorrupt,

    // --- Fault: automaton contract violations ---
    /// `finish`'s continuation does not name a declared action of the
    /// automaton that scheduled it.
    InvalidContinuation,
    /// A buffer id referenced by the automaton is not live.
    InvalidBufferId { id: u32 },
    /// A pointer/length pair does not lie within a single memory-map area.
    SpanOutOfBounds { ptr: usize, len: usize },
    /// A copy-value size exceeded the kernel-enforced limit.
    CopyValueTooLarge { size: usize, limit: usize },
    /// `bind` was attempted across a descriptor mismatch, same-automaton
    /// endpoints, or an already-bound input.
    BindingRejected,
    /// An address the automaton presented to a syscall is not mapped.
    UnmappedAddress { va: usize },

    // --- Recoverable: ordinary failures ---
    /// `sbrk` requested more room than is available before the next area.
    SbrkNoRoom,
    /// A buffer operation that requires the buffer to be unmapped was
    /// attempted while it was mapped.
    BufferMapped { id: u32 },
    /// `buffer_map` could not find a large-enough hole between heap and
    /// stack.
    NoMappingHole { frames: usize },
    /// An automaton-scoped id space (buffer ids) is exhausted.
    IdsExhausted,
    /// The referenced automaton no longer exists (e.g. the output side of
    /// a binding was destroyed between schedule and dispatch).
    AutomatonNotFound { id: u32 },
    /// `insert_vm_area` would overlap an existing area.
    AreaOverlap,
    /// Action registration found a duplicate entry-point or name.
    DuplicateAction,
}

impl KernelError {
    /// Classify this error into one of the three response taxa.
    pub const fn taxon(&self) -> Taxon {
        match self {
            Self::FramesExhausted
            | Self::FrameTableCorrupt { .. }
            | Self::DoubleUnmap { .. }
            | Self::RegistryCorrupt => Taxon::Fatal,

            Self::InvalidContinuation
            | Self::InvalidBufferId { .. }
            | Self::SpanOutOfBounds { .. }
            | Self::CopyValueTooLarge { .. }
            | Self::BindingRejected
            | Self::UnmappedAddress { .. } => Taxon::Fault,

            Self::SbrkNoRoom
            | Self::BufferMapped { .. }
            | Self::NoMappingHole { .. }
            | Self::IdsExhausted
            | Self::AutomatonNotFound { .. }
            | Self::AreaOverlap
            | Self::DuplicateAction => Taxon::Recoverable,
        }
    }

    /// A stable small discriminant for each variant, independent of any
    /// carried fields. `KernelError` carries data on several variants so it
    /// cannot be cast to an integer directly; this is the wire encoding
    /// trap dispatch uses to return an error sentinel to a caller (§7).
    pub const fn code(&self) -> i32 {
        match self {
            Self::FramesExhausted => 0,
            Self::FrameTableCorrupt { .. } => 1,
            Self::DoubleUnmap { .. } => 2,
            Self::RegistryCorrupt => 3,

            Self::InvalidContinuation => 4,
            Self::InvalidBufferId { .. } => 5,
            Self::SpanOutOfBounds { .. } => 6,
            Self::CopyValueTooLarge { .. } => 7,
            Self::BindingRejected => 8,
            Self::UnmappedAddress { .. } => 9,

            Self::SbrkNoRoom => 10,
            Self::BufferMapped { .. } => 11,
            Self::NoMappingHole { .. } => 12,
            Self::IdsExhausted => 13,
            Self::AutomatonNotFound { .. } => 14,
            Self::AreaOverlap => 15,
            Self::DuplicateAction => 16,
        }
    }
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FramesExhausted => write!(f, "no free physical frames remain"),
            Self::FrameTableCorrupt { frame } => {
                write!(f, "frame table corrupt at frame {}", frame)
            }
            Self::DoubleUnmap { va } => write!(f, "unmap of absent PTE at {:#x}", va),
            Self::RegistryCorrupt => write!(f, "automaton/binding registry corrupt"),
            Self::InvalidContinuation => write!(f, "finish continuation names no declared action"),
            Self::InvalidBufferId { id } => write!(f, "buffer id {} is not live", id),
            Self::SpanOutOfBounds { ptr, len } => {
                write!(f, "span [{:#x}, {:#x}) crosses a memory-map area boundary", ptr, ptr + len)
            }
            Self::CopyValueTooLarge { size, limit } => {
                write!(f, "copy value of {} bytes exceeds limit of {}", size, limit)
            }
            Self::BindingRejected => write!(f, "binding request rejected"),
            Self::UnmappedAddress { va } => write!(f, "address {:#x} is not mapped", va),
            Self::SbrkNoRoom => write!(f, "sbrk: insufficient room before next area"),
            Self::BufferMapped { id } => {
                write!(f, "buffer {} must be unmapped for this operation", id)
            }
            Self::NoMappingHole { frames } => {
                write!(f, "no hole of {} frames between heap and stack", frames)
            }
            Self::IdsExhausted => write!(f, "automaton id space exhausted"),
            Self::AutomatonNotFound { id } => write!(f, "automaton {} no longer exists", id),
            Self::AreaOverlap => write!(f, "memory-map area overlaps an existing area"),
            Self::DuplicateAction => write!(f, "duplicate action entry-point or name"),
        }
    }
}

/// Helper macro mirroring the teacher's `kernel_error!` ergonomics.
#[macro_export]
macro_rules! kernel_error {
    ($variant:ident) => {
        $crate::error::KernelError::$variant
    };
    ($variant:ident { $($field:ident : $value:expr),+ $(,)? }) => {
        $crate::error::KernelError::$variant { $($field: $value),+ }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_classify_as_fatal() {
        assert_eq!(KernelError::FramesExhausted.taxon(), Taxon::Fatal);
        assert_eq!(KernelError::RegistryCorrupt.taxon(), Taxon::Fatal);
    }

    #[test]
    fn fault_errors_classify_as_fault() {
        assert_eq!(KernelError::InvalidContinuation.taxon(), Taxon::Fault);
        assert_eq!(
            KernelError::InvalidBufferId { id: 7 }.taxon(),
            Taxon::Fault
        );
    }

    #[test]
    fn recoverable_errors_classify_as_recoverable() {
        assert_eq!(KernelError::SbrkNoRoom.taxon(), Taxon::Recoverable);
        assert_eq!(
            KernelError::AutomatonNotFound { id: 3 }.taxon(),
            Taxon::Recoverable
        );
    }

    #[test]
    fn display_is_human_readable() {
        let msg = alloc::format!("{}", KernelError::SbrkNoRoom);
        assert!(msg.contains("sbrk"));
    }

    #[test]
    fn code_ignores_carried_fields() {
        assert_eq!(
            KernelError::InvalidBufferId { id: 1 }.code(),
            KernelError::InvalidBufferId { id: 2 }.code()
        );
    }
}

#[cfg(test)]
extern crate alloc;
