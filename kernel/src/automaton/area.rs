//! Tagged memory-map areas.
//!
//! An automaton's address space is a sorted, non-overlapping list of
//! these. Grounded on the area bookkeeping in `vm_area.hpp` from the
//! original kernel, reworked around [`super::super::mm::vm`]'s
//! self-mapped paging rather than a generic VMA tree (`SPEC_FULL.md`
//! §9, "tagged-variant areas").

use crate::mm::vm::{PageFaultErrorCode, Privilege};
use crate::mm::VirtualAddress;

/// What an area is backing. Only `Heap` areas grow via `sbrk`; only
/// `Buffer` areas are torn down by `buffer_destroy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaKind {
    Free,
    Reserved,
    Data,
    Text,
    Rodata,
    Heap,
    Stack,
    Buffer,
}

/// What the scheduler should do after an area's fault handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The fault was satisfied by the copy-on-write machinery one layer
    /// down; nothing further to do.
    Resolved,
    /// No area covers the address, or the area's kind cannot explain the
    /// fault (e.g. a write to `Text`). Fatal to the automaton, never to
    /// the kernel.
    Terminate,
}

#[derive(Debug, Clone)]
pub struct VmArea {
    pub kind: AreaKind,
    pub begin: VirtualAddress,
    pub end: VirtualAddress,
    pub privilege: Privilege,
}

impl VmArea {
    pub fn new(kind: AreaKind, begin: VirtualAddress, end: VirtualAddress, privilege: Privilege) -> Self {
        Self {
            kind,
            begin,
            end,
            privilege,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.as_u64() - self.begin.as_u64()
    }

    pub fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.begin.as_u64() && va.as_u64() < self.end.as_u64()
    }

    pub fn overlaps(&self, other_begin: VirtualAddress, other_end: VirtualAddress) -> bool {
        self.begin.as_u64() < other_end.as_u64() && other_begin.as_u64() < self.end.as_u64()
    }

    /// Coalesce with an immediately-following area of the same kind and
    /// privilege. Returns `None` if they are not adjacent or differ.
    pub fn merge(&self, next: &VmArea) -> Option<VmArea> {
        if self.kind == next.kind && self.privilege == next.privilege && self.end == next.begin {
            Some(VmArea::new(self.kind, self.begin, next.end, self.privilege))
        } else {
            None
        }
    }

    /// The actual copy-on-write resolution happens one layer down in
    /// `arch::x86_64::idt::page_fault_handler`, which only calls here once
    /// it has ruled out a COW fault. An area can therefore only ever answer
    /// "this is not something I can fix" — demand-paging and lazy
    /// stack growth are out of scope.
    pub fn page_fault(&self, _va: VirtualAddress, _err: PageFaultErrorCode) -> FaultOutcome {
        FaultOutcome::Terminate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn va(n: u64) -> VirtualAddress {
        VirtualAddress::new(n)
    }

    #[test]
    fn contains_is_half_open() {
        let a = VmArea::new(AreaKind::Heap, va(0x1000), va(0x2000), Privilege::User);
        assert!(a.contains(va(0x1000)));
        assert!(!a.contains(va(0x2000)));
    }

    #[test]
    fn merge_requires_adjacency_and_matching_kind() {
        let a = VmArea::new(AreaKind::Heap, va(0x1000), va(0x2000), Privilege::User);
        let b = VmArea::new(AreaKind::Heap, va(0x2000), va(0x3000), Privilege::User);
        let c = VmArea::new(AreaKind::Stack, va(0x2000), va(0x3000), Privilege::User);
        assert!(a.merge(&b).is_some());
        assert!(a.merge(&c).is_none());
    }

    #[test]
    fn overlap_detection() {
        let a = VmArea::new(AreaKind::Data, va(0x1000), va(0x3000), Privilege::User);
        assert!(a.overlaps(va(0x2000), va(0x4000)));
        assert!(!a.overlaps(va(0x3000), va(0x4000)));
    }
}
