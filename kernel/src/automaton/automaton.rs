//! The automaton object: one address space, one action table, three
//! binding tables, one buffer table.
//!
//! Grounded on `automaton.hpp`/`automaton.cpp` from the original kernel.
//! The awkward part of that design — automata referencing each other
//! directly, which makes teardown recursive and order-dependent — is
//! resolved here the way `SPEC_FULL.md` §9 ("cyclic ownership") directs:
//! every cross-automaton reference is just an [`AutomatonId`], resolved
//! back through [`super::registry`] on demand, so one automaton never
//! holds a strong handle to another.

extern crate alloc;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;

use super::action::{ActionKind, Caction, Paction};
use super::area::{AreaKind, FaultOutcome, VmArea};
use super::AutomatonId;
use crate::error::{KernelError, KernelResult};
use crate::mm::buffer::Buffer;
use crate::mm::vm::{self, PageFaultErrorCode, Privilege};
use crate::mm::{FrameNumber, VirtualAddress};

/// A binding key: identifies a caction slot without cloning the whole
/// `Paction`/description payload.
pub type BindingKey = (u32, usize, u32);

pub(super) fn key_of(c: &Caction) -> BindingKey {
    (c.automaton.0, c.paction.entry_point, c.parameter)
}

pub struct Automaton {
    id: AutomatonId,
    directory_frame: FrameNumber,
    privileged: bool,

    actions_by_entry: BTreeMap<usize, Paction>,
    actions_by_name: BTreeMap<String, usize>,

    areas: Vec<VmArea>,
    heap_area: Option<usize>,
    stack_area: Option<usize>,

    bound_outputs: BTreeMap<BindingKey, Vec<Caction>>,
    bound_inputs: BTreeMap<BindingKey, Caction>,
    /// Bindings this automaton requested, kept so it can release them on
    /// its own destruction even though neither endpoint need be itself.
    owned_bindings: Vec<(Caction, Caction)>,

    buffers: BTreeMap<u32, Buffer>,
    /// Mapped range of each currently-mapped buffer, tracked alongside the
    /// area list so `buffer_destroy` can find its `VmArea` entry without
    /// reaching into `Buffer`'s private mapping field.
    buffer_areas: BTreeMap<u32, (VirtualAddress, VirtualAddress)>,
    next_buffer_id: u32,

    user_stack_pointer: VirtualAddress,
}

/// Bytes the kernel will snapshot out of an output action's copy-value
/// span into a delivered buffer. Chosen generously enough for a small
/// event payload, small enough to bound fan-out cost (§7 AMBIENT note).
pub const COPY_VALUE_LIMIT: usize = 4096;

impl Automaton {
    pub fn new(
        id: AutomatonId,
        directory_frame: FrameNumber,
        privileged: bool,
        user_stack_pointer: VirtualAddress,
    ) -> Self {
        Self {
            id,
            directory_frame,
            privileged,
            actions_by_entry: BTreeMap::new(),
            actions_by_name: BTreeMap::new(),
            areas: Vec::new(),
            heap_area: None,
            stack_area: None,
            bound_outputs: BTreeMap::new(),
            bound_inputs: BTreeMap::new(),
            owned_bindings: Vec::new(),
            buffers: BTreeMap::new(),
            buffer_areas: BTreeMap::new(),
            next_buffer_id: 0,
            user_stack_pointer,
        }
    }

    pub fn id(&self) -> AutomatonId {
        self.id
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn directory_frame(&self) -> FrameNumber {
        self.directory_frame
    }

    pub fn user_stack_pointer(&self) -> VirtualAddress {
        self.user_stack_pointer
    }

    // ---- action table -----------------------------------------------

    pub fn register_action(&mut self, paction: Paction) -> KernelResult<()> {
        if self.actions_by_entry.contains_key(&paction.entry_point) {
            return Err(KernelError::DuplicateAction);
        }
        if self.actions_by_name.contains_key(&paction.name) {
            return Err(KernelError::DuplicateAction);
        }
        self.actions_by_name.insert(paction.name.clone(), paction.entry_point);
        self.actions_by_entry.insert(paction.entry_point, paction);
        Ok(())
    }

    pub fn action_by_entry(&self, entry: usize) -> Option<&Paction> {
        self.actions_by_entry.get(&entry)
    }

    pub fn action_by_name(&self, name: &str) -> Option<&Paction> {
        self.actions_by_name.get(name).and_then(|e| self.actions_by_entry.get(e))
    }

    pub fn action_count(&self) -> usize {
        self.actions_by_entry.len()
    }

    // ---- memory map ---------------------------------------------------

    /// Insert an area, rejecting overlap with any existing area. Areas
    /// are kept sorted by `begin` so later scans (sbrk, page_fault,
    /// buffer_map's hole search) can assume ordering.
    pub fn insert_vm_area(&mut self, area: VmArea) -> KernelResult<()> {
        let idx = self
            .areas
            .binary_search_by_key(&area.begin.as_u64(), |a| a.begin.as_u64())
            .unwrap_or_else(|i| i);
        if idx > 0 && self.areas[idx - 1].overlaps(area.begin, area.end) {
            return Err(KernelError::AreaOverlap);
        }
        if idx < self.areas.len() && self.areas[idx].overlaps(area.begin, area.end) {
            return Err(KernelError::AreaOverlap);
        }
        let kind = area.kind;
        self.areas.insert(idx, area);
        match kind {
            AreaKind::Heap => self.heap_area = Some(idx),
            AreaKind::Stack => self.stack_area = Some(idx),
            _ => {}
        }
        // Indices after the insertion point shifted by one.
        if let Some(h) = self.heap_area {
            if h >= idx && kind != AreaKind::Heap {
                self.heap_area = Some(h + 1);
            }
        }
        if let Some(s) = self.stack_area {
            if s >= idx && kind != AreaKind::Stack {
                self.stack_area = Some(s + 1);
            }
        }
        Ok(())
    }

    pub fn area_covering(&self, va: VirtualAddress) -> Option<&VmArea> {
        self.areas.iter().find(|a| a.contains(va))
    }

    pub fn verify_span(&self, ptr: usize, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        let begin = VirtualAddress::new(ptr as u64);
        let end = VirtualAddress::new((ptr + len) as u64);
        match self.area_covering(begin) {
            Some(area) => area.end.as_u64() >= end.as_u64(),
            None => false,
        }
    }

    /// Grow (`delta > 0`) or shrink (`delta < 0`) the heap area, mapping
    /// or unmapping whole pages as the boundary crosses them. Returns the
    /// break's new value.
    pub fn sbrk(&mut self, delta: i32) -> KernelResult<usize> {
        let idx = self.heap_area.ok_or(KernelError::SbrkNoRoom)?;
        let old_end = self.areas[idx].end;
        let new_end_i = old_end.as_u64() as i64 + delta as i64;
        if new_end_i < self.areas[idx].begin.as_u64() as i64 {
            return Err(KernelError::SbrkNoRoom);
        }
        let new_end = VirtualAddress::new(new_end_i as u64);
        if idx + 1 < self.areas.len() && new_end.as_u64() > self.areas[idx + 1].begin.as_u64() {
            return Err(KernelError::SbrkNoRoom);
        }

        let page_size = vm::PAGE_SIZE as u64;
        let old_pages = (old_end.as_u64() - self.areas[idx].begin.as_u64()) / page_size;
        let new_pages = if new_end.as_u64() >= self.areas[idx].begin.as_u64() {
            (new_end.as_u64() - self.areas[idx].begin.as_u64()) / page_size
        } else {
            0
        };

        if new_pages > old_pages {
            for p in old_pages..new_pages {
                let va = self.areas[idx].begin.add((p * page_size) as usize);
                let zero = crate::mm::frame::manager().zero_frame();
                vm::map(va, zero, Privilege::User, vm::MapMode::CopyOnWrite, false, false)?;
            }
        } else if new_pages < old_pages {
            for p in new_pages..old_pages {
                let va = self.areas[idx].begin.add((p * page_size) as usize);
                vm::unmap(va, true)?;
            }
        }

        self.areas[idx].end = new_end;
        Ok(old_end.as_usize())
    }

    /// Delegate a fault to the covering area. `arch::x86_64::idt::page_fault_handler`
    /// has already ruled out copy-on-write resolution by the time this is
    /// called.
    pub fn page_fault(&mut self, va: VirtualAddress, err: PageFaultErrorCode) -> FaultOutcome {
        match self.area_covering(va) {
            Some(area) => area.page_fault(va, err),
            None => FaultOutcome::Terminate,
        }
    }

    // ---- bindings -------------------------------------------------------

    pub fn bound_outputs_for(&self, output: &Caction) -> &[Caction] {
        self.bound_outputs.get(&key_of(output)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn input_is_bound(&self, input: &Caction) -> bool {
        self.bound_inputs.contains_key(&key_of(input))
    }

    pub fn output_already_bound_to(&self, output: &Caction, other: AutomatonId) -> bool {
        self.bound_outputs
            .get(&key_of(output))
            .map(|v| v.iter().any(|c| c.automaton == other))
            .unwrap_or(false)
    }

    pub(super) fn add_bound_output(&mut self, output: &Caction, input: Caction) {
        self.bound_outputs.entry(key_of(output)).or_default().push(input);
    }

    pub(super) fn add_bound_input(&mut self, input: &Caction, output: Caction) {
        self.bound_inputs.insert(key_of(input), output);
    }

    pub(super) fn record_owned_binding(&mut self, output: Caction, input: Caction) {
        self.owned_bindings.push((output, input));
    }

    pub(super) fn remove_output_binding(&mut self, output_key: &BindingKey, other: AutomatonId) {
        if let Some(v) = self.bound_outputs.get_mut(output_key) {
            v.retain(|c| c.automaton != other);
        }
    }

    pub(super) fn remove_input_binding(&mut self, input_key: &BindingKey) {
        self.bound_inputs.remove(input_key);
    }

    pub fn binding_count(&self) -> usize {
        self.bound_outputs.values().map(Vec::len).sum::<usize>() + self.bound_inputs.len()
    }

    /// Bindings referencing `id` on either side, drained for teardown.
    pub(super) fn drain_references_to(&mut self, id: AutomatonId) {
        self.bound_outputs.retain(|k, _| k.0 != id.0);
        for v in self.bound_outputs.values_mut() {
            v.retain(|c| c.automaton != id);
        }
        self.bound_inputs.retain(|k, out| k.0 != id.0 && out.automaton != id);
        self.owned_bindings.retain(|(o, i)| o.automaton != id && i.automaton != id);
    }

    pub(super) fn owned_bindings(&self) -> &[(Caction, Caction)] {
        &self.owned_bindings
    }

    // ---- buffers --------------------------------------------------------

    fn alloc_buffer_id(&mut self) -> KernelResult<u32> {
        let start = self.next_buffer_id;
        loop {
            let candidate = self.next_buffer_id;
            self.next_buffer_id = self.next_buffer_id.wrapping_add(1);
            if !self.buffers.contains_key(&candidate) {
                return Ok(candidate);
            }
            if self.next_buffer_id == start {
                return Err(KernelError::IdsExhausted);
            }
        }
    }

    pub fn buffer_create(&mut self, size: usize) -> KernelResult<u32> {
        let buffer = Buffer::new(size)?;
        let id = self.alloc_buffer_id()?;
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    pub fn buffer_copy(&mut self, src: u32, begin: usize, end: usize) -> KernelResult<u32> {
        let source = self.buffers.get_mut(&src).ok_or(KernelError::InvalidBufferId { id: src })?;
        let copy = Buffer::clone_range(source, begin, end)?;
        let id = self.alloc_buffer_id()?;
        self.buffers.insert(id, copy);
        Ok(id)
    }

    pub fn buffer_grow(&mut self, id: u32, size: usize) -> KernelResult<usize> {
        let buffer = self.buffers.get_mut(&id).ok_or(KernelError::InvalidBufferId { id })?;
        buffer.resize(size)?;
        Ok(buffer.size())
    }

    pub fn buffer_append(&mut self, dst: u32, src: u32, begin: usize, end: usize) -> KernelResult<usize> {
        if dst == src {
            return Err(KernelError::InvalidBufferId { id: src });
        }
        let [dst_buf, src_buf] = self
            .buffers
            .get_many_mut_pair(dst, src)
            .ok_or(KernelError::InvalidBufferId { id: dst })?;
        dst_buf.append(src_buf, begin, end)
    }

    pub fn buffer_assign(
        &mut self,
        dst: u32,
        dst_begin: usize,
        src: u32,
        src_begin: usize,
        src_end: usize,
    ) -> KernelResult<()> {
        if dst == src {
            return Err(KernelError::InvalidBufferId { id: src });
        }
        let [dst_buf, src_buf] = self
            .buffers
            .get_many_mut_pair(dst, src)
            .ok_or(KernelError::InvalidBufferId { id: dst })?;
        dst_buf.assign(dst_begin, src_buf, src_begin, src_end, Privilege::User)
    }

    pub fn buffer_size(&self, id: u32) -> KernelResult<usize> {
        self.buffers.get(&id).map(Buffer::size).ok_or(KernelError::InvalidBufferId { id })
    }

    /// Find a hole between the heap and stack areas large enough to hold
    /// `id`'s frames, and map it there.
    pub fn buffer_map(&mut self, id: u32) -> KernelResult<VirtualAddress> {
        let frames = self.buffers.get(&id).ok_or(KernelError::InvalidBufferId { id })?.size();
        if frames == 0 {
            return Err(KernelError::InvalidBufferId { id });
        }
        let needed = (frames * vm::PAGE_SIZE) as u64;

        let heap_idx = self.heap_area.ok_or(KernelError::NoMappingHole { frames })?;
        let stack_idx = self.stack_area.ok_or(KernelError::NoMappingHole { frames })?;
        let (lo, hi) = if heap_idx <= stack_idx {
            (heap_idx, stack_idx)
        } else {
            (stack_idx, heap_idx)
        };

        let mut candidate = self.areas[lo].end;
        for idx in lo..hi {
            let gap_end = self.areas[idx + 1].begin;
            if gap_end.as_u64() - candidate.as_u64() >= needed {
                let start = candidate;
                let buffer = self.buffers.get_mut(&id).expect("checked above");
                let mapped = buffer.map_begin(start, Privilege::User)?;
                let mapped_end = mapped.add(needed as usize);
                self.insert_vm_area(VmArea::new(AreaKind::Buffer, mapped, mapped_end, Privilege::User))?;
                self.buffer_areas.insert(id, (mapped, mapped_end));
                return Ok(mapped);
            }
            candidate = self.areas[idx + 1].end;
        }
        Err(KernelError::NoMappingHole { frames })
    }

    pub fn buffer_destroy(&mut self, id: u32) -> KernelResult<()> {
        let mut buffer = self.buffers.remove(&id).ok_or(KernelError::InvalidBufferId { id })?;
        if let Some((begin, _end)) = self.buffer_areas.remove(&id) {
            self.areas.retain(|a| !(a.kind == AreaKind::Buffer && a.begin == begin));
        }
        buffer.unmap()?;
        drop(buffer);
        Ok(())
    }

    /// Take a buffer out of the table so it can be handed to another
    /// automaton's `adopt_buffer`, e.g. while delivering a fan-out.
    pub(super) fn take_buffer(&mut self, id: u32) -> KernelResult<Buffer> {
        self.buffers.remove(&id).ok_or(KernelError::InvalidBufferId { id })
    }

    pub(super) fn adopt_buffer(&mut self, buffer: Buffer) -> KernelResult<u32> {
        let id = self.alloc_buffer_id()?;
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    pub(super) fn buffer_mut(&mut self, id: u32) -> KernelResult<&mut Buffer> {
        self.buffers.get_mut(&id).ok_or(KernelError::InvalidBufferId { id })
    }

    pub fn buffer_exists(&self, id: u32) -> bool {
        self.buffers.contains_key(&id)
    }

    /// Release every area, every buffer. Called once by the registry as
    /// the last step of destroying this automaton; always succeeds, per
    /// `SPEC_FULL.md` §9's resolved destructor semantics.
    pub(super) fn teardown(&mut self) -> KernelResult<()> {
        for area in self.areas.drain(..) {
            if matches!(area.kind, AreaKind::Free | AreaKind::Reserved | AreaKind::Buffer) {
                continue;
            }
            let mut va = area.begin;
            while va.as_u64() < area.end.as_u64() {
                let _ = vm::unmap(va, true);
                va = va.add(vm::PAGE_SIZE);
            }
        }
        self.buffers.clear();
        self.buffer_areas.clear();
        Ok(())
    }
}

/// A small helper trait letting `buffer_append`/`buffer_assign` borrow two
/// distinct entries of the buffer table mutably at once. `BTreeMap` has no
/// such accessor built in.
trait GetManyMutPair<K, V> {
    fn get_many_mut_pair(&mut self, a: K, b: K) -> Option<[&mut V; 2]>;
}

impl<V> GetManyMutPair<u32, V> for BTreeMap<u32, V> {
    fn get_many_mut_pair(&mut self, a: u32, b: u32) -> Option<[&mut V; 2]> {
        if a == b || !self.contains_key(&a) || !self.contains_key(&b) {
            return None;
        }
        // SAFETY: `a != b` was just checked, and both keys are confirmed
        // present, so the two raw pointers obtained below alias distinct
        // entries of the map's backing storage.
        unsafe {
            let pa: *mut V = self.get_mut(&a)?;
            let pb: *mut V = self.get_mut(&b)?;
            Some([&mut *pa, &mut *pb])
        }
    }
}

/// Bookkeeping a scheduler keeps per automaton, kept here rather than on
/// `Automaton` itself so the scheduler (§4.5) owns its own state and the
/// automaton object stays free of run-queue concerns.
pub struct ReadyState {
    pub queued: bool,
    pub pending: VecDeque<Caction>,
}

impl ReadyState {
    pub fn new() -> Self {
        Self {
            queued: false,
            pending: VecDeque::new(),
        }
    }

    /// Insert `caction` unless an equal one is already pending. Returns
    /// whether this automaton newly became non-idle.
    pub fn push(&mut self, caction: Caction) -> bool {
        if self.pending.iter().any(|c| *c == caction) {
            return false;
        }
        self.pending.push_back(caction);
        let was_idle = !self.queued;
        self.queued = true;
        was_idle
    }

    pub fn pop(&mut self) -> Option<Caction> {
        self.pending.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl Default for ReadyState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::action::ParameterMode;
    use crate::mm::vm::Privilege;

    fn va(n: u64) -> VirtualAddress {
        VirtualAddress::new(n)
    }

    fn sample_automaton() -> Automaton {
        Automaton::new(AutomatonId(1), FrameNumber(0), false, va(0x8000_0000))
    }

    #[test]
    fn register_action_rejects_duplicate_entry_point() {
        let mut a = sample_automaton();
        let p1 = Paction::new(ActionKind::Output, ParameterMode::None, 0x1000, 0, "a", "");
        let p2 = Paction::new(ActionKind::Input, ParameterMode::None, 0x1000, 1, "b", "");
        a.register_action(p1).unwrap();
        assert!(matches!(a.register_action(p2), Err(KernelError::DuplicateAction)));
    }

    #[test]
    fn insert_vm_area_rejects_overlap() {
        let mut a = sample_automaton();
        a.insert_vm_area(VmArea::new(AreaKind::Data, va(0x1000), va(0x3000), Privilege::User))
            .unwrap();
        let overlap = VmArea::new(AreaKind::Data, va(0x2000), va(0x4000), Privilege::User);
        assert!(matches!(a.insert_vm_area(overlap), Err(KernelError::AreaOverlap)));
    }

    #[test]
    fn verify_span_checks_containment() {
        let mut a = sample_automaton();
        a.insert_vm_area(VmArea::new(AreaKind::Data, va(0x1000), va(0x3000), Privilege::User))
            .unwrap();
        assert!(a.verify_span(0x1000, 0x1000));
        assert!(!a.verify_span(0x2800, 0x1000));
        assert!(!a.verify_span(0x5000, 0x10));
    }

    #[test]
    fn ready_state_dedups_pending_cactions() {
        let mut rs = ReadyState::new();
        let p = Paction::new(ActionKind::Internal, ParameterMode::None, 0x2000, 0, "tick", "");
        let c1 = Caction::new(AutomatonId(1), p.clone(), 0);
        let c2 = Caction::new(AutomatonId(1), p, 0);
        assert!(rs.push(c1));
        assert!(!rs.push(c2));
        assert_eq!(rs.pending.len(), 1);
    }
}
