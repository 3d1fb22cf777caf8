//! The self-mapped, two-level x86 page directory.
//!
//! Grounded directly on `vm.hpp`/`vm_def.hpp`: a page directory maps its own
//! last entry to itself, so once a directory is loaded into `cr3` the
//! directory's 1024 entries are always visible at the fixed virtual address
//! [`PAGE_DIRECTORY_VADDR`] and any page table's 1024 entries at
//! `PAGE_TABLE_AREA_BASE + directory_index * PAGE_SIZE`. This is independent
//! of whatever paging scheme the bootloader handed off with — Lily builds
//! and installs its own directory during [`init_kernel_directory`] before
//! any automaton is created.
//!
//! Every function here that touches the self-map is hardware-only: it reads
//! back through the live `cr3` and can only make sense with real paging
//! active, so it is compiled solely for the bare-metal target. Pure bit
//! arithmetic (entry packing, index computation, page-fault error
//! decoding) has no such restriction and is covered by host-runnable unit
//! tests below.

use super::{frame, FrameNumber, VirtualAddress};
use crate::error::{KernelError, KernelResult};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_ENTRY_COUNT: usize = 1024;

/// Once a directory is live, it is always mapped to itself here.
pub const PAGE_DIRECTORY_VADDR: usize = 0xFFFF_F000;
/// Base of the 4 MiB window through which every page table is visible.
pub const PAGE_TABLE_AREA_BASE: usize = 0xFFC0_0000;

/// First directory index inside kernel space: the distilled spec's 3 GiB
/// user / 1 GiB kernel split, `3 * 1024 * 1024 * 1024 / (4 MiB)`.
pub const KERNEL_SPLIT_DI: usize = 0x300;
/// The second-to-last directory slot: a scratch table reused for two
/// unrelated but never-simultaneous purposes — `new_directory`'s staged
/// copy of a fresh directory, and the single-page window `STUB_VADDR`
/// opens onto an arbitrary frame.
const STUB_DI: usize = PAGE_ENTRY_COUNT - 2;
/// A single scratch page (table index 0 of [`STUB_DI`]) used to read or
/// write a physical frame that isn't mapped anywhere else: the
/// copy-on-write resolver's private-copy step, and inspecting the
/// canonical kernel directory's slots while propagating a table.
const STUB_VADDR: usize = STUB_DI << 22;

/// Ring the entry grants access from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Supervisor,
    User,
}

/// How a frame is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    ReadWrite,
    ReadOnly,
    CopyOnWrite,
}

/// A packed 32-bit page table entry. Bit layout mirrors `page_table_entry`:
/// present(0) writable(1) user(2) write_through(3) cache_disabled(4)
/// accessed(5) dirty(6) buffer(7) global(8) copy_on_write(9) frame(12..32).
/// Bit 7 ("zero_" in the original) is repurposed to flag buffer-backed
/// pages, per `SPEC_FULL.md` §3's second-PTE-bit design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    const PRESENT: u32 = 1 << 0;
    const WRITABLE: u32 = 1 << 1;
    const USER: u32 = 1 << 2;
    const ACCESSED: u32 = 1 << 5;
    const DIRTY: u32 = 1 << 6;
    const BUFFER: u32 = 1 << 7;
    const COPY_ON_WRITE: u32 = 1 << 9;
    const FRAME_SHIFT: u32 = 12;

    pub const fn absent() -> Self {
        Self(0)
    }

    pub fn new(frame: FrameNumber, privilege: Privilege, mode: MapMode, buffer: bool) -> Self {
        let mut bits = Self::PRESENT | (frame.0 << Self::FRAME_SHIFT);
        if privilege == Privilege::User {
            bits |= Self::USER;
        }
        if buffer {
            bits |= Self::BUFFER;
        }
        match mode {
            MapMode::ReadWrite => bits |= Self::WRITABLE,
            MapMode::ReadOnly => {}
            MapMode::CopyOnWrite => bits |= Self::COPY_ON_WRITE,
        }
        Self(bits)
    }

    pub const fn present(&self) -> bool {
        self.0 & Self::PRESENT != 0
    }

    pub const fn writable(&self) -> bool {
        self.0 & Self::WRITABLE != 0
    }

    pub const fn copy_on_write(&self) -> bool {
        self.0 & Self::COPY_ON_WRITE != 0
    }

    pub const fn is_buffer(&self) -> bool {
        self.0 & Self::BUFFER != 0
    }

    pub const fn accessed(&self) -> bool {
        self.0 & Self::ACCESSED != 0
    }

    pub fn set_accessed(&mut self, flag: bool) {
        if flag {
            self.0 |= Self::ACCESSED;
        } else {
            self.0 &= !Self::ACCESSED;
        }
    }

    pub const fn dirty(&self) -> bool {
        self.0 & Self::DIRTY != 0
    }

    pub const fn frame(&self) -> FrameNumber {
        FrameNumber(self.0 >> Self::FRAME_SHIFT)
    }

    pub const fn privilege(&self) -> Privilege {
        if self.0 & Self::USER != 0 {
            Privilege::User
        } else {
            Privilege::Supervisor
        }
    }

    /// Same frame, with the writable bit set and copy-on-write cleared —
    /// the transition a successful COW fault resolution applies.
    pub fn make_writable(&self) -> Self {
        Self((self.0 | Self::WRITABLE) & !Self::COPY_ON_WRITE)
    }
}

#[repr(C)]
pub struct PageTable {
    pub entries: [PageTableEntry; PAGE_ENTRY_COUNT],
}

/// A packed 32-bit page directory entry: present(0) writable(1) user(2)
/// frame(12..32). Directory entries are never copy-on-write — only leaf
/// page-table entries are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDirectoryEntry(u32);

impl PageDirectoryEntry {
    const PRESENT: u32 = 1 << 0;
    const WRITABLE: u32 = 1 << 1;
    const USER: u32 = 1 << 2;
    const FRAME_SHIFT: u32 = 12;

    pub const fn absent() -> Self {
        Self(Self::WRITABLE)
    }

    pub fn new(frame: FrameNumber, privilege: Privilege) -> Self {
        let mut bits = Self::PRESENT | Self::WRITABLE | (frame.0 << Self::FRAME_SHIFT);
        if privilege == Privilege::User {
            bits |= Self::USER;
        }
        Self(bits)
    }

    pub const fn present(&self) -> bool {
        self.0 & Self::PRESENT != 0
    }

    pub const fn frame(&self) -> FrameNumber {
        FrameNumber(self.0 >> Self::FRAME_SHIFT)
    }
}

#[repr(C)]
pub struct PageDirectory {
    pub entries: [PageDirectoryEntry; PAGE_ENTRY_COUNT],
}

/// Directory index (bits 31:22) for `va`.
pub const fn directory_index(va: VirtualAddress) -> usize {
    ((va.as_u64() >> 22) & 0x3FF) as usize
}

/// Table index (bits 21:12) for `va`.
pub const fn table_index(va: VirtualAddress) -> usize {
    ((va.as_u64() >> 12) & 0x3FF) as usize
}

/// The 32-bit error code x86 pushes for a page fault.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultErrorCode(pub u32);

impl PageFaultErrorCode {
    pub const fn protection_violation(&self) -> bool {
        self.0 & 1 != 0
    }
    pub const fn write(&self) -> bool {
        self.0 & (1 << 1) != 0
    }
    pub const fn user_mode(&self) -> bool {
        self.0 & (1 << 2) != 0
    }
    pub const fn reserved_bit_violation(&self) -> bool {
        self.0 & (1 << 3) != 0
    }
    pub const fn instruction_fetch(&self) -> bool {
        self.0 & (1 << 4) != 0
    }
}

/// The directory every automaton's kernel-range slots are propagated
/// from. Never itself loaded into `cr3` — only read through the
/// [`STUB_VADDR`] window — and seeded once by whichever boot stage builds
/// the first automaton, since before that no directory exists to seed it
/// with.
static KERNEL_DIRECTORY_FRAME: spin::Mutex<Option<FrameNumber>> = spin::Mutex::new(None);

/// Designate `frame` as the canonical kernel directory. Idempotent by
/// convention, not enforced: bootstrap calls this exactly once.
pub fn set_kernel_directory(frame: FrameNumber) {
    *KERNEL_DIRECTORY_FRAME.lock() = Some(frame);
}

/// The canonical kernel directory frame, once bootstrap has designated
/// one.
pub fn kernel_directory_frame() -> Option<FrameNumber> {
    *KERNEL_DIRECTORY_FRAME.lock()
}

#[cfg(target_os = "none")]
mod hw {
    use super::*;
    use core::arch::asm;

    /// SAFETY: only valid while a Lily-built directory is loaded in `cr3`.
    unsafe fn directory() -> &'static mut PageDirectory {
        &mut *(PAGE_DIRECTORY_VADDR as *mut PageDirectory)
    }

    /// SAFETY: only valid while a Lily-built directory is loaded in `cr3`
    /// and its entry at `directory_index(va)` is present.
    unsafe fn table(va: VirtualAddress) -> &'static mut PageTable {
        let addr = PAGE_TABLE_AREA_BASE + directory_index(va) * PAGE_SIZE;
        &mut *(addr as *mut PageTable)
    }

    fn invlpg(va: usize) {
        unsafe {
            asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags));
        }
    }

    /// Invalidate the TLB entry for a single page. Exposed for the
    /// privileged `int 0x82` trap (`SPEC_FULL.md` §6): a privileged
    /// automaton manages mappings shared with others behind the kernel's
    /// back (e.g. the propagated kernel range) and must be able to ask
    /// for a stale translation to be dropped without tearing down and
    /// rebuilding the mapping itself.
    pub fn invalidate(va: VirtualAddress) {
        invlpg(va.as_usize());
    }

    /// Install a page table for `va`'s directory index, allocating and
    /// zeroing a fresh one unless this is a kernel-range slot some other
    /// automaton's directory already backs, in which case that table is
    /// shared in (§4.2 "kernel table propagation on first touch").
    fn ensure_table_present(va: VirtualAddress, privilege: Privilege) -> KernelResult<()> {
        let di = directory_index(va);
        if unsafe { directory() }.entries[di].present() {
            return Ok(());
        }
        if di >= KERNEL_SPLIT_DI && di != PAGE_ENTRY_COUNT - 1 {
            if propagate_kernel_table(va)? {
                return Ok(());
            }
            let dir = unsafe { directory() };
            expand_kernel(dir, di)?;
            return Ok(());
        }
        let table_frame = frame::manager().alloc()?;
        let dir = unsafe { directory() };
        dir.entries[di] = PageDirectoryEntry::new(table_frame, privilege);
        invlpg(PAGE_TABLE_AREA_BASE + di * PAGE_SIZE);
        let table = unsafe { table(va) };
        for entry in table.entries.iter_mut() {
            *entry = PageTableEntry::absent();
        }
        Ok(())
    }

    /// Map an arbitrary frame into the [`STUB_VADDR`] scratch window for
    /// the duration of `f`, then tear the mapping back down. The window's
    /// own directory slot, once backed, is left installed permanently —
    /// only the single leaf entry churns per call.
    fn with_stub_frame<R>(fr: FrameNumber, f: impl FnOnce(*mut u8) -> R) -> KernelResult<R> {
        if !unsafe { directory() }.entries[STUB_DI].present() {
            let table_frame = frame::manager().alloc()?;
            let dir = unsafe { directory() };
            dir.entries[STUB_DI] = PageDirectoryEntry::new(table_frame, Privilege::Supervisor);
            invlpg(PAGE_TABLE_AREA_BASE + STUB_DI * PAGE_SIZE);
            let table = unsafe { &mut *((PAGE_TABLE_AREA_BASE + STUB_DI * PAGE_SIZE) as *mut PageTable) };
            for entry in table.entries.iter_mut() {
                *entry = PageTableEntry::absent();
            }
        }
        let table = unsafe { &mut *((PAGE_TABLE_AREA_BASE + STUB_DI * PAGE_SIZE) as *mut PageTable) };
        table.entries[0] = PageTableEntry::new(fr, Privilege::Supervisor, MapMode::ReadWrite, false);
        invlpg(STUB_VADDR);
        let result = f(STUB_VADDR as *mut u8);
        table.entries[0] = PageTableEntry::absent();
        invlpg(STUB_VADDR);
        Ok(result)
    }

    /// Install a brand new kernel-range table, recording it into the
    /// canonical kernel directory (if one has been designated yet) so a
    /// later `propagate_kernel_table` in some other automaton can adopt
    /// the same table frame instead of diverging onto its own.
    fn expand_kernel(dir: &mut PageDirectory, di: usize) -> KernelResult<()> {
        let table_frame = frame::manager().alloc()?;
        dir.entries[di] = PageDirectoryEntry::new(table_frame, Privilege::Supervisor);
        invlpg(PAGE_TABLE_AREA_BASE + di * PAGE_SIZE);
        let table = unsafe { &mut *((PAGE_TABLE_AREA_BASE + di * PAGE_SIZE) as *mut PageTable) };
        for entry in table.entries.iter_mut() {
            *entry = PageTableEntry::absent();
        }
        if let Some(kernel_dir_frame) = kernel_directory_frame() {
            frame::manager().incref(table_frame, 1)?;
            with_stub_frame(kernel_dir_frame, |ptr| {
                // SAFETY: the scratch window is exactly PAGE_SIZE bytes,
                // matching a `PageDirectory`'s 1024 4-byte entries.
                let kdir = unsafe { &mut *(ptr as *mut PageDirectory) };
                kdir.entries[di] = PageDirectoryEntry::new(table_frame, Privilege::Supervisor);
            })?;
        }
        Ok(())
    }

    /// A kernel-range page fault whose current directory lacks the slot
    /// but the canonical kernel directory already has it is not a real
    /// fault: it is another automaton's directory catching up to a table
    /// installed after its own directory was built. Returns `Ok(true)` if
    /// the slot was adopted and the faulting instruction can be retried.
    pub fn propagate_kernel_table(va: VirtualAddress) -> KernelResult<bool> {
        let di = directory_index(va);
        if di < KERNEL_SPLIT_DI || di == PAGE_ENTRY_COUNT - 1 {
            return Ok(false);
        }
        if unsafe { directory() }.entries[di].present() {
            return Ok(false);
        }
        let Some(kernel_dir_frame) = kernel_directory_frame() else {
            return Ok(false);
        };
        let found = with_stub_frame(kernel_dir_frame, |ptr| {
            // SAFETY: see `expand_kernel`.
            let kdir = unsafe { &*(ptr as *const PageDirectory) };
            kdir.entries[di]
        })?;
        if !found.present() {
            return Ok(false);
        }
        frame::manager().incref(found.frame(), 1)?;
        let dir = unsafe { directory() };
        dir.entries[di] = PageDirectoryEntry::new(found.frame(), Privilege::Supervisor);
        invlpg(PAGE_TABLE_AREA_BASE + di * PAGE_SIZE);
        Ok(true)
    }

    /// Resolve a write fault against a copy-on-write page: promote it in
    /// place when this mapping is the frame's sole owner (refcount 1, and
    /// not the shared zero frame), otherwise allocate a private copy and
    /// remap onto it. Returns `Ok(false)` when `va`'s fault is not a COW
    /// fault at all — the error-code write bit is clear, the address
    /// isn't mapped, or the mapping isn't copy-on-write — so the caller
    /// can fall through to automaton-level handling.
    pub fn resolve_cow_fault(va: VirtualAddress, err: PageFaultErrorCode) -> KernelResult<bool> {
        if !err.write() {
            return Ok(false);
        }
        let Ok(e) = entry(va) else {
            return Ok(false);
        };
        if !e.copy_on_write() {
            return Ok(false);
        }

        let fr = e.frame();
        let page_va = va.as_usize() & !(PAGE_SIZE - 1);
        let sole_owner = frame::manager().refcount(fr).unwrap_or(0) <= 1 && fr != frame::manager().zero_frame();
        if sole_owner {
            set_entry(VirtualAddress::new(page_va as u64), e.make_writable());
            return Ok(true);
        }

        let new_frame = frame::manager().alloc()?;
        with_stub_frame(new_frame, |dst| {
            // SAFETY: `page_va` is the present page this fault occurred
            // on; `dst` is a freshly mapped PAGE_SIZE scratch window.
            unsafe {
                core::ptr::copy_nonoverlapping(page_va as *const u8, dst, PAGE_SIZE);
            }
        })?;
        set_entry(
            VirtualAddress::new(page_va as u64),
            PageTableEntry::new(new_frame, e.privilege(), MapMode::ReadWrite, e.is_buffer()),
        );
        // Buffer pages leave the old frame's refcount alone here: `Buffer::sync`
        // reconciles the stored frame id against the live PTE and performs this
        // same decref itself. Decrementing it here too would double-count.
        if !e.is_buffer() {
            frame::manager().decref(fr)?;
        }
        Ok(true)
    }

    pub fn map(
        va: VirtualAddress,
        fr: FrameNumber,
        privilege: Privilege,
        mode: MapMode,
        buffer: bool,
        adopt_frame: bool,
    ) -> KernelResult<()> {
        ensure_table_present(va, privilege)?;
        let ti = table_index(va);
        let table = unsafe { table(va) };
        if table.entries[ti].present() {
            return Err(KernelError::AreaOverlap);
        }
        table.entries[ti] = PageTableEntry::new(fr, privilege, mode, buffer);
        if !adopt_frame {
            frame::manager().incref(fr, 1)?;
        }
        invlpg(va.as_usize());
        Ok(())
    }

    pub fn remap(va: VirtualAddress, privilege: Privilege, mode: MapMode) -> KernelResult<()> {
        let dir = unsafe { directory() };
        if !dir.entries[directory_index(va)].present() {
            return Err(KernelError::UnmappedAddress { va: va.as_usize() });
        }
        let ti = table_index(va);
        let table = unsafe { table(va) };
        if !table.entries[ti].present() {
            return Err(KernelError::UnmappedAddress { va: va.as_usize() });
        }
        let fr = table.entries[ti].frame();
        let buffer = table.entries[ti].is_buffer();
        table.entries[ti] = PageTableEntry::new(fr, privilege, mode, buffer);
        invlpg(va.as_usize());
        Ok(())
    }

    pub fn unmap(va: VirtualAddress, decref: bool) -> KernelResult<()> {
        let dir = unsafe { directory() };
        if !dir.entries[directory_index(va)].present() {
            return Err(KernelError::DoubleUnmap { va: va.as_usize() });
        }
        let ti = table_index(va);
        let table = unsafe { table(va) };
        if !table.entries[ti].present() {
            return Err(KernelError::DoubleUnmap { va: va.as_usize() });
        }
        if decref {
            frame::manager().decref(table.entries[ti].frame())?;
        }
        table.entries[ti] = PageTableEntry::absent();
        invlpg(va.as_usize());
        Ok(())
    }

    pub fn entry(va: VirtualAddress) -> KernelResult<PageTableEntry> {
        let dir = unsafe { directory() };
        if !dir.entries[directory_index(va)].present() {
            return Err(KernelError::UnmappedAddress { va: va.as_usize() });
        }
        let table = unsafe { table(va) };
        let e = table.entries[table_index(va)];
        if !e.present() {
            return Err(KernelError::UnmappedAddress { va: va.as_usize() });
        }
        Ok(e)
    }

    pub fn set_entry(va: VirtualAddress, e: PageTableEntry) {
        let table = unsafe { table(va) };
        table.entries[table_index(va)] = e;
        invlpg(va.as_usize());
    }

    pub fn switch_to_directory(frame: FrameNumber) -> FrameNumber {
        let old: u64;
        unsafe {
            asm!("mov {}, cr3", out(reg) old, options(nomem, nostack, preserves_flags));
            asm!("mov cr3, {}", in(reg) frame.address().as_u64(), options(nostack, preserves_flags));
        }
        FrameNumber::from_address(super::super::PhysicalAddress(old))
    }

    pub fn current_directory_frame() -> FrameNumber {
        let dir = unsafe { directory() };
        dir.entries[PAGE_ENTRY_COUNT - 1].frame()
    }

    /// Build a fresh directory for a new automaton: share every kernel-space
    /// entry with the currently active directory (refcounting each shared
    /// table), then self-map the new directory's own last entry. Mirrors
    /// `page_directory`'s constructor in `vm.hpp`.
    pub fn new_directory(kernel_range_start: usize) -> KernelResult<FrameNumber> {
        let new_frame = frame::manager().alloc()?;

        // The new directory isn't mapped anywhere yet, so borrow the
        // self-map window to reach it: temporarily install it as a page
        // table under the current directory's last-but-one slot, write
        // through that window, then drop the temporary mapping. This is
        // the same "reuse the page-table address space" trick `vm.hpp`
        // documents via `get_stub1`.
        let current = unsafe { directory() };
        let start_di = directory_index(VirtualAddress::new(kernel_range_start as u64));
        let stub_di = PAGE_ENTRY_COUNT - 2;
        current.entries[stub_di] = PageDirectoryEntry::new(new_frame, Privilege::Supervisor);
        invlpg(PAGE_TABLE_AREA_BASE + stub_di * PAGE_SIZE);
        let staged = unsafe { &mut *((PAGE_TABLE_AREA_BASE + stub_di * PAGE_SIZE) as *mut PageDirectory) };
        for entry in staged.entries.iter_mut() {
            *entry = PageDirectoryEntry::absent();
        }
        for di in start_di..PAGE_ENTRY_COUNT - 1 {
            // stub_di itself is only present because of the scratch mapping
            // just installed above; it names no real kernel table and must
            // not be copied into the new directory.
            if di == stub_di {
                continue;
            }
            if current.entries[di].present() {
                let table_frame = current.entries[di].frame();
                frame::manager().incref(table_frame, 1)?;
                staged.entries[di] = PageDirectoryEntry::new(table_frame, Privilege::Supervisor);
            }
        }
        staged.entries[PAGE_ENTRY_COUNT - 1] = PageDirectoryEntry::new(new_frame, Privilege::Supervisor);
        frame::manager().incref(new_frame, 1)?;
        current.entries[stub_di] = PageDirectoryEntry::absent();
        invlpg(PAGE_TABLE_AREA_BASE + stub_di * PAGE_SIZE);
        Ok(new_frame)
    }

    /// Build and load the very first Lily-owned directory. Unlike
    /// [`new_directory`], there is no self-mapped directory yet to borrow
    /// the scratch-window trick from, so this writes the fresh directory
    /// frame directly through the bootloader's identity map, which is
    /// still intact at this point in boot. Self-maps the directory's last
    /// slot, loads it into `cr3`, and designates it the canonical kernel
    /// directory.
    pub fn bootstrap_first_directory() -> KernelResult<FrameNumber> {
        let frame = frame::manager().alloc()?;
        let phys = frame.address().as_u64() as *mut PageDirectory;
        // SAFETY: the bootloader identity-maps physical memory at this
        // boot stage, so `phys` is a valid pointer to the freshly
        // allocated directory frame. Nothing else can observe this frame
        // yet, since the frame manager just handed it out.
        let dir = unsafe { &mut *phys };
        for entry in dir.entries.iter_mut() {
            *entry = PageDirectoryEntry::absent();
        }
        dir.entries[PAGE_ENTRY_COUNT - 1] = PageDirectoryEntry::new(frame, Privilege::Supervisor);
        frame::manager().incref(frame, 1)?;
        switch_to_directory(frame);
        set_kernel_directory(frame);
        Ok(frame)
    }
}

#[cfg(target_os = "none")]
pub use hw::*;

/// Host-target stand-ins for every hardware-only entry point `hw` provides.
/// None of these can be given real semantics without an actual page
/// directory loaded into `cr3`, so each panics if reached. This keeps
/// `mm::buffer`, `automaton::automaton`, and `sched` — which call these
/// unconditionally, since on bare metal the call is always legitimate —
/// compiling for the host target too, so the pure-software unit tests
/// throughout the crate (frame manager, buffer bookkeeping that never maps,
/// binding tables, scheduler queues) can run under a plain `cargo test`.
/// Any test that actually needs live paging belongs under `kernel/tests/`
/// instead, run bare-metal under QEMU.
#[cfg(not(target_os = "none"))]
mod host_stubs {
    use super::*;

    pub fn bootstrap_first_directory() -> KernelResult<FrameNumber> {
        panic!("bootstrap_first_directory requires live paging");
    }

    pub fn map(_va: VirtualAddress, _fr: FrameNumber, _privilege: Privilege, _mode: MapMode, _buffer: bool, _adopt_frame: bool) -> KernelResult<()> {
        panic!("vm::map requires live paging");
    }

    pub fn remap(_va: VirtualAddress, _privilege: Privilege, _mode: MapMode) -> KernelResult<()> {
        panic!("vm::remap requires live paging");
    }

    pub fn unmap(_va: VirtualAddress, _decref: bool) -> KernelResult<()> {
        panic!("vm::unmap requires live paging");
    }

    pub fn entry(_va: VirtualAddress) -> KernelResult<PageTableEntry> {
        panic!("vm::entry requires live paging");
    }

    pub fn set_entry(_va: VirtualAddress, _e: PageTableEntry) {
        panic!("vm::set_entry requires live paging");
    }

    pub fn switch_to_directory(_frame: FrameNumber) -> FrameNumber {
        panic!("vm::switch_to_directory requires live paging");
    }

    pub fn current_directory_frame() -> FrameNumber {
        panic!("vm::current_directory_frame requires live paging");
    }

    pub fn new_directory(_kernel_range_start: usize) -> KernelResult<FrameNumber> {
        panic!("vm::new_directory requires live paging");
    }

    pub fn resolve_cow_fault(_va: VirtualAddress, _err: PageFaultErrorCode) -> KernelResult<bool> {
        panic!("vm::resolve_cow_fault requires live paging");
    }

    pub fn propagate_kernel_table(_va: VirtualAddress) -> KernelResult<bool> {
        panic!("vm::propagate_kernel_table requires live paging");
    }

    pub fn invalidate(_va: VirtualAddress) {
        panic!("vm::invalidate requires live paging");
    }
}

#[cfg(not(target_os = "none"))]
pub use host_stubs::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_table_entry_round_trips_frame_and_mode() {
        let e = PageTableEntry::new(FrameNumber(0x1234), Privilege::User, MapMode::CopyOnWrite, false);
        assert_eq!(e.frame(), FrameNumber(0x1234));
        assert!(e.copy_on_write());
        assert!(!e.writable());
        assert!(e.present());
    }

    #[test]
    fn make_writable_clears_cow_and_sets_writable() {
        let e = PageTableEntry::new(FrameNumber(7), Privilege::Supervisor, MapMode::CopyOnWrite, false);
        let w = e.make_writable();
        assert!(w.writable());
        assert!(!w.copy_on_write());
        assert_eq!(w.frame(), FrameNumber(7));
    }

    #[test]
    fn buffer_bit_is_independent_of_cow() {
        let e = PageTableEntry::new(FrameNumber(1), Privilege::User, MapMode::ReadWrite, true);
        assert!(e.is_buffer());
        assert!(!e.copy_on_write());
    }

    #[test]
    fn directory_and_table_index_split_address() {
        let va = VirtualAddress::new(0xC010_2000);
        assert_eq!(directory_index(va), 0x300);
        assert_eq!(table_index(va), 0x102);
    }

    #[test]
    fn page_fault_error_decodes_bits() {
        let e = PageFaultErrorCode(0b0111);
        assert!(e.protection_violation());
        assert!(e.write());
        assert!(e.user_mode());
        assert!(!e.instruction_fetch());
    }

    #[test]
    fn absent_entry_is_not_present() {
        assert!(!PageTableEntry::absent().present());
        assert!(!PageDirectoryEntry::absent().present());
    }

    #[test]
    fn privilege_round_trips_through_the_user_bit() {
        let user = PageTableEntry::new(FrameNumber(1), Privilege::User, MapMode::ReadWrite, false);
        let kernel = PageTableEntry::new(FrameNumber(1), Privilege::Supervisor, MapMode::ReadWrite, false);
        assert_eq!(user.privilege(), Privilege::User);
        assert_eq!(kernel.privilege(), Privilege::Supervisor);
    }

    #[test]
    fn kernel_split_di_is_below_the_reserved_self_map_slots() {
        assert!(KERNEL_SPLIT_DI < PAGE_ENTRY_COUNT - 2);
    }
}
