//! Physical frame manager: a collection of region (stack) allocators.
//!
//! Grounded on `stack_allocator.{hpp,cpp}` and `frame_manager.{hpp,cpp}`
//! from the original kernel. Each region covers a contiguous interval of
//! frame numbers no larger than [`RegionAllocator::MAX_REGION_SIZE`] frames
//! (so its entry table fits comfortably under 64 KiB of 16-bit entries) and
//! stores one [`FrameEntry`] per frame: either the next index on the
//! region's intrusive free list, or the negated reference count of an
//! allocated frame. A frame is on exactly one region's free list iff its
//! reference count is zero — this is the core invariant `decref`/`alloc`
//! maintain.

extern crate alloc;

use alloc::vec::Vec;

use spin::Mutex;

use super::FrameNumber;
use crate::error::{KernelError, KernelResult};

/// Backing storage for one frame's free-list link or negated refcount.
type FrameEntry = i16;

/// Sentinel marking the end of a region's free list.
const EOL: FrameEntry = i16::MIN;

/// A region of contiguous frames managed as an intrusive free-list stack.
struct RegionAllocator {
    begin: u32,
    end: u32,
    free_head: FrameEntry,
    entries: Vec<FrameEntry>,
}

impl RegionAllocator {
    /// Largest number of frames a single region may cover. Chosen (as in
    /// the original) so the 16-bit entry table comfortably fits under 64 KiB.
    const MAX_REGION_SIZE: u32 = 0x7FFF;

    fn new(begin: u32, end: u32) -> Self {
        debug_assert!(begin < end);
        debug_assert!(end - begin <= Self::MAX_REGION_SIZE);
        let size = (end - begin) as usize;
        let mut entries = Vec::with_capacity(size);
        for k in 0..size {
            entries.push(if k + 1 < size { (k + 1) as FrameEntry } else { EOL });
        }
        Self {
            begin,
            end,
            free_head: 0,
            entries,
        }
    }

    fn contains(&self, frame: u32) -> bool {
        frame >= self.begin && frame < self.end
    }

    fn full(&self) -> bool {
        self.free_head == EOL
    }

    fn alloc(&mut self) -> Option<FrameNumber> {
        if self.full() {
            return None;
        }
        let idx = self.free_head as usize;
        self.free_head = self.entries[idx];
        self.entries[idx] = -1;
        Some(FrameNumber(self.begin + idx as u32))
    }

    fn mark_as_used(&mut self, frame: u32) {
        let idx = (frame - self.begin) as usize;
        if self.entries[idx] >= 0 {
            // Frame is currently on the free list; splice it out.
            if self.free_head as usize == idx {
                self.free_head = self.entries[idx];
            } else {
                let mut cursor = self.free_head;
                while cursor != EOL && self.entries[cursor as usize] as usize != idx {
                    cursor = self.entries[cursor as usize];
                }
                debug_assert!(cursor != EOL, "frame not found on free list");
                self.entries[cursor as usize] = self.entries[idx];
            }
            self.entries[idx] = -1;
        }
    }

    fn incref(&mut self, frame: u32, count: u32) -> KernelResult<u32> {
        let idx = (frame - self.begin) as usize;
        if self.entries[idx] >= 0 {
            return Err(KernelError::FrameTableCorrupt { frame });
        }
        let refcount = -(self.entries[idx] as i32);
        let new_refcount = refcount + count as i32;
        if new_refcount > i16::MAX as i32 {
            return Err(KernelError::FrameTableCorrupt { frame });
        }
        self.entries[idx] = -(new_refcount as FrameEntry);
        Ok(new_refcount as u32)
    }

    fn decref(&mut self, frame: u32) -> KernelResult<u32> {
        let idx = (frame - self.begin) as usize;
        if self.entries[idx] >= 0 {
            return Err(KernelError::FrameTableCorrupt { frame });
        }
        let refcount = -(self.entries[idx] as i32) - 1;
        self.entries[idx] = -(refcount as FrameEntry);
        if refcount == 0 {
            self.entries[idx] = self.free_head;
            self.free_head = idx as FrameEntry;
        }
        Ok(refcount as u32)
    }

    fn refcount(&self, frame: u32) -> Option<u32> {
        let idx = (frame - self.begin) as usize;
        let entry = self.entries[idx];
        if entry >= 0 {
            None
        } else {
            Some((-entry) as u32)
        }
    }
}

/// The frame manager: a list of region allocators plus the shared zero
/// frame, established lazily by the first call to [`FrameManagerInner::add`].
struct FrameManagerInner {
    regions: Vec<RegionAllocator>,
    zero_frame: Option<FrameNumber>,
}

impl FrameManagerInner {
    const fn new() -> Self {
        Self {
            regions: Vec::new(),
            zero_frame: None,
        }
    }

    fn add(&mut self, begin: FrameNumber, end: FrameNumber) {
        let mut cursor = begin.0;
        while cursor < end.0 {
            let chunk_end = (cursor + RegionAllocator::MAX_REGION_SIZE).min(end.0);
            if chunk_end > cursor {
                self.regions.push(RegionAllocator::new(cursor, chunk_end));
            }
            cursor = chunk_end;
        }
        if self.zero_frame.is_none() {
            if let Ok(frame) = self.alloc() {
                self.zero_frame = Some(frame);
            }
        }
    }

    fn find_allocator_mut(&mut self, frame: FrameNumber) -> Option<&mut RegionAllocator> {
        self.regions.iter_mut().find(|r| r.contains(frame.0))
    }

    fn alloc(&mut self) -> KernelResult<FrameNumber> {
        self.regions
            .iter_mut()
            .find(|r| !r.full())
            .and_then(|r| r.alloc())
            .ok_or(KernelError::FramesExhausted)
    }

    fn mark_as_used(&mut self, frame: FrameNumber) -> KernelResult<()> {
        self.find_allocator_mut(frame)
            .map(|r| r.mark_as_used(frame.0))
            .ok_or(KernelError::FrameTableCorrupt { frame: frame.0 })
    }

    fn incref(&mut self, frame: FrameNumber, count: u32) -> KernelResult<u32> {
        self.find_allocator_mut(frame)
            .ok_or(KernelError::FrameTableCorrupt { frame: frame.0 })?
            .incref(frame.0, count)
    }

    fn decref(&mut self, frame: FrameNumber) -> KernelResult<u32> {
        self.find_allocator_mut(frame)
            .ok_or(KernelError::FrameTableCorrupt { frame: frame.0 })?
            .decref(frame.0)
    }

    fn refcount(&self, frame: FrameNumber) -> Option<u32> {
        self.regions
            .iter()
            .find(|r| r.contains(frame.0))
            .and_then(|r| r.refcount(frame.0))
    }
}

/// Public handle to the singleton frame manager.
pub struct FrameManager {
    inner: Mutex<FrameManagerInner>,
}

impl FrameManager {
    const fn new() -> Self {
        Self {
            inner: Mutex::new(FrameManagerInner::new()),
        }
    }

    /// Register a span of physical memory `[begin, end)` as available,
    /// splitting it into regions of at most
    /// [`RegionAllocator::MAX_REGION_SIZE`] frames.
    pub fn add(&self, begin: FrameNumber, end: FrameNumber) {
        self.inner.lock().add(begin, end);
    }

    /// Allocate a fresh frame with refcount 1. Fatal (taxon 1) if none
    /// remain: a kernel that cannot back a mapping with a frame cannot make
    /// forward progress.
    pub fn alloc(&self) -> KernelResult<FrameNumber> {
        self.inner.lock().alloc()
    }

    /// Remove a specific frame from its region's free list without
    /// allocating it through the normal path — used at boot to reconcile
    /// frames already in use (e.g. backing the kernel image).
    pub fn mark_as_used(&self, frame: FrameNumber) -> KernelResult<()> {
        self.inner.lock().mark_as_used(frame)
    }

    /// Increment `frame`'s reference count by `count`, returning the new
    /// count.
    pub fn incref(&self, frame: FrameNumber, count: u32) -> KernelResult<u32> {
        self.inner.lock().incref(frame, count)
    }

    /// Decrement `frame`'s reference count, returning the new count. A
    /// frame whose count reaches zero is returned to its region's free
    /// list.
    pub fn decref(&self, frame: FrameNumber) -> KernelResult<u32> {
        self.inner.lock().decref(frame)
    }

    /// Current reference count of `frame`, or `None` if it is free.
    pub fn refcount(&self, frame: FrameNumber) -> Option<u32> {
        self.inner.lock().refcount(frame)
    }

    /// The distinguished all-zeros frame shared by every automaton for
    /// fresh pages. Panics if called before any memory has been
    /// [`add`](Self::add)ed — this is a boot-ordering bug, not a runtime
    /// condition.
    pub fn zero_frame(&self) -> FrameNumber {
        self.inner
            .lock()
            .zero_frame
            .expect("zero_frame() called before frame::manager().add()")
    }
}

static FRAME_MANAGER: FrameManager = FrameManager::new();

/// Access the global frame manager.
pub fn manager() -> &'static FrameManager {
    &FRAME_MANAGER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_decref_frees_frame() {
        let fm = FrameManager::new();
        fm.add(FrameNumber(0), FrameNumber(4));
        let f = fm.alloc().unwrap();
        assert_eq!(fm.refcount(f), Some(1));
        assert_eq!(fm.decref(f).unwrap(), 0);
        assert_eq!(fm.refcount(f), None);
    }

    #[test]
    fn incref_tracks_sharing() {
        let fm = FrameManager::new();
        fm.add(FrameNumber(0), FrameNumber(4));
        let f = fm.alloc().unwrap();
        assert_eq!(fm.incref(f, 1).unwrap(), 2);
        assert_eq!(fm.decref(f).unwrap(), 1);
        assert_eq!(fm.decref(f).unwrap(), 0);
    }

    #[test]
    fn alloc_skips_full_region() {
        let fm = FrameManager::new();
        // Two tiny regions; exhaust the first, confirm the second serves.
        fm.add(FrameNumber(0), FrameNumber(1));
        fm.add(FrameNumber(1), FrameNumber(2));
        let first = fm.alloc().unwrap();
        assert_eq!(first, FrameNumber(0));
        let second = fm.alloc().unwrap();
        assert_eq!(second, FrameNumber(1));
        assert!(fm.alloc().is_err());
    }

    #[test]
    fn mark_as_used_removes_from_free_list() {
        let fm = FrameManager::new();
        fm.add(FrameNumber(0), FrameNumber(2));
        fm.mark_as_used(FrameNumber(1)).unwrap();
        let f = fm.alloc().unwrap();
        assert_eq!(f, FrameNumber(0));
        assert!(fm.alloc().is_err());
    }

    #[test]
    fn zero_frame_is_stable() {
        let fm = FrameManager::new();
        fm.add(FrameNumber(0), FrameNumber(8));
        let z1 = fm.zero_frame();
        let z2 = fm.zero_frame();
        assert_eq!(z1, z2);
    }
}
