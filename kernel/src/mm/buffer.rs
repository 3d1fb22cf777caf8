//! Copy-on-write buffers: the unit of data transfer between automata.
//!
//! Grounded on `buffer.hpp`. A buffer is an ordered list of frames,
//! optionally mapped into its owning automaton's address space in
//! copy-on-write mode. Because COW page faults silently swap in fresh
//! frames without the buffer's knowledge, every operation that reads the
//! frame list first calls [`Buffer::sync`] to reconcile it against
//! whatever is actually mapped — "synchronize before share" is the buffer
//! module's central correctness contract (`SPEC_FULL.md` §3).

extern crate alloc;

use alloc::vec::Vec;

use super::{frame, vm, FrameNumber, VirtualAddress};
use crate::error::{KernelError, KernelResult};

/// An ordered list of frames, mappable copy-on-write into one automaton.
pub struct Buffer {
    mapping: Option<VirtualAddress>,
    frames: Vec<FrameNumber>,
}

impl Buffer {
    /// A fresh buffer of `size` frames, all aliasing the shared zero frame.
    pub fn new(size: usize) -> KernelResult<Self> {
        let zero = frame::manager().zero_frame();
        if size > 0 {
            frame::manager().incref(zero, size as u32)?;
        }
        Ok(Self {
            mapping: None,
            frames: alloc::vec![zero; size],
        })
    }

    /// A new buffer holding frames `[begin, end)` copied out of `other`,
    /// after synchronizing that range.
    pub fn clone_range(other: &mut Buffer, begin: usize, end: usize) -> KernelResult<Self> {
        other.sync(begin, end)?;
        let frames = other.frames[begin..end].to_vec();
        for &f in &frames {
            frame::manager().incref(f, 1)?;
        }
        Ok(Self {
            mapping: None,
            frames,
        })
    }

    /// A full copy of an already-synchronized buffer, used to hand an
    /// output action's buffer to each bound input action.
    pub fn duplicate(other: &Buffer) -> KernelResult<Self> {
        for &f in &other.frames {
            frame::manager().incref(f, 1)?;
        }
        Ok(Self {
            mapping: None,
            frames: other.frames.clone(),
        })
    }

    pub fn size(&self) -> usize {
        self.frames.len()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Map the buffer starting at `begin`, rounded down to a page boundary.
    pub fn map_begin(&mut self, begin: VirtualAddress, privilege: vm::Privilege) -> KernelResult<VirtualAddress> {
        if self.mapping.is_some() {
            return Err(KernelError::BufferMapped { id: 0 });
        }
        let start = VirtualAddress::new(begin.as_u64() & !(vm::PAGE_SIZE as u64 - 1));
        for (idx, &f) in self.frames.iter().enumerate() {
            vm::map(
                start.add(idx * vm::PAGE_SIZE),
                f,
                privilege,
                vm::MapMode::CopyOnWrite,
                true,
                true,
            )?;
        }
        self.mapping = Some(start);
        Ok(start)
    }

    /// Unmap the buffer, synchronizing first so the frame list reflects
    /// whatever COW faulting installed while it was mapped.
    pub fn unmap(&mut self) -> KernelResult<()> {
        if let Some(start) = self.mapping {
            self.sync(0, self.frames.len())?;
            for idx in 0..self.frames.len() {
                vm::unmap(start.add(idx * vm::PAGE_SIZE), false)?;
            }
            self.mapping = None;
        }
        Ok(())
    }

    /// Grow or shrink the buffer. The buffer must not be mapped.
    pub fn resize(&mut self, size: usize) -> KernelResult<()> {
        if self.mapping.is_some() {
            return Err(KernelError::BufferMapped { id: 0 });
        }
        let old_size = self.frames.len();
        if size < old_size {
            for _ in size..old_size {
                let f = self.frames.pop().expect("checked size < old_size");
                frame::manager().decref(f)?;
            }
        } else if size > old_size {
            let zero = frame::manager().zero_frame();
            frame::manager().incref(zero, (size - old_size) as u32)?;
            self.frames.resize(size, zero);
        }
        Ok(())
    }

    /// Append frames `[begin, end)` of `other` (synchronized first),
    /// returning the offset at which they were appended.
    pub fn append(&mut self, other: &mut Buffer, begin: usize, end: usize) -> KernelResult<usize> {
        if self.mapping.is_some() {
            return Err(KernelError::BufferMapped { id: 0 });
        }
        other.sync(begin, end)?;
        let old_size = self.frames.len();
        self.frames.extend_from_slice(&other.frames[begin..end]);
        for &f in &self.frames[old_size..] {
            frame::manager().incref(f, 1)?;
        }
        Ok(old_size)
    }

    /// Append a single frame directly, bypassing another buffer. The
    /// buffer must not be mapped.
    pub fn append_frame(&mut self, f: FrameNumber) -> KernelResult<()> {
        if self.mapping.is_some() {
            return Err(KernelError::BufferMapped { id: 0 });
        }
        frame::manager().incref(f, 1)?;
        self.frames.push(f);
        Ok(())
    }

    /// Replace frames `[dst_begin, dst_begin + (src_end - src_begin))` with
    /// frames copied (by reference) from `src`'s synchronized range.
    /// Re-maps the replaced range in place if this buffer is mapped.
    pub fn assign(
        &mut self,
        dst_begin: usize,
        src: &mut Buffer,
        src_begin: usize,
        src_end: usize,
        privilege: vm::Privilege,
    ) -> KernelResult<()> {
        src.sync(src_begin, src_end)?;
        for i in 0..(src_end - src_begin) {
            let dst_idx = dst_begin + i;
            if let Some(start) = self.mapping {
                vm::unmap(start.add(dst_idx * vm::PAGE_SIZE), false)?;
            }
            frame::manager().decref(self.frames[dst_idx])?;
            let new_frame = src.frames[src_begin + i];
            self.frames[dst_idx] = new_frame;
            frame::manager().incref(new_frame, 1)?;
            if let Some(start) = self.mapping {
                vm::map(
                    start.add(dst_idx * vm::PAGE_SIZE),
                    new_frame,
                    privilege,
                    vm::MapMode::CopyOnWrite,
                    true,
                    true,
                )?;
            }
        }
        Ok(())
    }

    /// Reconcile `frame_list[begin..end]` against whatever is actually
    /// mapped — COW faulting installs fresh frames transparently, so the
    /// stored list can go stale the instant the buffer is written through.
    /// A no-op when the buffer is not mapped.
    pub fn sync(&mut self, begin: usize, end: usize) -> KernelResult<()> {
        let Some(start) = self.mapping else {
            return Ok(());
        };
        for idx in begin..end {
            let va = start.add(idx * vm::PAGE_SIZE);
            let actual = vm::entry(va)?.frame();
            if self.frames[idx] != actual {
                frame::manager().decref(self.frames[idx])?;
                frame::manager().incref(actual, 1)?;
                self.frames[idx] = actual;
                vm::remap(va, vm::Privilege::User, vm::MapMode::CopyOnWrite)?;
            }
        }
        Ok(())
    }

    pub fn frames(&self) -> &[FrameNumber] {
        &self.frames
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let _ = self.unmap();
        for &f in &self.frames {
            let _ = frame::manager().decref(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_aliases_zero_frame() {
        frame::manager().add(FrameNumber(0), FrameNumber(16));
        let b = Buffer::new(3).unwrap();
        assert_eq!(b.size(), 3);
        assert!(b.frames().iter().all(|&f| f == frame::manager().zero_frame()));
    }

    #[test]
    fn resize_grows_and_shrinks() {
        frame::manager().add(FrameNumber(16), FrameNumber(32));
        let mut b = Buffer::new(2).unwrap();
        b.resize(5).unwrap();
        assert_eq!(b.size(), 5);
        b.resize(1).unwrap();
        assert_eq!(b.size(), 1);
    }

    #[test]
    fn append_frame_extends_unmapped_buffer() {
        frame::manager().add(FrameNumber(32), FrameNumber(48));
        let mut b = Buffer::new(0).unwrap();
        let f = frame::manager().alloc().unwrap();
        b.append_frame(f).unwrap();
        assert_eq!(b.size(), 1);
        assert_eq!(b.frames()[0], f);
    }

    #[test]
    fn duplicate_shares_frames_with_incremented_refcount() {
        frame::manager().add(FrameNumber(48), FrameNumber(64));
        let mut a = Buffer::new(2).unwrap();
        let f = frame::manager().alloc().unwrap();
        a.append_frame(f).unwrap();
        let before = frame::manager().refcount(f).unwrap();
        let b = Buffer::duplicate(&a).unwrap();
        assert_eq!(frame::manager().refcount(f).unwrap(), before + 1);
        assert_eq!(b.frames(), a.frames());
    }
}
