//! RAII guards for kernel resources: ensure cleanup happens on every
//! return path, including early errors and panics unwinding through a
//! scope, without each call site repeating the teardown logic by hand.

use core::ops::{Deref, DerefMut};

use spin::MutexGuard;

use crate::mm::frame;
use crate::mm::FrameNumber;
use crate::println;

/// Releases a reference on a physical frame when dropped, via
/// [`frame::manager`]'s refcounting `decref`. Used by call sites that
/// allocate a frame for a scratch purpose and want it released on every
/// exit path rather than threading an explicit `decref` through each
/// error branch.
pub struct FrameGuard {
    frame: FrameNumber,
}

impl FrameGuard {
    pub fn new(frame: FrameNumber) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> FrameNumber {
        self.frame
    }

    /// Release ownership of the frame without decrementing its refcount.
    pub fn leak(self) -> FrameNumber {
        let frame = self.frame;
        core::mem::forget(self);
        frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Err(e) = frame::manager().decref(self.frame) {
            println!("[RAII] Warning: failed to release frame {:?}: {}", self.frame, e);
        }
    }
}

/// RAII lock guard that logs acquisition and release, for tracking down
/// contention or deadlocks on a kernel singleton's lock during bring-up.
pub struct TrackedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    #[allow(dead_code)]
    name: &'static str,
}

impl<'a, T> TrackedMutexGuard<'a, T> {
    pub fn new(guard: MutexGuard<'a, T>, name: &'static str) -> Self {
        println!("[RAII] Acquired lock: {}", name);
        Self { guard, name }
    }
}

impl<T> Drop for TrackedMutexGuard<'_, T> {
    fn drop(&mut self) {
        println!("[RAII] Released lock: {}", self.name);
    }
}

impl<T> Deref for TrackedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Run cleanup code on drop, regardless of which path leaves the scope.
#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

/// Generic scope guard that runs cleanup code on drop.
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Cancel the cleanup.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_guard() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| {
                cleaned = true;
            });
        }
        assert!(cleaned);
    }

    #[test]
    fn test_scope_guard_cancel() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| {
                cleaned = true;
            });
            guard.cancel();
        }
        assert!(!cleaned);
    }

}
