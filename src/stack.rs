//! The shared physical stack and the per-coroutine save/restore protocol.
//!
//! A single contiguous stack region is shared by every coroutine on this
//! scheduler, and at most one of them has live frames on it at any
//! instant. Suspending a coroutine means copying its live bytes out to a
//! heap buffer it owns; resuming means copying them back to the same
//! fixed address range.

use context::stack::ProtectedFixedSizeStack;
use std::ptr;

use crate::error::{Error, Result};

/// Maximum configurable shared-stack size. Exceeding this at
/// configuration time is a programming error, trapped
/// rather than returned.
pub const MAX_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Default shared-stack size.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// The single physical stack all coroutines on a scheduler execute on.
pub struct SharedStack {
    inner: ProtectedFixedSizeStack,
}

impl SharedStack {
    pub fn new(size: usize) -> Result<Self> {
        assert!(
            size <= MAX_STACK_SIZE,
            "shared stack size {size} exceeds MAX_STACK_SIZE ({MAX_STACK_SIZE})"
        );
        let inner = ProtectedFixedSizeStack::new(size)
            .map_err(|e| Error::StackAlloc(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        Ok(SharedStack { inner })
    }

    /// High address: `shared_base + S`. The stack grows toward lower
    /// addresses from here.
    pub fn top(&self) -> *mut u8 {
        self.inner.top() as *mut u8
    }

    pub fn size(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn as_context_stack(&self) -> &ProtectedFixedSizeStack {
        &self.inner
    }
}

/// A suspended coroutine's copy of its live stack frame.
///
/// Capacity grows monotonically and is never shrunk back down:
/// reallocating on every suspend would defeat the point of sizing by
/// high-water mark.
#[derive(Default)]
pub struct SavedStack {
    buf: Vec<u8>,
    len: usize,
}

impl SavedStack {
    pub fn new() -> Self {
        SavedStack { buf: Vec::new(), len: 0 }
    }

    /// Bytes currently saved (the live size at last suspension), as
    /// opposed to `self.buf.len()` which is the high-water capacity.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `[sp, top)` of `shared` into this buffer.
    ///
    /// # Safety
    /// `sp` must point into `shared`'s live range, i.e. be the address of
    /// a local variable taken while running on `shared`.
    pub unsafe fn save(&mut self, shared: &SharedStack, sp: *const u8) {
        let top = shared.top();
        let live = top as usize - sp as usize;
        assert!(
            live <= shared.size(),
            "stack overflow: live region {live} exceeds shared stack of {} bytes",
            shared.size()
        );
        if self.buf.len() < live {
            self.buf.resize(live, 0);
        }
        ptr::copy_nonoverlapping(sp, self.buf.as_mut_ptr(), live);
        self.len = live;
    }

    /// Copy this buffer's `len` bytes back to `[top - len, top)` of
    /// `shared`. A no-op for a coroutine that has never suspended (`len
    /// == 0`, i.e. still `NEW`).
    ///
    /// # Safety
    /// Must only be called immediately before switching execution onto
    /// `shared` for this coroutine; no other coroutine's frames may
    /// currently occupy `shared`.
    pub unsafe fn load(&self, shared: &SharedStack) {
        if self.len == 0 {
            return;
        }
        let top = shared.top();
        let dest = top.sub(self.len);
        ptr::copy_nonoverlapping(self.buf.as_ptr(), dest, self.len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips_bytes() {
        let shared = SharedStack::new(DEFAULT_STACK_SIZE).unwrap();
        let mut saved = SavedStack::new();

        // Simulate a small live frame near the top of the shared stack by
        // writing a known pattern directly, then saving/loading it.
        let top = shared.top();
        let live_len = 256usize;
        let sp = unsafe { top.sub(live_len) };
        let pattern: Vec<u8> = (0..live_len as u8).collect();
        unsafe {
            ptr::copy_nonoverlapping(pattern.as_ptr(), sp, live_len);
            saved.save(&shared, sp);
        }
        assert_eq!(saved.len(), live_len);

        // Clobber the region, then load should restore the pattern.
        unsafe {
            ptr::write_bytes(sp, 0xAA, live_len);
            saved.load(&shared);
            let restored = std::slice::from_raw_parts(sp, live_len);
            assert_eq!(restored, pattern.as_slice());
        }
    }

    #[test]
    fn capacity_never_shrinks_across_saves() {
        let shared = SharedStack::new(DEFAULT_STACK_SIZE).unwrap();
        let mut saved = SavedStack::new();
        let top = shared.top();

        unsafe {
            let sp_big = top.sub(4096);
            saved.save(&shared, sp_big);
        }
        let cap_after_big = saved.buf.len();
        assert_eq!(saved.len(), 4096);

        unsafe {
            let sp_small = top.sub(64);
            saved.save(&shared, sp_small);
        }
        assert_eq!(saved.len(), 64);
        assert_eq!(saved.buf.len(), cap_after_big, "capacity must not shrink");
    }
}
