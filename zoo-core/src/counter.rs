//! The unsynchronized counter abused by the data race scenario.
//!
//! # Safety
//!
//! [`SharedCounter`] is an `UnsafeCell<u64>` marked `Sync` with no lock and
//! no atomic. Concurrent [`SharedCounter::increment`] calls are a data race
//! by construction: each is a separate volatile load and volatile store, so
//! interleaved increments lose updates. Volatile access keeps the compiler
//! from folding the loop into one add. ThreadSanitizer is expected to flag
//! every such run.

use std::cell::UnsafeCell;

/// A single integer shared across tasks without synchronization.
#[derive(Debug, Default)]
pub struct SharedCounter {
    value: UnsafeCell<u64>,
}

// SAFETY: deliberately unsound. Concurrent access is the fault under test.
unsafe impl Sync for SharedCounter {}

impl SharedCounter {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-modify-write with no synchronization.
    #[inline(never)]
    pub fn increment(&self) {
        let slot = self.value.get();
        // SAFETY: none; see module docs.
        unsafe {
            let current = std::ptr::read_volatile(slot);
            std::ptr::write_volatile(slot, current.wrapping_add(1));
        }
    }

    /// Current value (racy while writers run).
    pub fn get(&self) -> u64 {
        // SAFETY: none; see module docs.
        unsafe { std::ptr::read_volatile(self.value.get()) }
    }

    /// Reset to zero.
    pub fn reset(&self) {
        // SAFETY: none; see module docs.
        unsafe { std::ptr::write_volatile(self.value.get(), 0) }
    }
}
