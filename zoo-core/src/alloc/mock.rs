//! Mock allocator for testing.
//!
//! Records every allocation and release, can be told to fail, and keeps
//! faults inside memory it owns:
//! - every block is followed by a poisoned red zone, so an overrun lands
//!   in the red zone instead of a neighbouring allocation
//! - released blocks are quarantined (still mapped, contents untouched),
//!   so a read after release sees the old bytes
//!
//! All memory, leaked or quarantined, is returned when the last clone drops.

use super::{Allocator, RawBlock};
use std::alloc::Layout;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use zoo_types::FaultError;

/// Bytes of guard space placed after every block.
pub const REDZONE: usize = 64;

/// Fill pattern for the red zone.
pub const POISON_BYTE: u8 = 0xA5;

/// One entry in the allocation ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocEvent {
    /// A block was handed out.
    Allocated {
        /// Block address.
        addr: usize,
        /// Requested size.
        size: usize,
        /// Whether the block was zero-initialized.
        zeroed: bool,
    },
    /// A block was returned (and quarantined).
    Released {
        /// Block address.
        addr: usize,
        /// Requested size.
        size: usize,
    },
    /// An allocation request was refused.
    Failed {
        /// Requested size.
        size: usize,
    },
}

/// Mock allocator for testing.
///
/// Cloning shares the ledger and the backing memory.
#[derive(Debug, Default)]
pub struct MockAllocator {
    inner: Arc<Mutex<MockAllocatorInner>>,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    size: usize,
    layout: Layout,
}

#[derive(Debug, Default)]
struct MockAllocatorInner {
    events: Vec<AllocEvent>,
    live: HashMap<usize, Slot>,
    quarantine: HashMap<usize, Slot>,
    fail_remaining: usize,
}

impl MockAllocator {
    /// Create a new mock allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that refuses its first `count` allocation requests.
    pub fn failing_first(count: usize) -> Self {
        let mock = Self::new();
        mock.fail_next(count);
        mock
    }

    /// Cause the next `count` allocation requests to fail.
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_remaining = count;
    }

    /// Full ledger, in call order.
    pub fn events(&self) -> Vec<AllocEvent> {
        self.lock().events.clone()
    }

    /// Number of successful allocations.
    pub fn allocation_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, AllocEvent::Allocated { .. }))
            .count()
    }

    /// Number of releases.
    pub fn release_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, AllocEvent::Released { .. }))
            .count()
    }

    /// Number of refused requests.
    pub fn failure_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, AllocEvent::Failed { .. }))
            .count()
    }

    /// Blocks allocated and never released, as `(addr, size)`.
    pub fn outstanding(&self) -> Vec<(usize, usize)> {
        let inner = self.lock();
        let mut blocks: Vec<_> = inner
            .live
            .iter()
            .map(|(addr, slot)| (*addr, slot.size))
            .collect();
        blocks.sort_unstable();
        blocks
    }

    /// Copy of a block's bytes, live or quarantined.
    pub fn contents(&self, addr: usize) -> Option<Vec<u8>> {
        let inner = self.lock();
        let slot = inner.slot(addr)?;
        // SAFETY: the slot's memory is owned by this allocator until drop.
        let bytes = unsafe { std::slice::from_raw_parts(addr as *const u8, slot.size) };
        Some(bytes.to_vec())
    }

    /// Copy of the red zone following a block, live or quarantined.
    pub fn redzone(&self, addr: usize) -> Option<Vec<u8>> {
        let inner = self.lock();
        let slot = inner.slot(addr)?;
        // SAFETY: layout covers size + REDZONE bytes owned by this allocator.
        let bytes =
            unsafe { std::slice::from_raw_parts((addr + slot.size) as *const u8, REDZONE) };
        Some(bytes.to_vec())
    }

    /// Whether the red zone after a block still holds only poison.
    pub fn redzone_intact(&self, addr: usize) -> bool {
        self.redzone(addr)
            .map(|zone| zone.iter().all(|b| *b == POISON_BYTE))
            .unwrap_or(true)
    }

    fn lock(&self) -> MutexGuard<'_, MockAllocatorInner> {
        // A panicking test thread must not hide the ledger from the others.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn allocate_inner(&self, size: usize, zeroed: bool) -> Result<RawBlock, FaultError> {
        let mut inner = self.lock();

        if inner.fail_remaining > 0 {
            inner.fail_remaining -= 1;
            inner.events.push(AllocEvent::Failed { size });
            return Err(FaultError::Allocation {
                size,
                reason: "injected failure".to_string(),
            });
        }
        if size == 0 {
            inner.events.push(AllocEvent::Failed { size });
            return Err(FaultError::Allocation {
                size,
                reason: "zero-sized request".to_string(),
            });
        }

        let layout = size
            .checked_add(REDZONE)
            .and_then(|total| Layout::array::<u8>(total).ok())
            .ok_or_else(|| FaultError::Allocation {
                size,
                reason: "size overflow".to_string(),
            })?;

        // SAFETY: layout is non-zero (REDZONE > 0).
        let raw = unsafe {
            if zeroed {
                std::alloc::alloc_zeroed(layout)
            } else {
                std::alloc::alloc(layout)
            }
        };
        let ptr = NonNull::new(raw).ok_or_else(|| FaultError::Allocation {
            size,
            reason: "allocator returned null".to_string(),
        })?;

        // SAFETY: the red zone lies inside the layout just allocated.
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr().add(size), POISON_BYTE, REDZONE);
        }

        let addr = ptr.as_ptr() as usize;
        inner.live.insert(addr, Slot { size, layout });
        inner.events.push(AllocEvent::Allocated { addr, size, zeroed });

        // SAFETY: ptr covers `size` usable bytes owned by this allocator.
        Ok(unsafe { RawBlock::from_raw(ptr, size) })
    }
}

impl MockAllocatorInner {
    fn slot(&self, addr: usize) -> Option<Slot> {
        self.live
            .get(&addr)
            .or_else(|| self.quarantine.get(&addr))
            .copied()
    }
}

impl Clone for MockAllocator {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Allocator for MockAllocator {
    fn allocate(&self, size: usize) -> Result<RawBlock, FaultError> {
        self.allocate_inner(size, false)
    }

    fn allocate_zeroed(&self, size: usize) -> Result<RawBlock, FaultError> {
        self.allocate_inner(size, true)
    }

    unsafe fn release(&self, block: RawBlock) {
        let mut inner = self.lock();
        let addr = block.addr();
        if let Some(slot) = inner.live.remove(&addr) {
            inner.quarantine.insert(addr, slot);
        }
        inner.events.push(AllocEvent::Released {
            addr,
            size: block.len(),
        });
    }
}

impl Drop for MockAllocatorInner {
    fn drop(&mut self) {
        for (addr, slot) in self.live.drain().chain(self.quarantine.drain()) {
            // SAFETY: every slot was allocated with exactly this layout and
            // is freed once, here.
            unsafe { std::alloc::dealloc(addr as *mut u8, slot.layout) };
        }
    }
}
