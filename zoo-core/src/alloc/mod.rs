//! Raw allocation wrapper for the memory scenarios.
//!
//! The memory scenarios need raw blocks they can leak, read after release,
//! and overrun. This module provides:
//! - [`RawBlock`] - a copyable pointer + length with no destructor
//! - [`Allocator`] - the pluggable allocation seam
//! - [`SystemAllocator`] - backed by the global allocator
//! - [`MockAllocator`] - red-zoned, quarantining allocator for tests
//!
//! # Safety boundary
//!
//! `RawBlock` hands out raw pointers. Everything that dereferences them
//! lives in the scenario modules, inside explicit `unsafe` blocks. Faults
//! injected through those pointers are meant to be caught by an external
//! sanitizer (ASan, Valgrind, a hardened allocator), not by this crate.

mod mock;

pub use mock::{AllocEvent, MockAllocator, POISON_BYTE, REDZONE};

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;

use zoo_types::FaultError;

/// A raw heap block.
///
/// `RawBlock` is `Copy` and has no `Drop`: letting the last copy go out of
/// scope without calling [`Allocator::release`] leaks the block, and keeping
/// a copy after release leaves a dangling pointer. Both are intentional
/// capabilities of this type.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawBlock {
    ptr: NonNull<u8>,
    len: usize,
}

impl RawBlock {
    /// Build a block from a pointer and the requested length.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `len` bytes obtained from the allocator
    /// that will later release it.
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Start of the block.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Requested length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the block is empty (never true for allocated blocks).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Numeric address, for log lines and allocator bookkeeping.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl fmt::Debug for RawBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawBlock({:p}, {} bytes)", self.ptr, self.len)
    }
}

/// Allocation seam used by the memory scenarios.
///
/// Implementations report failure as [`FaultError::Allocation`]; scenarios
/// log it and return early without affecting other scenarios.
pub trait Allocator: Send + Sync {
    /// Allocate `size` uninitialized bytes.
    fn allocate(&self, size: usize) -> Result<RawBlock, FaultError>;

    /// Allocate `size` zeroed bytes.
    fn allocate_zeroed(&self, size: usize) -> Result<RawBlock, FaultError>;

    /// Return a block to the allocator.
    ///
    /// # Safety
    ///
    /// `block` must have come from this allocator and must not have been
    /// released before. Any copy of `block` dangles afterwards.
    unsafe fn release(&self, block: RawBlock);
}

/// Allocator backed by the process's global allocator.
///
/// Keeps no bookkeeping of its own, so a leaked block is reachable from
/// nothing once the caller drops its `RawBlock`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl SystemAllocator {
    /// Create the system allocator.
    pub fn new() -> Self {
        Self
    }

    fn layout(size: usize) -> Result<Layout, FaultError> {
        if size == 0 {
            return Err(FaultError::Allocation {
                size,
                reason: "zero-sized request".to_string(),
            });
        }
        Layout::array::<u8>(size).map_err(|e| FaultError::Allocation {
            size,
            reason: e.to_string(),
        })
    }

    fn finish(ptr: *mut u8, size: usize) -> Result<RawBlock, FaultError> {
        let ptr = NonNull::new(ptr).ok_or_else(|| FaultError::Allocation {
            size,
            reason: "allocator returned null".to_string(),
        })?;
        // SAFETY: ptr was just returned by the global allocator for `size` bytes.
        Ok(unsafe { RawBlock::from_raw(ptr, size) })
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&self, size: usize) -> Result<RawBlock, FaultError> {
        let layout = Self::layout(size)?;
        // SAFETY: layout has non-zero size.
        Self::finish(unsafe { std::alloc::alloc(layout) }, size)
    }

    fn allocate_zeroed(&self, size: usize) -> Result<RawBlock, FaultError> {
        let layout = Self::layout(size)?;
        // SAFETY: layout has non-zero size.
        Self::finish(unsafe { std::alloc::alloc_zeroed(layout) }, size)
    }

    unsafe fn release(&self, block: RawBlock) {
        // Layout::array::<u8> only fails past isize::MAX, which allocate rejected.
        if let Ok(layout) = Self::layout(block.len()) {
            std::alloc::dealloc(block.as_ptr(), layout);
        }
    }
}
