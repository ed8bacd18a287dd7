//! Use-after-free: release a block, then read it.
//!
//! The read goes through the stale pointer with no validity check between
//! the release and the access. With the system allocator this is
//! undefined behaviour; AddressSanitizer or Valgrind should report a
//! heap-use-after-free at the read.

use zoo_types::{FaultError, ScenarioId};

use super::{Scenario, ScenarioContext, ScenarioOutcome};

/// Size of the block.
pub const UAF_SIZE: usize = 100;

/// Marker written before release and read back after.
pub const UAF_MARKER: &str = "This is a use-after-free example";

/// Allocates a zeroed block, writes [`UAF_MARKER`], releases the block and
/// reads the marker back through the released pointer.
#[derive(Debug, Default, Clone, Copy)]
pub struct UseAfterFree;

impl Scenario for UseAfterFree {
    fn id(&self) -> ScenarioId {
        ScenarioId::UseAfterFree
    }

    fn activate(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioOutcome, FaultError> {
        tracing::info!(scenario = %self.id(), size = UAF_SIZE, "allocating block to free");

        let block = ctx.allocator.allocate_zeroed(UAF_SIZE).map_err(|e| {
            tracing::error!(scenario = %self.id(), error = %e, "memory allocation failed");
            e
        })?;

        let marker = UAF_MARKER.as_bytes();
        let ptr = block.as_ptr();
        // SAFETY: block holds UAF_SIZE zeroed bytes and the marker is shorter.
        unsafe {
            std::ptr::copy_nonoverlapping(marker.as_ptr(), ptr, marker.len());
        }

        // SAFETY: block came from this allocator and is released once.
        // `ptr` dangles from here on.
        unsafe { ctx.allocator.release(block) };

        // SAFETY: none. This read is the fault.
        let stale = unsafe { std::slice::from_raw_parts(ptr as *const u8, marker.len()) };
        let observed = String::from_utf8_lossy(stale).into_owned();

        tracing::info!(scenario = %self.id(), addr = ?ptr, %observed, "using freed memory");
        Ok(ScenarioOutcome::ReadAfterFree {
            addr: ptr as usize,
            observed,
        })
    }
}
