//! Leak: allocate a block and never free it.

use zoo_types::{FaultError, ScenarioId};

use super::{Scenario, ScenarioContext, ScenarioOutcome};

/// Size of the leaked block.
pub const LEAK_SIZE: usize = 100;

/// Marker written into the leaked block so it is recognizable in a dump.
pub const LEAK_MARKER: &[u8] = b"debug-zoo: leaked block";

/// Allocates [`LEAK_SIZE`] bytes, writes [`LEAK_MARKER`], and drops the
/// only reference.
#[derive(Debug, Default, Clone, Copy)]
pub struct Leak;

impl Scenario for Leak {
    fn id(&self) -> ScenarioId {
        ScenarioId::Leak
    }

    fn activate(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioOutcome, FaultError> {
        tracing::info!(scenario = %self.id(), size = LEAK_SIZE, "allocating block to leak");

        let block = ctx.allocator.allocate(LEAK_SIZE).map_err(|e| {
            tracing::error!(scenario = %self.id(), error = %e, "memory allocation failed");
            e
        })?;

        let len = LEAK_MARKER.len().min(block.len());
        // SAFETY: block holds LEAK_SIZE bytes and len <= LEAK_SIZE.
        unsafe {
            std::ptr::copy_nonoverlapping(LEAK_MARKER.as_ptr(), block.as_ptr(), len);
        }

        tracing::info!(scenario = %self.id(), addr = ?block.as_ptr(), "block leaked");
        // `block` is Copy with no destructor; it goes out of scope here unreleased.
        Ok(ScenarioOutcome::Leaked { size: LEAK_SIZE })
    }
}
