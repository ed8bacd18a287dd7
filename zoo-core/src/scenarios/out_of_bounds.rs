//! Out-of-bounds write: overrun a heap buffer.
//!
//! The buffer is sized to the selection value (or [`DEFAULT_OOB_SIZE`]) and
//! then written past its end with no bounds check, either one byte at
//! offset `n` or a formatted message at least `n + 1` bytes long. The
//! buffer is released afterwards so that allocators which validate red
//! zones on free (slab poisoning, hardened malloc) see the damage too.
//! AddressSanitizer reports a heap-buffer-overflow at the write itself.

use serde::{Deserialize, Serialize};

use zoo_types::{FaultError, ScenarioId};

use super::{Scenario, ScenarioContext, ScenarioOutcome};

/// Buffer size when the selection supplies none.
pub const DEFAULT_OOB_SIZE: usize = 16;

/// How the buffer is overrun.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowStyle {
    /// A single `'X'` at offset `n`.
    #[default]
    OffByOne,
    /// An unbounded copy of a formatted message longer than the buffer.
    Formatted,
}

/// Out-of-bounds defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutOfBoundsSettings {
    /// Buffer size when the selection carries no value.
    pub default_size: usize,
    /// How to overrun.
    pub style: OverflowStyle,
}

impl Default for OutOfBoundsSettings {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_OOB_SIZE,
            style: OverflowStyle::OffByOne,
        }
    }
}

/// Allocates a buffer and writes past its end.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutOfBounds {
    settings: OutOfBoundsSettings,
}

impl OutOfBounds {
    /// Create the scenario with the given defaults.
    pub fn new(settings: OutOfBoundsSettings) -> Self {
        Self { settings }
    }
}

/// The formatted payload for an `n`-byte buffer; always longer than `n`.
fn formatted_payload(size: usize) -> Vec<u8> {
    let mut payload = format!("out_of_bounds: {size}-byte buffer overrun").into_bytes();
    if payload.len() <= size {
        payload.resize(size + 1, b'!');
    }
    payload
}

impl Scenario for OutOfBounds {
    fn id(&self) -> ScenarioId {
        ScenarioId::OutOfBounds
    }

    fn activate(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioOutcome, FaultError> {
        let size = ctx.value.unwrap_or(self.settings.default_size);
        tracing::info!(scenario = %self.id(), size, style = ?self.settings.style, "loading");

        let block = ctx.allocator.allocate(size).map_err(|e| {
            tracing::error!(scenario = %self.id(), error = %e, "allocation failed");
            e
        })?;
        tracing::info!(scenario = %self.id(), addr = ?block.as_ptr(), size, "allocated buffer");

        let written = match self.settings.style {
            OverflowStyle::OffByOne => {
                // SAFETY: none. Offset `size` is one past the end; this write is the fault.
                unsafe { block.as_ptr().add(size).write_volatile(b'X') };
                1
            }
            OverflowStyle::Formatted => {
                let payload = formatted_payload(size);
                // SAFETY: none. payload is longer than the block; this copy is the fault.
                unsafe {
                    std::ptr::copy_nonoverlapping(payload.as_ptr(), block.as_ptr(), payload.len())
                };
                payload.len()
            }
        };
        let last_offset = match self.settings.style {
            OverflowStyle::OffByOne => size,
            OverflowStyle::Formatted => written - 1,
        };
        tracing::info!(scenario = %self.id(), last_offset, written, "wrote out-of-bounds");

        let addr = block.addr();
        // SAFETY: block came from this allocator and is released once.
        unsafe { ctx.allocator.release(block) };

        Ok(ScenarioOutcome::WroteOutOfBounds {
            addr,
            size,
            last_offset,
            written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{MockAllocator, POISON_BYTE};
    use crate::driver::ConcurrencyDriver;

    fn run(
        scenario: OutOfBounds,
        alloc: &MockAllocator,
        value: Option<usize>,
    ) -> Result<ScenarioOutcome, FaultError> {
        let driver = ConcurrencyDriver::new();
        let ctx = ScenarioContext {
            allocator: alloc,
            driver: &driver,
            value,
        };
        scenario.activate(&ctx)
    }

    #[test]
    fn off_by_one_writes_at_offset_n() {
        let alloc = MockAllocator::new();
        let outcome = run(OutOfBounds::default(), &alloc, None).unwrap();

        let ScenarioOutcome::WroteOutOfBounds {
            addr,
            size,
            last_offset,
            written,
        } = outcome
        else {
            panic!("unexpected outcome");
        };
        assert_eq!(size, DEFAULT_OOB_SIZE);
        assert_eq!(last_offset, size);
        assert_eq!(written, 1);

        let zone = alloc.redzone(addr).unwrap();
        assert_eq!(zone[0], b'X');
        assert!(zone[1..].iter().all(|b| *b == POISON_BYTE));
    }

    #[test]
    fn requested_size_is_honoured() {
        let alloc = MockAllocator::new();
        let outcome = run(OutOfBounds::default(), &alloc, Some(40)).unwrap();

        let ScenarioOutcome::WroteOutOfBounds { addr, size, .. } = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(size, 40);
        assert_eq!(alloc.redzone(addr).unwrap()[0], b'X');
    }

    #[test]
    fn formatted_write_overruns_buffer() {
        let alloc = MockAllocator::new();
        let scenario = OutOfBounds::new(OutOfBoundsSettings {
            default_size: 8,
            style: OverflowStyle::Formatted,
        });
        let outcome = run(scenario, &alloc, None).unwrap();

        let ScenarioOutcome::WroteOutOfBounds {
            addr,
            size,
            last_offset,
            written,
        } = outcome
        else {
            panic!("unexpected outcome");
        };
        assert_eq!(size, 8);
        assert!(last_offset >= size);
        assert_eq!(written, formatted_payload(8).len());
        assert!(!alloc.redzone_intact(addr));
    }

    #[test]
    fn formatted_payload_always_exceeds_size() {
        for size in [1, 8, 16, 64, 200] {
            assert!(formatted_payload(size).len() > size, "size {size}");
        }
    }

    #[test]
    fn buffer_is_released_after_write() {
        let alloc = MockAllocator::new();
        run(OutOfBounds::default(), &alloc, None).unwrap();
        assert_eq!(alloc.allocation_count(), 1);
        assert_eq!(alloc.release_count(), 1);
        assert!(alloc.outstanding().is_empty());
    }

    #[test]
    fn zero_size_is_an_allocation_failure() {
        let alloc = MockAllocator::new();
        let err = run(OutOfBounds::default(), &alloc, Some(0)).unwrap_err();
        assert!(matches!(err, FaultError::Allocation { size: 0, .. }));
    }

    #[test]
    fn style_deserializes_from_kebab_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            style: OverflowStyle,
        }
        let w: Wrapper = serde_json::from_str(r#"{"style":"formatted"}"#).unwrap();
        assert_eq!(w.style, OverflowStyle::Formatted);
        let w: Wrapper = serde_json::from_str(r#"{"style":"off-by-one"}"#).unwrap();
        assert_eq!(w.style, OverflowStyle::OffByOne);
    }
}
