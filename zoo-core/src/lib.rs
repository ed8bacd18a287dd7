//! # zoo-core
//!
//! Scenario registry and execution engine for debug-zoo.
//!
//! debug-zoo reproduces a fixed catalog of classic defects on demand so
//! that external tooling (AddressSanitizer, ThreadSanitizer, Valgrind,
//! lock-order checkers, log inspection) can be validated against
//! known-bad behaviour:
//!
//! - leaked allocation
//! - use after free
//! - lock-order inversion
//! - unsynchronized counter (data race)
//! - out-of-bounds heap write
//!
//! ## Layout
//!
//! - [`alloc`] - raw allocation seam, system and mock allocators
//! - [`locks`], [`counter`] - the shared primitives the threaded scenarios abuse
//! - [`driver`] - named background threads, stop signals, shared-state ownership
//! - [`scenarios`] - the five fault scenarios
//! - [`registry`] - catalog and dispatcher
//! - [`harness`] - startup/shutdown lifecycle
//!
//! ## Safety
//!
//! The memory and race scenarios break Rust's guarantees on purpose, inside
//! explicit `unsafe` blocks in [`scenarios`] and [`counter`]. Run them under
//! a sanitizer, or on [`MockAllocator`] where the damage lands in memory
//! the test owns. Everything outside those blocks is ordinary safe code.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alloc;
pub mod counter;
pub mod driver;
pub mod harness;
pub mod locks;
pub mod registry;
pub mod scenarios;

pub use alloc::{AllocEvent, Allocator, MockAllocator, RawBlock, SystemAllocator};
pub use counter::SharedCounter;
pub use driver::{
    AbandonSummary, BackgroundTask, ConcurrencyDriver, JoinSummary, SharedResources, StopSignal,
    TaskContext, TaskInfo, TaskState,
};
pub use harness::Harness;
pub use locks::{LockAction, LockEvent, LockJournal, LockName, OrderedLockPair};
pub use registry::{ActivationRecord, DispatchReport, Registry, ScenarioDescriptor, TeardownRecord};
pub use scenarios::{
    LockTiming, OutOfBoundsSettings, OverflowStyle, RaceSettings, Scenario, ScenarioContext,
    ScenarioOutcome, ScenarioSettings, TeardownReport,
};
pub use zoo_types::{FaultError, ScenarioId, Selection};
