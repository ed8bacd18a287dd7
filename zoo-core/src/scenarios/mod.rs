//! Fault scenarios.
//!
//! Each scenario reproduces one defect pattern:
//!
//! | Scenario | Fault | Background tasks | Teardown |
//! |----------|-------|------------------|----------|
//! | [`Leak`] | block never freed | none | none |
//! | [`UseAfterFree`] | read of released block | none | none |
//! | [`LockOrderInversion`] | A→B vs B→A acquisition | 2 | announce, abandon |
//! | [`DataRace`] | lost counter updates | 2 | join, tally |
//! | [`OutOfBounds`] | write past buffer end | none | none |
//!
//! Faults are the product, not errors: nothing here checks, corrects or
//! suppresses them. Only allocation failure and task creation failure are
//! reported as [`FaultError`].

mod data_race;
mod leak;
mod lock_order;
mod out_of_bounds;
mod use_after_free;

pub use data_race::{DataRace, RaceSettings, RACE_TASKS};
pub use leak::{Leak, LEAK_MARKER, LEAK_SIZE};
pub use lock_order::{LockOrderInversion, LockTiming, LOCK_TASKS};
pub use out_of_bounds::{OutOfBounds, OutOfBoundsSettings, OverflowStyle, DEFAULT_OOB_SIZE};
pub use use_after_free::{UseAfterFree, UAF_MARKER, UAF_SIZE};

use serde::{Deserialize, Serialize};

use zoo_types::{FaultError, ScenarioId};

use crate::alloc::Allocator;
use crate::driver::ConcurrencyDriver;

/// What a scenario runs against.
#[derive(Clone, Copy)]
pub struct ScenarioContext<'a> {
    /// Allocator for the memory scenarios.
    pub allocator: &'a dyn Allocator,
    /// Driver for the threaded scenarios.
    pub driver: &'a ConcurrencyDriver,
    /// Configuration value for this activation (e.g. a buffer size).
    pub value: Option<usize>,
}

/// What an activation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome {
    /// A block was allocated and every reference to it dropped.
    ///
    /// Carries no address: the harness keeps nothing that points at it.
    Leaked {
        /// Block size in bytes.
        size: usize,
    },
    /// A released block was read through its stale pointer.
    ReadAfterFree {
        /// Address that was released and then read.
        addr: usize,
        /// What the read returned.
        observed: String,
    },
    /// Background tasks were started; the fault manifests asynchronously.
    Spawned {
        /// Names of the tasks started.
        tasks: Vec<String>,
    },
    /// Bytes were written past the end of a buffer.
    WroteOutOfBounds {
        /// Address of the buffer.
        addr: usize,
        /// Buffer size in bytes.
        size: usize,
        /// Highest offset written.
        last_offset: usize,
        /// Number of bytes written, in and out of bounds.
        written: usize,
    },
}

/// What a teardown reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReport {
    /// Completion announced; tasks still blocked were left alone.
    Announced {
        /// Tasks that had finished and were joined.
        joined: usize,
        /// Tasks still running, detached.
        abandoned: usize,
    },
    /// Final counter value next to the increments attempted and the value
    /// correct synchronization gives. `attempted - observed` updates were
    /// lost; `expected - attempted` were never attempted.
    RaceTally {
        /// Final counter value.
        observed: u64,
        /// Increments the tasks actually performed.
        attempted: u64,
        /// `tasks × loop_count`.
        expected: u64,
        /// Tasks joined at teardown.
        joined: usize,
    },
}

impl TeardownReport {
    /// Tasks left running because they may never finish.
    pub fn abandoned(&self) -> usize {
        match self {
            TeardownReport::Announced { abandoned, .. } => *abandoned,
            TeardownReport::RaceTally { .. } => 0,
        }
    }
}

/// One self-contained fault-reproduction unit.
pub trait Scenario: Send + Sync {
    /// Which catalog entry this is.
    fn id(&self) -> ScenarioId;

    /// Trigger the fault, synchronously or by spawning background work.
    ///
    /// # Errors
    ///
    /// Allocation or task creation failure. Anything else is the fault
    /// itself and must not be reported here.
    fn activate(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioOutcome, FaultError>;

    /// Whether the dispatcher should call [`Scenario::teardown`] at shutdown.
    fn has_teardown(&self) -> bool {
        self.id().has_teardown()
    }

    /// Report on and retire background work. `None` means nothing to report.
    fn teardown(&self, _ctx: &ScenarioContext<'_>) -> Option<TeardownReport> {
        None
    }
}

/// Tunables for the built-in scenarios.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioSettings {
    /// Lock-order inversion timing.
    pub lockdep: LockTiming,
    /// Data race loop shape.
    pub race: RaceSettings,
    /// Out-of-bounds defaults.
    pub out_of_bounds: OutOfBoundsSettings,
}
