//! Scenario identifiers for debug-zoo.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::FaultError;

/// One fault pattern in the catalog.
///
/// The declaration order is the registry order: activation and teardown
/// always run in this order, whatever order scenarios were selected in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Allocate a block and drop the only reference to it.
    Leak,
    /// Release a block, then read through the stale pointer.
    UseAfterFree,
    /// Two tasks take locks A and B in opposite orders.
    #[serde(rename = "lockdep", alias = "lock_order_inversion")]
    LockOrderInversion,
    /// Two tasks increment one counter without synchronization.
    #[serde(rename = "race", alias = "data_race")]
    DataRace,
    /// Write past the end of a heap buffer.
    #[serde(alias = "slab_poison")]
    OutOfBounds,
}

impl ScenarioId {
    /// Every scenario, in registry order.
    pub const ALL: [ScenarioId; 5] = [
        ScenarioId::Leak,
        ScenarioId::UseAfterFree,
        ScenarioId::LockOrderInversion,
        ScenarioId::DataRace,
        ScenarioId::OutOfBounds,
    ];

    /// Canonical name, as used in selection flags and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioId::Leak => "leak",
            ScenarioId::UseAfterFree => "use_after_free",
            ScenarioId::LockOrderInversion => "lockdep",
            ScenarioId::DataRace => "race",
            ScenarioId::OutOfBounds => "out_of_bounds",
        }
    }

    /// Alternative names accepted when parsing.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            ScenarioId::Leak => &[],
            ScenarioId::UseAfterFree => &["uaf"],
            ScenarioId::LockOrderInversion => &["lock_order_inversion"],
            ScenarioId::DataRace => &["data_race"],
            ScenarioId::OutOfBounds => &["slab_poison"],
        }
    }

    /// Whether the scenario runs background tasks and so has a teardown phase.
    pub fn has_teardown(&self) -> bool {
        matches!(self, ScenarioId::LockOrderInversion | ScenarioId::DataRace)
    }

    /// Whether the scenario accepts a numeric value (a buffer size).
    pub fn takes_value(&self) -> bool {
        matches!(self, ScenarioId::OutOfBounds)
    }

    /// One-line description for listings.
    pub fn describe(&self) -> &'static str {
        match self {
            ScenarioId::Leak => "allocate a block and never free it",
            ScenarioId::UseAfterFree => "free a block, then read the freed memory",
            ScenarioId::LockOrderInversion => "two threads take locks A/B in opposite order",
            ScenarioId::DataRace => "two threads increment a shared counter without a lock",
            ScenarioId::OutOfBounds => "write past the end of a heap buffer",
        }
    }

    /// Position in the registry.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioId {
    type Err = FaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ScenarioId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized || id.aliases().contains(&normalized.as_str()))
            .ok_or_else(|| FaultError::UnknownScenario(s.to_string()))
    }
}
