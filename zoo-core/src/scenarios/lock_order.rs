//! Lock-order inversion: two tasks take locks A and B in opposite orders.
//!
//! `lock_thread1` takes A then B; `lock_thread2` starts a little later and
//! takes B then A. The pauses make it very likely that each holds one lock
//! while waiting for the other, but the deadlock stays probabilistic: the
//! timing biases the interleaving and nothing forces it.
//!
//! Tasks never check for cancellation while blocked. A real deadlock is an
//! accepted terminal state; teardown announces completion and abandons
//! whatever is still stuck.

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

use zoo_types::{FaultError, ScenarioId};

use super::{Scenario, ScenarioContext, ScenarioOutcome, TeardownReport};
use crate::driver::TaskContext;
use crate::locks::{LockAction, LockName};

/// Task names, in spawn order.
pub const LOCK_TASKS: [&str; 2] = ["lock_thread1", "lock_thread2"];

/// Pauses used to widen the circular-wait window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockTiming {
    /// Pause while holding a lock, in milliseconds.
    pub hold_ms: u64,
    /// Delay before the second task starts, in milliseconds.
    pub offset_ms: u64,
}

impl Default for LockTiming {
    fn default() -> Self {
        Self {
            hold_ms: 100,
            offset_ms: 50,
        }
    }
}

impl LockTiming {
    /// Hold pause.
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    /// Start offset of the second task.
    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms)
    }
}

/// Spawns the two opposite-order lock tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct LockOrderInversion {
    timing: LockTiming,
}

impl LockOrderInversion {
    /// Create the scenario with the given timing.
    pub fn new(timing: LockTiming) -> Self {
        Self { timing }
    }
}

/// Take `first` then `second`, pausing after each, then release both.
fn acquire_in_order(ctx: &TaskContext, first: LockName, second: LockName, hold: Duration) {
    let res = &ctx.resources;
    let journal = &res.journal;

    journal.record(&ctx.name, first, LockAction::Attempt);
    let outer = res.locks.lock(first);
    journal.record(&ctx.name, first, LockAction::Acquired);
    thread::sleep(hold);

    journal.record(&ctx.name, second, LockAction::Attempt);
    let inner = res.locks.lock(second);
    journal.record(&ctx.name, second, LockAction::Acquired);
    thread::sleep(hold);

    drop(inner);
    journal.record(&ctx.name, second, LockAction::Released);
    drop(outer);
    journal.record(&ctx.name, first, LockAction::Released);
}

impl Scenario for LockOrderInversion {
    fn id(&self) -> ScenarioId {
        ScenarioId::LockOrderInversion
    }

    fn activate(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioOutcome, FaultError> {
        tracing::info!(
            scenario = %self.id(),
            hold_ms = self.timing.hold_ms,
            offset_ms = self.timing.offset_ms,
            "lockdep test loaded"
        );

        let hold = self.timing.hold();
        ctx.driver.spawn(self.id(), LOCK_TASKS[0], move |task| {
            acquire_in_order(&task, LockName::A, LockName::B, hold);
        })?;

        let offset = self.timing.offset();
        ctx.driver.spawn(self.id(), LOCK_TASKS[1], move |task| {
            thread::sleep(offset);
            acquire_in_order(&task, LockName::B, LockName::A, hold);
        })?;

        Ok(ScenarioOutcome::Spawned {
            tasks: LOCK_TASKS.iter().map(|t| t.to_string()).collect(),
        })
    }

    fn teardown(&self, ctx: &ScenarioContext<'_>) -> Option<TeardownReport> {
        let summary = ctx.driver.abandon_scenario(self.id());
        if summary.abandoned > 0 {
            tracing::warn!(
                scenario = %self.id(),
                blocked = summary.abandoned,
                "tasks still blocked on the lock pair"
            );
        }
        tracing::info!(scenario = %self.id(), "lockdep test unloaded");

        Some(TeardownReport::Announced {
            joined: summary.joined,
            abandoned: summary.abandoned,
        })
    }
}
