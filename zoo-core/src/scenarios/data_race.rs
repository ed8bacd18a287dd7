//! Data race: two tasks increment one counter with no synchronization.
//!
//! Each task runs `loop_count` unsynchronized read-modify-write increments
//! on the driver's [`SharedCounter`](crate::counter::SharedCounter),
//! pausing briefly every `pause_every` iterations to widen the interleaving
//! window. With correct synchronization the final value would be
//! `2 × loop_count`; here it is non-deterministic and usually lower.
//!
//! Teardown waits for both tasks to finish their loops and reports the
//! counter next to the increments actually attempted, so lost updates are
//! never confused with a run cut short. Tasks still honour the stop signal
//! between iterations; only an explicit stop request (or a driver reset)
//! ends a run early.

use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use zoo_types::{FaultError, ScenarioId};

use super::{Scenario, ScenarioContext, ScenarioOutcome, TeardownReport};
use crate::driver::TaskContext;

/// Task names, in spawn order.
pub const RACE_TASKS: [&str; 2] = ["race_thread1", "race_thread2"];

/// Loop shape for each racing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceSettings {
    /// Increments per task.
    pub loop_count: u64,
    /// Pause every this many iterations (0 never pauses).
    pub pause_every: u64,
    /// Length of each pause, in microseconds.
    pub pause_us: u64,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            loop_count: 1_000_000,
            pause_every: 1000,
            pause_us: 1,
        }
    }
}

impl RaceSettings {
    /// The value the counter would reach under correct synchronization.
    pub fn expected(&self) -> u64 {
        self.loop_count.saturating_mul(RACE_TASKS.len() as u64)
    }
}

/// Spawns two tasks that race on the shared counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataRace {
    settings: RaceSettings,
}

impl DataRace {
    /// Create the scenario with the given loop shape.
    pub fn new(settings: RaceSettings) -> Self {
        Self { settings }
    }
}

fn race(ctx: &TaskContext, settings: RaceSettings) {
    let counter = &ctx.resources.counter;
    let pause = Duration::from_micros(settings.pause_us);

    let mut done = 0u64;
    for i in 0..settings.loop_count {
        if ctx.stop.is_requested() {
            break;
        }
        counter.increment();
        done += 1;
        if settings.pause_every > 0 && i % settings.pause_every == 0 {
            thread::sleep(pause);
        }
    }
    ctx.resources.attempted.fetch_add(done, Ordering::SeqCst);

    tracing::info!(task = %ctx.name, attempted = done, value = counter.get(), "thread finished");
}

impl Scenario for DataRace {
    fn id(&self) -> ScenarioId {
        ScenarioId::DataRace
    }

    fn activate(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioOutcome, FaultError> {
        tracing::info!(
            scenario = %self.id(),
            loop_count = self.settings.loop_count,
            "starting racing threads"
        );
        let resources = ctx.driver.resources();
        resources.counter.reset();
        resources.attempted.store(0, Ordering::SeqCst);

        for name in RACE_TASKS {
            let settings = self.settings;
            ctx.driver
                .spawn(self.id(), name, move |task| race(&task, settings))
                .map_err(|e| {
                    tracing::error!(scenario = %self.id(), error = %e, "failed to create threads");
                    e
                })?;
        }

        Ok(ScenarioOutcome::Spawned {
            tasks: RACE_TASKS.iter().map(|t| t.to_string()).collect(),
        })
    }

    fn teardown(&self, ctx: &ScenarioContext<'_>) -> Option<TeardownReport> {
        let summary = ctx.driver.join_scenario(self.id());
        for failure in summary.failures() {
            tracing::error!(
                scenario = %self.id(),
                error = %failure,
                "racing thread did not finish"
            );
        }

        let resources = ctx.driver.resources();
        let observed = resources.counter.get();
        let attempted = resources.attempted.load(Ordering::SeqCst);
        let expected = self.settings.expected();
        if attempted < expected {
            tracing::warn!(
                scenario = %self.id(),
                attempted,
                expected,
                "run stopped early; missing increments were never attempted"
            );
        }
        tracing::info!(
            scenario = %self.id(),
            observed,
            attempted,
            expected,
            lost = attempted.saturating_sub(observed),
            "final value of shared counter"
        );

        Some(TeardownReport::RaceTally {
            observed,
            attempted,
            expected,
            joined: summary.joined.len(),
        })
    }
}
