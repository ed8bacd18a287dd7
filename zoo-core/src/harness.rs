//! Harness lifecycle: startup and shutdown around the dispatcher.
//!
//! Owns the registry, the allocator and the concurrency driver, and
//! remembers which scenarios were enabled at startup so shutdown tears
//! down the same set.

use zoo_types::Selection;

use crate::alloc::{Allocator, SystemAllocator};
use crate::driver::ConcurrencyDriver;
use crate::registry::{DispatchReport, Registry, TeardownRecord};
use crate::scenarios::ScenarioSettings;

/// Startup/shutdown orchestrator.
pub struct Harness {
    registry: Registry,
    allocator: Box<dyn Allocator>,
    driver: ConcurrencyDriver,
    active: Option<Selection>,
}

impl Harness {
    /// Create a harness with the given registry and allocator.
    pub fn new<A: Allocator + 'static>(registry: Registry, allocator: A) -> Self {
        Self {
            registry,
            allocator: Box::new(allocator),
            driver: ConcurrencyDriver::new(),
            active: None,
        }
    }

    /// The built-in catalog on the system allocator.
    pub fn standard(settings: &ScenarioSettings) -> Self {
        Self::new(Registry::standard(settings), SystemAllocator::new())
    }

    /// Replace the concurrency driver (e.g. one with a task limit).
    pub fn with_driver(mut self, driver: ConcurrencyDriver) -> Self {
        self.driver = driver;
        self
    }

    /// The registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The concurrency driver.
    pub fn driver(&self) -> &ConcurrencyDriver {
        &self.driver
    }

    /// Scenarios enabled at the last startup, until shutdown.
    pub fn active(&self) -> Option<&Selection> {
        self.active.as_ref()
    }

    /// Run the activation pass.
    ///
    /// Returns as soon as every enabled scenario has been activated;
    /// background tasks keep running. A harness that is already started is
    /// shut down first.
    pub fn startup(&mut self, selection: &Selection) -> DispatchReport {
        if self.active.is_some() {
            tracing::warn!("harness already started, shutting down first");
            self.shutdown();
        }

        tracing::info!(enabled = selection.len(), "debug-zoo loaded");
        let report = self
            .registry
            .activate(selection, self.allocator.as_ref(), &self.driver);
        self.active = Some(selection.clone());

        let failures = report.failures().count();
        if failures > 0 {
            tracing::warn!(
                failures,
                status = report.status_code(),
                "some scenarios failed to activate"
            );
        }
        report
    }

    /// Run the teardown pass for the scenarios enabled at startup.
    ///
    /// If any teardown leaves tasks blocked, the driver's shared resources
    /// are replaced so a later startup does not inherit held locks. A second
    /// call without a new startup does nothing.
    pub fn shutdown(&mut self) -> Vec<TeardownRecord> {
        let Some(selection) = self.active.take() else {
            return Vec::new();
        };

        let records = self
            .registry
            .teardown(&selection, self.allocator.as_ref(), &self.driver);

        // Blocked tasks still hold the lock pair; the next run needs fresh ones.
        let stranded: usize = records.iter().map(|r| r.report.abandoned()).sum();
        if stranded > 0 {
            tracing::warn!(stranded, "tasks left blocked, installing fresh shared resources");
            self.driver.reset();
        }

        tracing::info!(torn_down = records.len(), "debug-zoo unloaded");
        records
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("registry", &self.registry)
            .field("driver", &self.driver)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::MockAllocator;
    use crate::locks::LockName;
    use crate::scenarios::{
        LockTiming, OutOfBoundsSettings, OverflowStyle, RaceSettings, ScenarioOutcome,
        TeardownReport, LOCK_TASKS,
    };
    use serial_test::serial;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use zoo_types::ScenarioId;

    fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn quick_settings() -> ScenarioSettings {
        ScenarioSettings {
            lockdep: LockTiming {
                hold_ms: 5,
                offset_ms: 2,
            },
            race: RaceSettings {
                loop_count: 10_000,
                pause_every: 1000,
                pause_us: 1,
            },
            out_of_bounds: OutOfBoundsSettings {
                default_size: 16,
                style: OverflowStyle::OffByOne,
            },
        }
    }

    #[test]
    #[serial]
    fn full_lifecycle_on_mock_allocator() {
        let alloc = MockAllocator::new();
        let mut harness = Harness::new(Registry::standard(&quick_settings()), alloc.clone());

        let report = harness.startup(&Selection::all());
        assert_eq!(report.status_code(), 0);
        assert_eq!(report.activated(), ScenarioId::ALL.to_vec());
        assert!(report.failures().next().is_none());
        assert!(matches!(
            report.get(ScenarioId::Leak).unwrap().result,
            Ok(ScenarioOutcome::Leaked { .. })
        ));

        // Leak keeps its block; UseAfterFree and OutOfBounds released theirs.
        assert_eq!(alloc.outstanding().len(), 1);
        assert_eq!(alloc.release_count(), 2);

        let records = harness.shutdown();
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec![ScenarioId::LockOrderInversion, ScenarioId::DataRace]
        );
        assert!(matches!(
            records[1].report,
            TeardownReport::RaceTally {
                expected: 20_000,
                joined: 2,
                ..
            }
        ));

        harness.driver().reset();
    }

    #[test]
    #[serial]
    fn shutdown_is_idempotent() {
        let mut harness = Harness::new(
            Registry::standard(&quick_settings()),
            MockAllocator::new(),
        );
        assert!(harness.shutdown().is_empty());

        let selection = Selection::parse_params("race").unwrap();
        harness.startup(&selection);
        assert_eq!(harness.active(), Some(&selection));
        assert_eq!(harness.shutdown().len(), 1);
        assert!(harness.shutdown().is_empty());
        assert!(harness.active().is_none());
    }

    #[test]
    #[serial]
    fn spawn_failure_gives_nonzero_status() {
        let mut harness = Harness::new(
            Registry::standard(&quick_settings()),
            MockAllocator::new(),
        )
        .with_driver(ConcurrencyDriver::new().with_task_limit(0));

        let report = harness.startup(&Selection::parse_params("leak race").unwrap());
        assert_eq!(report.status_code(), 1);
        assert!(report.get(ScenarioId::Leak).unwrap().result.is_ok());
        harness.shutdown();
    }

    #[test]
    fn empty_selection_does_nothing() {
        let alloc = MockAllocator::new();
        let mut harness = Harness::new(Registry::standard(&quick_settings()), alloc.clone());
        let report = harness.startup(&Selection::new());
        assert!(report.records().is_empty());
        assert!(harness.shutdown().is_empty());
        assert!(alloc.events().is_empty());
    }

    #[test]
    #[serial]
    fn restart_tears_down_previous_run() {
        let mut harness = Harness::new(
            Registry::standard(&quick_settings()),
            MockAllocator::new(),
        );
        harness.startup(&Selection::parse_params("race").unwrap());
        harness.startup(&Selection::parse_params("leak").unwrap());
        assert!(harness.driver().tasks().is_empty());
        assert!(harness.shutdown().is_empty());
    }

    #[test]
    #[serial]
    fn lockdep_restart_gets_fresh_lock_pair() {
        let mut harness = Harness::new(
            Registry::standard(&ScenarioSettings::default()),
            MockAllocator::new(),
        );
        let lockdep = Selection::parse_params("lockdep").unwrap();

        harness.startup(&lockdep);
        let first = harness.driver().resources();
        let deadlocked = {
            let res = Arc::clone(&first);
            wait_until(Duration::from_secs(5), move || {
                res.journal.attempt_order(LOCK_TASKS[0]).len() == 2
                    && res.journal.attempt_order(LOCK_TASKS[1]).len() == 2
            })
        };
        assert!(deadlocked, "both tasks should block on their second lock");
        assert!(first.locks.is_held(LockName::A));
        assert!(first.locks.is_held(LockName::B));

        // Restart: the stuck pair must stay behind with the stuck threads.
        harness.startup(&lockdep);
        let second = harness.driver().resources();
        assert!(!Arc::ptr_eq(&first, &second));

        let both_acquired = {
            let res = Arc::clone(&second);
            wait_until(Duration::from_secs(5), move || {
                res.journal.acquisition_order(LOCK_TASKS[0]).first() == Some(&LockName::A)
                    && res.journal.acquisition_order(LOCK_TASKS[1]).first()
                        == Some(&LockName::B)
            })
        };
        assert!(both_acquired, "second run should take A and B in opposite orders");

        harness.shutdown();
        assert!(harness.driver().tasks().is_empty());
    }

    #[test]
    #[serial]
    fn shutdown_after_clean_lockdep_keeps_resources() {
        let settings = ScenarioSettings {
            lockdep: LockTiming {
                hold_ms: 1,
                offset_ms: 200,
            },
            ..ScenarioSettings::default()
        };
        let mut harness = Harness::new(Registry::standard(&settings), MockAllocator::new());

        harness.startup(&Selection::parse_params("lockdep").unwrap());
        let before = harness.driver().resources();
        assert!(wait_until(Duration::from_secs(5), || {
            harness.driver().running_count() == 0
        }));

        let records = harness.shutdown();
        assert_eq!(records[0].report.abandoned(), 0);
        assert!(Arc::ptr_eq(&before, &harness.driver().resources()));
    }
}
