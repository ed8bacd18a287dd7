//! Scenario registry and dispatcher.
//!
//! The registry holds one [`ScenarioDescriptor`] per catalog entry, kept in
//! registry order. Dispatch has two passes:
//!
//! 1. [`Registry::activate`] - at startup, activate every enabled scenario
//!    exactly once, in registry order. A failed activation is logged and
//!    recorded; the remaining scenarios still run.
//! 2. [`Registry::teardown`] - at shutdown, in the same order, tear down
//!    every enabled scenario that has a teardown phase.

use std::fmt;

use zoo_types::{FaultError, ScenarioId, Selection};

use crate::alloc::Allocator;
use crate::driver::ConcurrencyDriver;
use crate::scenarios::{
    DataRace, Leak, LockOrderInversion, OutOfBounds, Scenario, ScenarioContext, ScenarioOutcome,
    ScenarioSettings, TeardownReport, UseAfterFree,
};

/// A catalog entry: scenario plus optional configuration value.
pub struct ScenarioDescriptor {
    scenario: Box<dyn Scenario>,
    config: Option<usize>,
}

impl ScenarioDescriptor {
    /// Describe a scenario with no configuration value.
    pub fn new<S: Scenario + 'static>(scenario: S) -> Self {
        Self {
            scenario: Box::new(scenario),
            config: None,
        }
    }

    /// Attach a default configuration value (overridden by the selection).
    pub fn with_config(mut self, value: usize) -> Self {
        self.config = Some(value);
        self
    }

    /// Scenario id.
    pub fn id(&self) -> ScenarioId {
        self.scenario.id()
    }

    /// Default configuration value.
    pub fn config(&self) -> Option<usize> {
        self.config
    }

    /// Whether the scenario has a teardown phase.
    pub fn has_teardown(&self) -> bool {
        self.scenario.has_teardown()
    }

    /// The scenario itself.
    pub fn scenario(&self) -> &dyn Scenario {
        self.scenario.as_ref()
    }
}

impl fmt::Debug for ScenarioDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioDescriptor")
            .field("id", &self.id())
            .field("config", &self.config)
            .field("has_teardown", &self.has_teardown())
            .finish()
    }
}

/// Result of activating one scenario.
#[derive(Debug)]
pub struct ActivationRecord {
    /// Which scenario.
    pub id: ScenarioId,
    /// What the activation did, or why it stopped early.
    pub result: Result<ScenarioOutcome, FaultError>,
}

/// Result of tearing down one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownRecord {
    /// Which scenario.
    pub id: ScenarioId,
    /// What teardown reported.
    pub report: TeardownReport,
}

/// Everything the activation pass did, in dispatch order.
#[derive(Debug, Default)]
pub struct DispatchReport {
    records: Vec<ActivationRecord>,
}

impl DispatchReport {
    /// Records in dispatch order.
    pub fn records(&self) -> &[ActivationRecord] {
        &self.records
    }

    /// Ids activated, in dispatch order (successful or not).
    pub fn activated(&self) -> Vec<ScenarioId> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// The record for one scenario.
    pub fn get(&self, id: ScenarioId) -> Option<&ActivationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Records whose activation failed.
    pub fn failures(&self) -> impl Iterator<Item = (ScenarioId, &FaultError)> {
        self.records
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (r.id, e)))
    }

    /// Process status: 0, or 1 if any background task could not be created.
    ///
    /// Allocation failures are logged but do not change the status.
    pub fn status_code(&self) -> i32 {
        if self.failures().any(|(_, e)| e.is_task_creation()) {
            1
        } else {
            0
        }
    }
}

/// Ordered catalog of scenarios.
#[derive(Debug, Default)]
pub struct Registry {
    descriptors: Vec<ScenarioDescriptor>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in catalog, one descriptor per [`ScenarioId`].
    pub fn standard(settings: &ScenarioSettings) -> Self {
        let mut registry = Self::new();
        registry
            .register(ScenarioDescriptor::new(Leak))
            .register(ScenarioDescriptor::new(UseAfterFree))
            .register(ScenarioDescriptor::new(LockOrderInversion::new(
                settings.lockdep,
            )))
            .register(ScenarioDescriptor::new(DataRace::new(settings.race)))
            .register(
                ScenarioDescriptor::new(OutOfBounds::new(settings.out_of_bounds))
                    .with_config(settings.out_of_bounds.default_size),
            );
        registry
    }

    /// Add a descriptor at its registry position, replacing any with the same id.
    pub fn register(&mut self, descriptor: ScenarioDescriptor) -> &mut Self {
        let id = descriptor.id();
        match self.descriptors.binary_search_by_key(&id, ScenarioDescriptor::id) {
            Ok(pos) => self.descriptors[pos] = descriptor,
            Err(pos) => self.descriptors.insert(pos, descriptor),
        }
        self
    }

    /// Descriptor for one scenario.
    pub fn get(&self, id: ScenarioId) -> Option<&ScenarioDescriptor> {
        self.descriptors.iter().find(|d| d.id() == id)
    }

    /// Descriptors in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &ScenarioDescriptor> {
        self.descriptors.iter()
    }

    /// Number of registered scenarios.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Activation pass: run every enabled scenario once, in registry order.
    pub fn activate(
        &self,
        selection: &Selection,
        allocator: &dyn Allocator,
        driver: &ConcurrencyDriver,
    ) -> DispatchReport {
        for id in selection.enabled() {
            if self.get(id).is_none() {
                tracing::warn!(scenario = %id, "enabled scenario is not registered");
            }
        }

        let mut report = DispatchReport::default();
        for descriptor in self.enabled(selection) {
            let id = descriptor.id();
            let ctx = ScenarioContext {
                allocator,
                driver,
                value: selection.value(id).or(descriptor.config()),
            };

            tracing::debug!(scenario = %id, value = ?ctx.value, "activating");
            let result = descriptor.scenario().activate(&ctx);
            if let Err(e) = &result {
                tracing::error!(scenario = %id, error = %e, "activation failed, continuing");
            }
            report.records.push(ActivationRecord { id, result });
        }
        report
    }

    /// Teardown pass: retire every enabled scenario that has a teardown
    /// phase, in registry order.
    pub fn teardown(
        &self,
        selection: &Selection,
        allocator: &dyn Allocator,
        driver: &ConcurrencyDriver,
    ) -> Vec<TeardownRecord> {
        let mut records = Vec::new();
        for descriptor in self.enabled(selection).filter(|d| d.has_teardown()) {
            let id = descriptor.id();
            let ctx = ScenarioContext {
                allocator,
                driver,
                value: selection.value(id).or(descriptor.config()),
            };

            tracing::debug!(scenario = %id, "tearing down");
            if let Some(report) = descriptor.scenario().teardown(&ctx) {
                records.push(TeardownRecord { id, report });
            }
        }
        records
    }

    fn enabled<'a>(
        &'a self,
        selection: &'a Selection,
    ) -> impl Iterator<Item = &'a ScenarioDescriptor> + 'a {
        self.descriptors
            .iter()
            .filter(move |d| selection.is_enabled(d.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::MockAllocator;
    use crate::scenarios::{RaceSettings, LEAK_SIZE};
    use std::sync::{Arc, Mutex};

    /// Records every call; fails activation when told to.
    struct Recording {
        id: ScenarioId,
        log: Arc<Mutex<Vec<String>>>,
        teardown: bool,
        fail_with: Option<fn() -> FaultError>,
    }

    impl Recording {
        fn new(id: ScenarioId, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                id,
                log: Arc::clone(log),
                teardown: id.has_teardown(),
                fail_with: None,
            }
        }
    }

    impl Scenario for Recording {
        fn id(&self) -> ScenarioId {
            self.id
        }

        fn activate(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioOutcome, FaultError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("activate:{}:{:?}", self.id, ctx.value));
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(ScenarioOutcome::Spawned { tasks: vec![] }),
            }
        }

        fn has_teardown(&self) -> bool {
            self.teardown
        }

        fn teardown(&self, _ctx: &ScenarioContext<'_>) -> Option<TeardownReport> {
            self.log.lock().unwrap().push(format!("teardown:{}", self.id));
            Some(TeardownReport::Announced {
                joined: 0,
                abandoned: 0,
            })
        }
    }

    fn recording_registry(log: &Arc<Mutex<Vec<String>>>) -> Registry {
        let mut registry = Registry::new();
        // Registered out of order on purpose.
        for id in ScenarioId::ALL.into_iter().rev() {
            registry.register(ScenarioDescriptor::new(Recording::new(id, log)));
        }
        registry
    }

    /// Every subset of the catalog, as selections.
    fn all_subsets() -> Vec<Selection> {
        (0u32..(1 << ScenarioId::ALL.len()))
            .map(|mask| {
                ScenarioId::ALL
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, id)| id)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn register_keeps_registry_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = recording_registry(&log);
        let ids: Vec<_> = registry.iter().map(|d| d.id()).collect();
        assert_eq!(ids, ScenarioId::ALL.to_vec());
    }

    #[test]
    fn register_replaces_same_id() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = recording_registry(&log);
        registry.register(ScenarioDescriptor::new(Leak).with_config(7));
        assert_eq!(registry.len(), ScenarioId::ALL.len());
        assert_eq!(registry.get(ScenarioId::Leak).unwrap().config(), Some(7));
    }

    #[test]
    fn every_subset_activates_exactly_enabled_in_order() {
        let alloc = MockAllocator::new();
        let driver = ConcurrencyDriver::new();

        for selection in all_subsets() {
            let log = Arc::new(Mutex::new(Vec::new()));
            let registry = recording_registry(&log);

            let report = registry.activate(&selection, &alloc, &driver);
            let expected: Vec<ScenarioId> = selection.enabled().collect();
            assert_eq!(report.activated(), expected);

            let teardowns = registry.teardown(&selection, &alloc, &driver);
            let expected_teardown: Vec<ScenarioId> = expected
                .iter()
                .copied()
                .filter(|id| id.has_teardown())
                .collect();
            let torn_down: Vec<_> = teardowns.iter().map(|r| r.id).collect();
            assert_eq!(torn_down, expected_teardown);

            let calls = log.lock().unwrap().clone();
            let activations = calls.iter().filter(|c| c.starts_with("activate:")).count();
            assert_eq!(activations, expected.len());
            // All activations precede all teardowns.
            let first_teardown = calls.iter().position(|c| c.starts_with("teardown:"));
            if let Some(pos) = first_teardown {
                assert_eq!(pos, expected.len());
            }
        }
    }

    #[test]
    fn failed_activation_does_not_stop_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = recording_registry(&log);
        let mut failing = Recording::new(ScenarioId::UseAfterFree, &log);
        failing.fail_with = Some(|| FaultError::Allocation {
            size: 100,
            reason: "injected".to_string(),
        });
        registry.register(ScenarioDescriptor::new(failing));

        let alloc = MockAllocator::new();
        let driver = ConcurrencyDriver::new();
        let report = registry.activate(&Selection::all(), &alloc, &driver);

        assert_eq!(report.activated(), ScenarioId::ALL.to_vec());
        let failures: Vec<_> = report.failures().map(|(id, _)| id).collect();
        assert_eq!(failures, vec![ScenarioId::UseAfterFree]);
        assert_eq!(report.status_code(), 0);
    }

    #[test]
    fn task_creation_failure_sets_status() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = recording_registry(&log);
        let mut failing = Recording::new(ScenarioId::DataRace, &log);
        failing.fail_with = Some(|| FaultError::TaskSpawn {
            name: "race_thread1".to_string(),
            reason: "injected".to_string(),
        });
        registry.register(ScenarioDescriptor::new(failing));

        let alloc = MockAllocator::new();
        let driver = ConcurrencyDriver::new();
        let report = registry.activate(&Selection::all(), &alloc, &driver);

        assert_eq!(report.status_code(), 1);
        assert!(report.get(ScenarioId::OutOfBounds).unwrap().result.is_ok());
    }

    #[test]
    fn selection_value_overrides_descriptor_config() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        registry.register(
            ScenarioDescriptor::new(Recording::new(ScenarioId::OutOfBounds, &log)).with_config(16),
        );
        let alloc = MockAllocator::new();
        let driver = ConcurrencyDriver::new();

        let mut selection = Selection::new();
        selection.enable(ScenarioId::OutOfBounds);
        registry.activate(&selection, &alloc, &driver);
        selection.enable_with(ScenarioId::OutOfBounds, 64);
        registry.activate(&selection, &alloc, &driver);

        let calls = log.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "activate:out_of_bounds:Some(16)".to_string(),
                "activate:out_of_bounds:Some(64)".to_string(),
            ]
        );
    }

    #[test]
    fn unregistered_scenarios_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        registry.register(ScenarioDescriptor::new(Recording::new(ScenarioId::Leak, &log)));

        let alloc = MockAllocator::new();
        let driver = ConcurrencyDriver::new();
        let report = registry.activate(&Selection::all(), &alloc, &driver);
        assert_eq!(report.activated(), vec![ScenarioId::Leak]);
    }

    #[test]
    fn first_allocation_failure_does_not_block_later_scenarios() {
        // Only the first allocator call fails: Leak loses its block, the
        // later memory scenarios still inject their faults.
        let alloc = MockAllocator::failing_first(1);
        let driver = ConcurrencyDriver::new();
        let registry = Registry::standard(&ScenarioSettings::default());
        let selection =
            Selection::parse_params("leak use_after_free slab_poison=32").unwrap();

        let report = registry.activate(&selection, &alloc, &driver);

        assert_eq!(
            report.activated(),
            vec![
                ScenarioId::Leak,
                ScenarioId::UseAfterFree,
                ScenarioId::OutOfBounds
            ]
        );
        assert!(matches!(
            report.get(ScenarioId::Leak).unwrap().result,
            Err(FaultError::Allocation { size: LEAK_SIZE, .. })
        ));
        assert!(report.get(ScenarioId::UseAfterFree).unwrap().result.is_ok());
        assert!(matches!(
            report.get(ScenarioId::OutOfBounds).unwrap().result,
            Ok(ScenarioOutcome::WroteOutOfBounds { size: 32, .. })
        ));
        assert_eq!(report.status_code(), 0);
        assert_eq!(alloc.failure_count(), 1);
        assert_eq!(alloc.allocation_count(), 2);
    }

    #[test]
    fn standard_registry_covers_catalog() {
        let registry = Registry::standard(&ScenarioSettings {
            race: RaceSettings {
                loop_count: 10,
                ..RaceSettings::default()
            },
            ..ScenarioSettings::default()
        });
        let ids: Vec<_> = registry.iter().map(|d| d.id()).collect();
        assert_eq!(ids, ScenarioId::ALL.to_vec());
        assert_eq!(
            registry.get(ScenarioId::OutOfBounds).unwrap().config(),
            Some(16)
        );
        let with_teardown: Vec<_> = registry
            .iter()
            .filter(|d| d.has_teardown())
            .map(|d| d.id())
            .collect();
        assert_eq!(
            with_teardown,
            vec![ScenarioId::LockOrderInversion, ScenarioId::DataRace]
        );
    }
}
