//! Concurrency driver: background tasks and the shared resources they abuse.
//!
//! The driver owns every piece of process-wide mutable state the threaded
//! scenarios need:
//! - the [`OrderedLockPair`] and its [`LockJournal`]
//! - the [`SharedCounter`] and the tally of increments attempted on it
//! - the handles of every [`BackgroundTask`], grouped by scenario
//!
//! Tasks are named OS threads. Activation never waits on them; teardown
//! decides per scenario whether to join (after a cooperative stop) or to
//! abandon tasks that may be blocked forever.
//!
//! [`ConcurrencyDriver::reset`] swaps in fresh resources, so a deadlocked
//! pair from an earlier run stays with the threads stuck on it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use zoo_types::{FaultError, ScenarioId};

use crate::counter::SharedCounter;
use crate::locks::{LockJournal, OrderedLockPair};

/// Resources shared between the driver and its tasks.
#[derive(Debug, Default)]
pub struct SharedResources {
    /// Locks A and B.
    pub locks: OrderedLockPair,
    /// Record of lock events.
    pub journal: LockJournal,
    /// The unsynchronized counter.
    pub counter: SharedCounter,
    /// Increments racing tasks completed, tallied atomically when each
    /// task returns. Bookkeeping only; never touches `counter`.
    pub attempted: AtomicU64,
}

/// Cooperative stop flag, checked by tasks between loop iterations.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Create an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask tasks to stop at their next check.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a task body receives.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Thread name.
    pub name: String,
    /// Resources current at spawn time.
    pub resources: Arc<SharedResources>,
    /// The scenario's stop signal.
    pub stop: StopSignal,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// The task body has not returned.
    Running,
    /// The task body returned or panicked.
    Stopped,
}

/// One background thread spawned for a scenario.
#[derive(Debug)]
pub struct BackgroundTask {
    name: String,
    scenario: ScenarioId,
    finished: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning scenario.
    pub fn scenario(&self) -> ScenarioId {
        self.scenario
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        if self.finished.load(Ordering::SeqCst) {
            TaskState::Stopped
        } else {
            TaskState::Running
        }
    }

    fn info(&self) -> TaskInfo {
        TaskInfo {
            name: self.name.clone(),
            scenario: self.scenario,
            state: self.state(),
        }
    }
}

/// Snapshot of a task for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Thread name.
    pub name: String,
    /// Owning scenario.
    pub scenario: ScenarioId,
    /// State at snapshot time.
    pub state: TaskState,
}

/// Result of joining a scenario's tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinSummary {
    /// Tasks that returned normally.
    pub joined: Vec<String>,
    /// Tasks that panicked.
    pub panicked: Vec<String>,
}

impl JoinSummary {
    /// One [`FaultError::TaskPanicked`] per task that panicked.
    pub fn failures(&self) -> Vec<FaultError> {
        self.panicked
            .iter()
            .map(|name| FaultError::TaskPanicked { name: name.clone() })
            .collect()
    }
}

/// Result of abandoning a scenario's tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbandonSummary {
    /// Tasks that had already finished and were joined.
    pub joined: usize,
    /// Tasks still running, detached.
    pub abandoned: usize,
}

#[derive(Debug, Default)]
struct TaskGroup {
    stop: StopSignal,
    tasks: Vec<BackgroundTask>,
}

/// Marks a task finished when its body returns or unwinds.
struct FinishGuard(Arc<AtomicBool>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Spawns, names, tracks and retires background tasks.
#[derive(Debug, Default)]
pub struct ConcurrencyDriver {
    resources: Mutex<Arc<SharedResources>>,
    groups: Mutex<BTreeMap<ScenarioId, TaskGroup>>,
    task_limit: Option<usize>,
}

impl ConcurrencyDriver {
    /// Create a driver with fresh resources and no task limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to track more than `limit` tasks at once.
    ///
    /// Spawning past the limit fails the same way thread exhaustion would.
    pub fn with_task_limit(mut self, limit: usize) -> Self {
        self.task_limit = Some(limit);
        self
    }

    /// The resources new tasks will receive.
    pub fn resources(&self) -> Arc<SharedResources> {
        Arc::clone(&self.lock_resources())
    }

    /// Spawn a named OS thread for `scenario` and return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`FaultError::TaskSpawn`] if the task limit is reached or the
    /// OS refuses to create the thread.
    pub fn spawn<F>(&self, scenario: ScenarioId, name: &str, body: F) -> Result<(), FaultError>
    where
        F: FnOnce(TaskContext) + Send + 'static,
    {
        let mut groups = self.lock_groups();

        if let Some(limit) = self.task_limit {
            let tracked: usize = groups.values().map(|g| g.tasks.len()).sum();
            if tracked >= limit {
                return Err(FaultError::TaskSpawn {
                    name: name.to_string(),
                    reason: format!("task limit of {limit} reached"),
                });
            }
        }

        let group = groups.entry(scenario).or_default();
        let ctx = TaskContext {
            name: name.to_string(),
            resources: self.resources(),
            stop: group.stop.clone(),
        };

        let finished = Arc::new(AtomicBool::new(false));
        let guard = FinishGuard(Arc::clone(&finished));
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                body(ctx);
            })
            .map_err(|e| FaultError::TaskSpawn {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        group.tasks.push(BackgroundTask {
            name: name.to_string(),
            scenario,
            finished,
            handle: Some(handle),
        });
        tracing::debug!(scenario = %scenario, task = name, "spawned background task");

        Ok(())
    }

    /// Ask every task of `scenario` to stop at its next check.
    pub fn request_stop(&self, scenario: ScenarioId) {
        if let Some(group) = self.lock_groups().get(&scenario) {
            group.stop.request();
        }
    }

    /// Join every task of `scenario`, blocking until each returns.
    ///
    /// Only call this for tasks that are known to terminate.
    pub fn join_scenario(&self, scenario: ScenarioId) -> JoinSummary {
        let Some(group) = self.lock_groups().remove(&scenario) else {
            return JoinSummary::default();
        };

        let mut summary = JoinSummary::default();
        for mut task in group.tasks {
            let outcome = task.handle.take().map(JoinHandle::join);
            match outcome {
                Some(Err(_)) => {
                    tracing::error!(scenario = %scenario, task = %task.name, "task panicked");
                    summary.panicked.push(task.name);
                }
                _ => summary.joined.push(task.name),
            }
        }
        summary
    }

    /// Retire every task of `scenario` without blocking.
    ///
    /// Finished tasks are joined; tasks still running (possibly blocked
    /// forever) are detached and keep their resources alive.
    pub fn abandon_scenario(&self, scenario: ScenarioId) -> AbandonSummary {
        let Some(group) = self.lock_groups().remove(&scenario) else {
            return AbandonSummary::default();
        };

        let mut summary = AbandonSummary::default();
        for mut task in group.tasks {
            match (task.state(), task.handle.take()) {
                (TaskState::Stopped, Some(handle)) => {
                    if handle.join().is_err() {
                        tracing::warn!(scenario = %scenario, task = %task.name, "task panicked");
                    }
                    summary.joined += 1;
                }
                (_, handle) => {
                    drop(handle);
                    tracing::debug!(scenario = %scenario, task = %task.name, "abandoned running task");
                    summary.abandoned += 1;
                }
            }
        }
        summary
    }

    /// Snapshot of every tracked task.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.lock_groups()
            .values()
            .flat_map(|g| g.tasks.iter().map(BackgroundTask::info))
            .collect()
    }

    /// Snapshot of the tasks of one scenario.
    pub fn tasks_for(&self, scenario: ScenarioId) -> Vec<TaskInfo> {
        self.lock_groups()
            .get(&scenario)
            .map(|g| g.tasks.iter().map(BackgroundTask::info).collect())
            .unwrap_or_default()
    }

    /// Number of tracked tasks still running.
    pub fn running_count(&self) -> usize {
        self.tasks()
            .iter()
            .filter(|t| t.state == TaskState::Running)
            .count()
    }

    /// Abandon every task and install fresh shared resources.
    pub fn reset(&self) {
        let scenarios: Vec<ScenarioId> = self.lock_groups().keys().copied().collect();
        for scenario in scenarios {
            self.request_stop(scenario);
            self.abandon_scenario(scenario);
        }
        *self.lock_resources() = Arc::new(SharedResources::default());
        tracing::debug!("driver reset");
    }

    fn lock_resources(&self) -> MutexGuard<'_, Arc<SharedResources>> {
        self.resources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_groups(&self) -> MutexGuard<'_, BTreeMap<ScenarioId, TaskGroup>> {
        self.groups.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn spawned_task_is_named() {
        let driver = ConcurrencyDriver::new();
        let (tx, rx) = mpsc::channel();
        driver
            .spawn(ScenarioId::DataRace, "race_thread1", move |ctx| {
                let name = thread::current().name().map(str::to_string);
                tx.send((name, ctx.name)).unwrap();
            })
            .unwrap();

        let (thread_name, ctx_name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(thread_name.as_deref(), Some("race_thread1"));
        assert_eq!(ctx_name, "race_thread1");

        let summary = driver.join_scenario(ScenarioId::DataRace);
        assert_eq!(summary.joined, vec!["race_thread1".to_string()]);
    }

    #[test]
    fn spawn_returns_without_waiting() {
        let driver = ConcurrencyDriver::new();
        let (tx, rx) = mpsc::channel::<()>();
        driver
            .spawn(ScenarioId::LockOrderInversion, "blocked", move |_| {
                let _ = rx.recv();
            })
            .unwrap();

        assert_eq!(driver.running_count(), 1);
        tx.send(()).unwrap();
        let summary = driver.join_scenario(ScenarioId::LockOrderInversion);
        assert_eq!(summary.joined.len(), 1);
        assert!(driver.tasks().is_empty());
    }

    #[test]
    fn stop_signal_reaches_task() {
        let driver = ConcurrencyDriver::new();
        driver
            .spawn(ScenarioId::DataRace, "looper", |ctx| {
                while !ctx.stop.is_requested() {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();

        driver.request_stop(ScenarioId::DataRace);
        let summary = driver.join_scenario(ScenarioId::DataRace);
        assert_eq!(summary.joined, vec!["looper".to_string()]);
    }

    #[test]
    fn task_limit_refuses_spawn() {
        let driver = ConcurrencyDriver::new().with_task_limit(1);
        driver.spawn(ScenarioId::DataRace, "first", |_| {}).unwrap();
        let err = driver
            .spawn(ScenarioId::DataRace, "second", |_| {})
            .unwrap_err();

        assert!(err.is_task_creation());
        assert_eq!(driver.tasks_for(ScenarioId::DataRace).len(), 1);
        driver.join_scenario(ScenarioId::DataRace);
    }

    #[test]
    fn panicking_task_is_reported() {
        let driver = ConcurrencyDriver::new();
        driver
            .spawn(ScenarioId::DataRace, "boom", |_| panic!("injected"))
            .unwrap();

        let summary = driver.join_scenario(ScenarioId::DataRace);
        assert_eq!(summary.panicked, vec!["boom".to_string()]);
        assert!(summary.joined.is_empty());

        let failures = summary.failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0],
            FaultError::TaskPanicked { name } if name == "boom"
        ));
        assert_eq!(failures[0].to_string(), "task boom panicked");
    }

    #[test]
    fn abandon_detaches_running_and_joins_finished() {
        let driver = ConcurrencyDriver::new();
        let (tx, rx) = mpsc::channel::<()>();
        driver
            .spawn(ScenarioId::LockOrderInversion, "quick", |_| {})
            .unwrap();
        driver
            .spawn(ScenarioId::LockOrderInversion, "stuck", move |_| {
                let _ = rx.recv();
            })
            .unwrap();

        // Wait for the quick task to finish.
        for _ in 0..500 {
            if driver.running_count() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let summary = driver.abandon_scenario(ScenarioId::LockOrderInversion);
        assert_eq!(summary, AbandonSummary { joined: 1, abandoned: 1 });
        drop(tx);
    }

    #[test]
    fn reset_installs_fresh_resources() {
        let driver = ConcurrencyDriver::new();
        let before = driver.resources();
        before.counter.increment();

        driver.reset();
        let after = driver.resources();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.counter.get(), 0);
        assert_eq!(before.counter.get(), 1);
    }

    #[test]
    fn unknown_scenario_join_is_empty() {
        let driver = ConcurrencyDriver::new();
        assert_eq!(driver.join_scenario(ScenarioId::Leak), JoinSummary::default());
        assert_eq!(
            driver.abandon_scenario(ScenarioId::Leak),
            AbandonSummary::default()
        );
    }
}
