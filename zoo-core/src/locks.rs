//! The lock pair abused by the lock-order inversion scenario.
//!
//! [`OrderedLockPair`] is two plain mutexes with no ordering discipline.
//! [`LockJournal`] is harness bookkeeping: tasks record when they attempt,
//! acquire and release each lock so the acquisition order and the overlap
//! between tasks can be inspected afterwards. The journal has its own
//! mutex and never touches A or B.

use std::fmt;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Instant;

/// Which lock of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockName {
    /// Lock A.
    A,
    /// Lock B.
    B,
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockName::A => f.write_str("lock_a"),
            LockName::B => f.write_str("lock_b"),
        }
    }
}

/// Two independently acquirable mutual-exclusion locks.
#[derive(Debug, Default)]
pub struct OrderedLockPair {
    a: Mutex<()>,
    b: Mutex<()>,
}

impl OrderedLockPair {
    /// Create a fresh, unlocked pair.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the named lock is held.
    ///
    /// Poisoning is ignored: a panicking holder still released the lock.
    pub fn lock(&self, name: LockName) -> MutexGuard<'_, ()> {
        let mutex = match name {
            LockName::A => &self.a,
            LockName::B => &self.b,
        };
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the named lock is currently held by anyone.
    pub fn is_held(&self, name: LockName) -> bool {
        let mutex = match name {
            LockName::A => &self.a,
            LockName::B => &self.b,
        };
        matches!(mutex.try_lock(), Err(TryLockError::WouldBlock))
    }
}

/// What happened to a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    /// The task is about to block on the lock.
    Attempt,
    /// The task holds the lock.
    Acquired,
    /// The task dropped the lock.
    Released,
}

/// One journal entry.
#[derive(Debug, Clone)]
pub struct LockEvent {
    /// Task name.
    pub task: String,
    /// Which lock.
    pub lock: LockName,
    /// What happened.
    pub action: LockAction,
    /// When it happened.
    pub at: Instant,
}

/// Append-only log of lock events.
#[derive(Debug, Default)]
pub struct LockJournal {
    events: Mutex<Vec<LockEvent>>,
}

impl LockJournal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event stamped with the current time.
    pub fn record(&self, task: &str, lock: LockName, action: LockAction) {
        self.entries().push(LockEvent {
            task: task.to_string(),
            lock,
            action,
            at: Instant::now(),
        });
    }

    /// Copy of every event so far.
    pub fn events(&self) -> Vec<LockEvent> {
        self.entries().clone()
    }

    /// Locks acquired by a task, in acquisition order.
    pub fn acquisition_order(&self, task: &str) -> Vec<LockName> {
        self.entries()
            .iter()
            .filter(|e| e.task == task && e.action == LockAction::Acquired)
            .map(|e| e.lock)
            .collect()
    }

    /// Locks a task has attempted, in attempt order.
    pub fn attempt_order(&self, task: &str) -> Vec<LockName> {
        self.entries()
            .iter()
            .filter(|e| e.task == task && e.action == LockAction::Attempt)
            .map(|e| e.lock)
            .collect()
    }

    /// Whether both tasks were active (first event to last event) at the
    /// same moment. A task that never finished counts as still active.
    pub fn overlapped(&self, first: &str, second: &str) -> bool {
        let entries = self.entries();
        let span = |task: &str| {
            let mut stamps = entries.iter().filter(|e| e.task == task).map(|e| e.at);
            let start = stamps.next()?;
            let released_all = entries
                .iter()
                .filter(|e| e.task == task && e.action == LockAction::Released)
                .count()
                >= 2;
            let end = if released_all {
                entries
                    .iter()
                    .filter(|e| e.task == task)
                    .map(|e| e.at)
                    .max()
            } else {
                None
            };
            Some((start, end))
        };

        match (span(first), span(second)) {
            (Some((s1, e1)), Some((s2, e2))) => {
                let first_before_second_ends = e2.map_or(true, |end| s1 <= end);
                let second_before_first_ends = e1.map_or(true, |end| s2 <= end);
                first_before_second_ends && second_before_first_ends
            }
            _ => false,
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<LockEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}
