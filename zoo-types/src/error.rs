//! Error types for debug-zoo.

use thiserror::Error;

/// Errors that can occur while dispatching fault scenarios.
///
/// Only control-flow failures live here. The faults a scenario injects
/// (leaked blocks, dangling reads, lost updates) are never errors.
#[derive(Debug, Error)]
pub enum FaultError {
    /// The allocator could not provide a block.
    #[error("allocation of {size} bytes failed: {reason}")]
    Allocation {
        /// Requested size in bytes.
        size: usize,
        /// Why the allocation failed.
        reason: String,
    },

    /// A background task could not be created.
    #[error("failed to spawn task {name}: {reason}")]
    TaskSpawn {
        /// Name the task would have carried.
        name: String,
        /// Why creation failed.
        reason: String,
    },

    /// A background task panicked before it could be joined.
    #[error("task {name} panicked")]
    TaskPanicked {
        /// Name of the task.
        name: String,
    },

    /// A scenario name did not match the catalog.
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    /// A selection flag could not be interpreted.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
}

impl FaultError {
    /// Returns true for failures to create background tasks.
    ///
    /// These are the only failures reflected in the startup status code.
    pub fn is_task_creation(&self) -> bool {
        matches!(self, FaultError::TaskSpawn { .. })
    }
}
