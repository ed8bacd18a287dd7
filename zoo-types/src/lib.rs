//! # zoo-types
//!
//! Foundational types for the debug-zoo fault-scenario harness.
//!
//! This crate provides the types shared by every debug-zoo crate:
//! - [`ScenarioId`] - The catalog of fault patterns, in registry order
//! - [`Selection`] - Which scenarios are enabled, and with what value
//! - [`FaultError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod scenario;
mod selection;

pub use error::FaultError;
pub use scenario::ScenarioId;
pub use selection::Selection;
