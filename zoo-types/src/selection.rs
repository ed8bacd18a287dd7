//! Scenario selection flags.
//!
//! A [`Selection`] is the enable mapping handed to the dispatcher at
//! startup: scenario name to boolean or integer flag, the same shape as
//! module parameters (`leak=1 race=1 slab_poison=32`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{FaultError, ScenarioId};

/// The set of enabled scenarios, each with an optional numeric value.
///
/// Iteration is always in registry order, independent of the order in
/// which scenarios were enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    enabled: BTreeMap<ScenarioId, Option<usize>>,
}

impl Selection {
    /// An empty selection (nothing runs).
    pub fn new() -> Self {
        Self::default()
    }

    /// Every scenario enabled with no value.
    pub fn all() -> Self {
        let mut selection = Self::new();
        for id in ScenarioId::ALL {
            selection.enable(id);
        }
        selection
    }

    /// Enable a scenario, keeping any value already set.
    pub fn enable(&mut self, id: ScenarioId) -> &mut Self {
        self.enabled.entry(id).or_insert(None);
        self
    }

    /// Enable a scenario with a numeric value.
    pub fn enable_with(&mut self, id: ScenarioId, value: usize) -> &mut Self {
        self.enabled.insert(id, Some(value));
        self
    }

    /// Disable a scenario.
    pub fn disable(&mut self, id: ScenarioId) -> &mut Self {
        self.enabled.remove(&id);
        self
    }

    /// Apply one integer flag: `0` disables, anything else enables.
    ///
    /// For scenarios that take a value the flag itself is the value.
    pub fn set_flag(&mut self, id: ScenarioId, flag: i64) -> Result<&mut Self, FaultError> {
        if flag == 0 {
            return Ok(self.disable(id));
        }
        if flag < 0 {
            return Err(FaultError::InvalidSelection(format!(
                "{id}: negative flag {flag}"
            )));
        }
        if id.takes_value() {
            let value = usize::try_from(flag).map_err(|_| {
                FaultError::InvalidSelection(format!("{id}: value {flag} out of range"))
            })?;
            Ok(self.enable_with(id, value))
        } else {
            Ok(self.enable(id))
        }
    }

    /// Parse module-parameter style tokens: `key` or `key=value`.
    ///
    /// Tokens may be separated by whitespace or commas.
    pub fn parse_params(input: &str) -> Result<Self, FaultError> {
        let mut selection = Self::new();
        for token in input
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
        {
            selection.apply_param(token)?;
        }
        Ok(selection)
    }

    /// Apply a single `key[=value]` token.
    pub fn apply_param(&mut self, token: &str) -> Result<&mut Self, FaultError> {
        match token.split_once('=') {
            None => {
                let id: ScenarioId = token.parse()?;
                Ok(self.enable(id))
            }
            Some((key, value)) => {
                let id: ScenarioId = key.parse()?;
                let flag: i64 = value.trim().parse().map_err(|_| {
                    FaultError::InvalidSelection(format!("{key}: '{value}' is not an integer"))
                })?;
                self.set_flag(id, flag)
            }
        }
    }

    /// Add everything enabled in `other`; values from `other` win.
    pub fn merge(&mut self, other: &Selection) -> &mut Self {
        for (id, value) in &other.enabled {
            match value {
                Some(v) => self.enable_with(*id, *v),
                None => self.enable(*id),
            };
        }
        self
    }

    /// Whether a scenario is enabled.
    pub fn is_enabled(&self, id: ScenarioId) -> bool {
        self.enabled.contains_key(&id)
    }

    /// The numeric value for a scenario, if enabled with one.
    pub fn value(&self, id: ScenarioId) -> Option<usize> {
        self.enabled.get(&id).copied().flatten()
    }

    /// Enabled scenarios in registry order.
    pub fn enabled(&self) -> impl Iterator<Item = ScenarioId> + '_ {
        self.enabled.keys().copied()
    }

    /// Number of enabled scenarios.
    pub fn len(&self) -> usize {
        self.enabled.len()
    }

    /// Check if nothing is enabled.
    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }
}

impl FromIterator<ScenarioId> for Selection {
    fn from_iter<I: IntoIterator<Item = ScenarioId>>(iter: I) -> Self {
        let mut selection = Self::new();
        for id in iter {
            selection.enable(id);
        }
        selection
    }
}
