//! Configuration loading for debug-zoo.
//!
//! Configuration is loaded from a TOML file (`--config PATH`, else
//! `config.toml` in the platform config directory). Every section and
//! field is optional.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use zoo_core::{LockTiming, OutOfBoundsSettings, RaceSettings, ScenarioSettings};
use zoo_types::{FaultError, ScenarioId, Selection};

/// Root configuration for debug-zoo.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enable flags, module-parameter style.
    pub scenarios: ScenarioFlags,
    /// Lock-order inversion timing.
    pub lockdep: LockTiming,
    /// Data race loop shape.
    pub race: RaceSettings,
    /// Out-of-bounds defaults.
    pub out_of_bounds: OutOfBoundsSettings,
    /// Harness limits.
    pub harness: HarnessConfig,
}

/// Enable flags from the `[scenarios]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioFlags {
    /// Enable the leak scenario.
    pub leak: bool,
    /// Enable the use-after-free scenario.
    pub use_after_free: bool,
    /// Enable the lock-order inversion scenario.
    pub lockdep: bool,
    /// Enable the data race scenario.
    pub race: bool,
    /// Out-of-bounds buffer size; 0 disables.
    pub slab_poison: i64,
}

/// Harness configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Maximum background tasks alive at once (unbounded if unset).
    pub max_tasks: Option<usize>,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load from `path` if given, else from the default location if a file
    /// exists there, else built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "loading default config");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Scenarios enabled by the `[scenarios]` section.
    pub fn selection(&self) -> Result<Selection, FaultError> {
        let flags = &self.scenarios;
        let mut selection = Selection::new();
        for (id, on) in [
            (ScenarioId::Leak, flags.leak),
            (ScenarioId::UseAfterFree, flags.use_after_free),
            (ScenarioId::LockOrderInversion, flags.lockdep),
            (ScenarioId::DataRace, flags.race),
        ] {
            if on {
                selection.enable(id);
            }
        }
        selection.set_flag(ScenarioId::OutOfBounds, flags.slab_poison)?;
        Ok(selection)
    }

    /// Scenario tunables.
    pub fn settings(&self) -> ScenarioSettings {
        ScenarioSettings {
            lockdep: self.lockdep,
            race: self.race,
            out_of_bounds: self.out_of_bounds,
        }
    }
}

/// `config.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "ydun", "debug-zoo")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
