//! Bridge configuration parsing and validation.
//!
//! Configuration is loaded from a TOML file. The worker executable, its
//! arguments, and its working directory differ between a `development`
//! checkout and a `packaged` install, so both launch specs are declared in
//! the file and the active one is selected by [`BridgeConfig::mode`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{BridgeError, Result};

/// Which worker launch spec is active.
#[derive(Debug, Copy, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Running from a source checkout; paths are relative to the repo.
    Development,
    /// Running from an installed bundle; paths are relative to the install.
    Packaged,
}

/// How to launch the worker in one mode: executable, arguments, and the
/// directory the process starts in.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LaunchSpec {
    /// Worker executable path.
    pub executable: PathBuf,
    /// Arguments passed to the worker executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory the worker starts in.
    pub working_dir: PathBuf,
}

/// Configurable timeout values (seconds) for worker interactions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Per-command timeout; a command with no resolving event within this
    /// window fails with `CommandTimedOut`.
    #[serde(default = "default_command_seconds")]
    pub command_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_seconds: default_command_seconds(),
        }
    }
}

fn default_command_seconds() -> u64 {
    300
}

/// Per-mode worker launch specs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Launch spec used in [`LaunchMode::Development`].
    pub development: LaunchSpec,
    /// Launch spec used in [`LaunchMode::Packaged`].
    pub packaged: LaunchSpec,
}

/// Bridge configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Active launch mode.
    pub mode: LaunchMode,
    /// Worker launch specs for both modes.
    pub worker: WorkerConfig,
    /// Timeout tunables.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| BridgeError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// The launch spec selected by the active mode.
    #[must_use]
    pub fn launch_spec(&self) -> &LaunchSpec {
        match self.mode {
            LaunchMode::Development => &self.worker.development,
            LaunchMode::Packaged => &self.worker.packaged,
        }
    }

    /// Per-command timeout as a [`Duration`].
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.command_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.timeouts.command_seconds == 0 {
            return Err(BridgeError::Config(
                "timeouts.command_seconds must be greater than zero".into(),
            ));
        }

        for (mode, spec) in [
            ("development", &self.worker.development),
            ("packaged", &self.worker.packaged),
        ] {
            if spec.executable.as_os_str().is_empty() {
                return Err(BridgeError::Config(format!(
                    "worker.{mode}.executable must not be empty"
                )));
            }
        }

        Ok(())
    }
}
