//! Condition source configuration
//!
//! Lives in the `condition` section of the agent config file and may be
//! overridden through `EVICTION_AGENT__CONDITION__*` environment variables.

use super::{ConditionThresholds, VictimPolicy};
use crate::error::ConditionError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix shared with the agent binary
pub const ENV_PREFIX: &str = "EVICTION_AGENT";

/// Condition source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionConfig {
    /// Sustained-good time after the last busy sample before untaint
    pub untaint_grace_period_secs: u64,
    /// Interval between host samples
    pub sample_interval_secs: u64,
    /// Mount point of procfs
    pub proc_root: PathBuf,
    pub thresholds: ConditionThresholds,
    pub victim: VictimPolicy,
}

impl Default for ConditionConfig {
    fn default() -> Self {
        Self {
            untaint_grace_period_secs: 300,
            sample_interval_secs: 5,
            proc_root: PathBuf::from("/proc"),
            thresholds: ConditionThresholds::default(),
            victim: VictimPolicy::default(),
        }
    }
}

impl ConditionConfig {
    pub fn untaint_grace_period(&self) -> Duration {
        Duration::from_secs(self.untaint_grace_period_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        // Zero would spin the sampling loop
        Duration::from_secs(self.sample_interval_secs.max(1))
    }

    /// Load the `condition` section from a config file.
    ///
    /// A missing file or section yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConditionError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match settings.get::<ConditionConfig>("condition") {
            Ok(config) => Ok(config),
            Err(::config::ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}
