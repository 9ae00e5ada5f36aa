//! Agent configuration
//!
//! The `agent` section of the config file, layered with
//! `EVICTION_AGENT__AGENT__*` environment overrides. The `condition` section
//! of the same file is loaded by the condition manager.

use anyhow::{Context, Result};
use eviction_lib::cluster::DEFAULT_TAINT_KEY_PREFIX;
use eviction_lib::condition::ENV_PREFIX;
use eviction_lib::{ControllerConfig, DEFAULT_TAINT_UPDATE_PERIOD};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    /// Interval between pressure ticks in seconds
    #[serde(default = "default_taint_update_period")]
    pub taint_update_period_secs: u64,

    /// Re-read node taints every N ticks
    #[serde(default)]
    pub taint_resync_ticks: Option<u32>,

    /// Port for health and metrics; no listener when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// Prefix of taint and label keys
    #[serde(default = "default_taint_key_prefix")]
    pub taint_key_prefix: String,
}

fn default_taint_update_period() -> u64 {
    DEFAULT_TAINT_UPDATE_PERIOD.as_secs()
}

fn default_taint_key_prefix() -> String {
    DEFAULT_TAINT_KEY_PREFIX.to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            taint_update_period_secs: default_taint_update_period(),
            taint_resync_ticks: None,
            metrics_port: None,
            taint_key_prefix: default_taint_key_prefix(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the config file and environment.
    ///
    /// A missing file or `agent` section yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        match settings.get::<AgentConfig>("agent") {
            Ok(config) => Ok(config),
            Err(config::ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e).context("Invalid agent section"),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            // Zero would spin the pressure loop
            taint_update_period: Duration::from_secs(self.taint_update_period_secs.max(1)),
            taint_resync_ticks: self.taint_resync_ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AgentConfig::load(&dir.path().join("absent.yaml")).unwrap();

        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.taint_key_prefix, "eviction-agent");
        assert_eq!(
            config.controller_config().taint_update_period,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_load_agent_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(
            &path,
            r#"
agent:
  taint_update_period_secs: 5
  taint_resync_ticks: 6
  metrics_port: 9100
condition:
  untaint_grace_period_secs: 60
"#,
        )
        .unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.taint_key_prefix, "eviction-agent");

        let controller = config.controller_config();
        assert_eq!(controller.taint_update_period, Duration::from_secs(5));
        assert_eq!(controller.taint_resync_ticks, Some(6));
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(&path, "agent:\n  metrics_port: not-a-port\n").unwrap();

        assert!(AgentConfig::load(&path).is_err());
    }
}
